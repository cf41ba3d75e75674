//! Startup sequencing for the forwarding pipeline.
//!
//! [`Pipeline::connect`] is the only way to obtain a [`ConnectedPipeline`],
//! and only a connected pipeline can start consuming. A failed broker
//! connect drops the event source without ever polling it.

use super::broker_publisher::{BrokerError, BrokerPublisher, BrokerTransport};
use super::stream_consumer::{CommitForwarder, EventSource, StreamConsumer};
use crate::shutdown::StoppableTask;
use std::future::Future;
use tracing::{error, info};

pub struct Pipeline<S, T> {
    publisher: BrokerPublisher<T>,
    source: S,
    forwarder: CommitForwarder<T>,
}

impl<S: EventSource, T: BrokerTransport> Pipeline<S, T> {
    pub fn new(publisher: BrokerPublisher<T>, source: S, forwarder: CommitForwarder<T>) -> Self {
        Self {
            publisher,
            source,
            forwarder,
        }
    }

    /// Connect to the broker, failing if the retry budget runs out.
    pub async fn connect(self) -> Result<ConnectedPipeline<S, T>, BrokerError> {
        if let Err(e) = self.publisher.connect().await {
            error!(error = %e, "Broker unreachable, not consuming events");
            return Err(e);
        }
        Ok(ConnectedPipeline { pipeline: self })
    }

    /// Like [`connect`](Self::connect), but gives up with `Ok(None)` as
    /// soon as `stop` completes.
    pub async fn connect_until(
        self,
        stop: impl Future<Output = ()>,
    ) -> Result<Option<ConnectedPipeline<S, T>>, BrokerError> {
        tokio::select! {
            connected = self.connect() => connected.map(Some),
            () = stop => {
                info!("Shutdown requested while connecting to the broker");
                Ok(None)
            }
        }
    }
}

/// A pipeline whose broker connection is established.
pub struct ConnectedPipeline<S, T> {
    pipeline: Pipeline<S, T>,
}

impl<S: EventSource, T: BrokerTransport> ConnectedPipeline<S, T> {
    /// Spawn the connection supervisor and the stream consumer.
    pub fn start(self) -> RunningPipeline<T> {
        let Pipeline {
            publisher,
            source,
            forwarder,
        } = self.pipeline;

        let supervisor = {
            let publisher = publisher.clone();
            StoppableTask::spawn(move |stop_rx| publisher.run(stop_rx))
        };
        let consumer = StoppableTask::spawn(move |stop_rx| {
            StreamConsumer::new(source, forwarder).run(stop_rx)
        });
        info!("Forwarding pipeline started");

        RunningPipeline {
            publisher,
            supervisor,
            consumer,
        }
    }
}

/// Handles to a started pipeline, torn down by the shutdown steps.
pub struct RunningPipeline<T> {
    pub publisher: BrokerPublisher<T>,
    pub supervisor: StoppableTask<()>,
    pub consumer: StoppableTask<()>,
}

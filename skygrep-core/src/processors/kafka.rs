//! Kafka implementation of [`BrokerTransport`] on top of rdkafka's
//! `FutureProducer`.
//!
//! librdkafka reports broker loss through the client context's error
//! callback (`AllBrokersDown`); the context forwards it as a
//! [`LinkEvent::Disconnected`].

use super::broker_publisher::{BrokerError, BrokerTransport, LinkEvent};
use crate::config::KafkaConfig;
use async_trait::async_trait;
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Client context forwarding connectivity errors to the publisher.
pub struct LinkContext {
    link_tx: broadcast::Sender<LinkEvent>,
}

impl ClientContext for LinkContext {
    fn error(&self, error: KafkaError, reason: &str) {
        match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::AllBrokersDown) => {
                let _ = self.link_tx.send(LinkEvent::Disconnected {
                    reason: reason.to_string(),
                });
            }
            _ => error!(error = %error, reason, "librdkafka error"),
        }
    }
}

type LinkProducer = FutureProducer<LinkContext>;

/// Kafka producer transport.
pub struct KafkaTransport {
    client_config: ClientConfig,
    send_timeout: Duration,
    metadata_timeout: Duration,
    producer: RwLock<Option<LinkProducer>>,
    link_tx: broadcast::Sender<LinkEvent>,
}

impl KafkaTransport {
    const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
    const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(config: &KafkaConfig) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("client.id", "skygrep")
            .set(
                "message.timeout.ms",
                config.send_timeout.as_millis().to_string(),
            );
        let (link_tx, _) = broadcast::channel(16);

        Self {
            client_config,
            send_timeout: config.send_timeout,
            metadata_timeout: Self::METADATA_TIMEOUT,
            producer: RwLock::new(None),
            link_tx,
        }
    }

    fn producer(&self) -> Option<LinkProducer> {
        self.producer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn producer_or_create(&self) -> Result<LinkProducer, BrokerError> {
        if let Some(producer) = self.producer() {
            return Ok(producer);
        }
        let producer: LinkProducer = self.client_config.create_with_context(LinkContext {
            link_tx: self.link_tx.clone(),
        })?;
        *self.producer.write().unwrap_or_else(PoisonError::into_inner) = Some(producer.clone());
        Ok(producer)
    }
}

#[async_trait]
impl BrokerTransport for KafkaTransport {
    /// Create the producer if needed and prove connectivity with a
    /// metadata round-trip.
    async fn connect(&self) -> Result<(), BrokerError> {
        let producer = self.producer_or_create()?;
        let timeout = self.metadata_timeout;
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|e| BrokerError::Transport(format!("metadata task failed: {e}")))??;
        debug!(brokers = metadata, "Fetched Kafka cluster metadata");
        Ok(())
    }

    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(), BrokerError> {
        let producer = self
            .producer()
            .ok_or_else(|| BrokerError::Transport("producer has not been created".to_string()))?;

        let mut record = FutureRecord::<str, [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }

        producer
            .send(record, self.send_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _message)| BrokerError::Kafka(e))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let producer = self
            .producer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(producer) = producer else {
            return Ok(());
        };
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Self::FLUSH_TIMEOUT))
            .await
            .map_err(|e| BrokerError::Transport(format!("flush task failed: {e}")))?;
        if let Err(e) = &flushed {
            warn!(error = %e, "Kafka producer flush did not complete");
        }
        flushed.map_err(BrokerError::from)
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.link_tx.subscribe()
    }
}

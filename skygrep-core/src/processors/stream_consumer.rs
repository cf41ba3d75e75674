//! StreamConsumer processor.
//!
//! The StreamConsumer is responsible for:
//! - Pulling commit events from an [`EventSource`] in arrival order
//! - Handing each event to the [`CommitForwarder`] and awaiting it before
//!   pulling the next one, so broker slowness throttles intake
//! - Closing the source once shutdown is signaled or the stream ends
//!
//! The CommitForwarder keeps two dispatch paths. Every commit goes through
//! the collection rules; creates in the baseline collection additionally go
//! through the pattern rules. Within a path, matched rules are published
//! sequentially in declaration order.

use super::broker_publisher::{BrokerPublisher, BrokerTransport};
use crate::events::{CommitEvent, CommitOperation};
use crate::health::HealthTracker;
use crate::metrics::RuleMetrics;
use crate::rules::{RuleKind, RuleMatch, RuleSet};
use async_trait::async_trait;
use kanau::processor::Processor;
use skygrep_sdk::client::ClientError;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Event source seam
// ---------------------------------------------------------------------------

/// Errors produced by an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Websocket transport failure
    #[error("event source client error: {0}")]
    Client(#[from] ClientError),

    /// A frame that could not be decoded
    #[error("failed to decode event frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// The subscription could not be (re)established
    #[error("gave up connecting to the event source after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<SourceError>,
    },
}

/// A stream of commit events.
///
/// `None` means the stream has ended for good. An `Err` item is a single
/// bad frame or a transient failure; the consumer logs it and keeps reading.
#[async_trait]
pub trait EventSource: Send + 'static {
    async fn next_event(&mut self) -> Option<Result<CommitEvent, SourceError>>;

    async fn close(&mut self) -> Result<(), SourceError>;
}

// ---------------------------------------------------------------------------
// CommitForwarder
// ---------------------------------------------------------------------------

/// Outcome of forwarding one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardSummary {
    pub matched: usize,
    pub published: usize,
    pub failed: usize,
}

/// Matches commit events against the rule set and publishes every match.
pub struct CommitForwarder<T> {
    rules: Arc<RuleSet>,
    metrics: RuleMetrics,
    health: HealthTracker,
    publisher: BrokerPublisher<T>,
}

impl<T: BrokerTransport> CommitForwarder<T> {
    pub fn new(
        rules: Arc<RuleSet>,
        metrics: RuleMetrics,
        health: HealthTracker,
        publisher: BrokerPublisher<T>,
    ) -> Self {
        Self {
            rules,
            metrics,
            health,
            publisher,
        }
    }

    async fn forward_matches(
        &self,
        event: &CommitEvent,
        kind: RuleKind,
        matches: Vec<RuleMatch<'_>>,
        summary: &mut ForwardSummary,
    ) {
        if matches.is_empty() {
            return;
        }
        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, did = %event.did, "Failed to serialize commit event");
                return;
            }
        };
        let key = event.message_key();

        for matched in matches {
            let topic = matched.topic();
            summary.matched += 1;
            self.metrics.increment(topic);

            match self
                .publisher
                .publish(topic.as_str(), Some(&key), &payload)
                .await
            {
                Ok(()) => {
                    summary.published += 1;
                    match kind {
                        RuleKind::Collection => info!(
                            collection = %event.collection,
                            topic = %topic,
                            rule = matched.index,
                            "Collection rule matched - message sent to Kafka"
                        ),
                        RuleKind::Pattern => info!(
                            did = %event.did,
                            topic = %topic,
                            rule = matched.index,
                            "Pattern rule matched - message sent to Kafka"
                        ),
                    }
                }
                // Already logged by the publisher.
                Err(_) => summary.failed += 1,
            }
        }
    }
}

impl<T: BrokerTransport> Processor<CommitEvent> for CommitForwarder<T> {
    type Output = ForwardSummary;
    type Error = Infallible;

    async fn process(&self, event: CommitEvent) -> Result<ForwardSummary, Infallible> {
        let mut summary = ForwardSummary::default();

        self.health.record_event();
        let matches = self.rules.match_kind(&event, RuleKind::Collection);
        self.forward_matches(&event, RuleKind::Collection, matches, &mut summary)
            .await;

        if event.is_baseline() && event.operation == CommitOperation::Create {
            self.health.record_event();
            let matches = self.rules.match_kind(&event, RuleKind::Pattern);
            self.forward_matches(&event, RuleKind::Pattern, matches, &mut summary)
                .await;
        }

        debug!(
            collection = %event.collection,
            operation = %event.operation,
            matched = summary.matched,
            failed = summary.failed,
            "Processed commit event"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// StreamConsumer
// ---------------------------------------------------------------------------

pub struct StreamConsumer<S, T> {
    source: S,
    forwarder: CommitForwarder<T>,
}

impl<S: EventSource, T: BrokerTransport> StreamConsumer<S, T> {
    pub fn new(source: S, forwarder: CommitForwarder<T>) -> Self {
        Self { source, forwarder }
    }

    /// Consume until shutdown is signaled or the source ends, then close
    /// the source.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("Stream consumer started");

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Stream consumer received shutdown signal");
                        break;
                    }
                }

                next = self.source.next_event() => {
                    match next {
                        Some(Ok(event)) => {
                            let Ok(_summary) = self.forwarder.process(event).await;
                        }
                        Some(Err(e)) => warn!(error = %e, "Skipping event source error"),
                        None => {
                            warn!("Event stream ended");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Error while closing event source");
        }
        info!("Stream consumer shutdown complete");
    }
}

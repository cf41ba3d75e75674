//! BrokerPublisher processor.
//!
//! The BrokerPublisher is responsible for:
//! - Connecting the broker transport at startup with a bounded retry
//! - Watching the transport for disconnect notifications and reconnecting
//!   with the same bounded policy
//! - Publishing one message per call, without buffering or message-level
//!   retries
//! - Mirroring the connection state into the [`HealthTracker`]
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                      |                           |
//!                      +---------> Failed <--------+
//! ```
//!
//! Exhausting the retries in `Connecting` is a fatal startup error.
//! Exhausting them in `Reconnecting` only leaves the publisher `Failed`;
//! publishes fail individually until a later reconnect round succeeds.

use crate::health::HealthTracker;
use crate::utils::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Kafka client error
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Any other transport failure
    #[error("broker transport error: {0}")]
    Transport(String),

    /// Publishing was attempted while not connected
    #[error("broker is not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// Every connect attempt failed
    #[error("gave up connecting to the broker after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<BrokerError>,
    },
}

/// Connection lifecycle of the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Asynchronous notifications emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The transport lost its connection to the broker.
    Disconnected { reason: String },
}

/// Raw broker client consumed by the publisher.
///
/// Implementations should not retry internally; retry policy belongs to
/// the [`BrokerPublisher`].
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Establish (or re-establish) the connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Send a single message and wait for the broker's acknowledgement.
    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(), BrokerError>;

    /// Flush and release the connection.
    async fn close(&self) -> Result<(), BrokerError>;

    /// Subscribe to disconnect notifications.
    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;
}

/// Publishes matched events to the broker and owns its connection state.
///
/// Cheap to clone; clones share the transport and state.
pub struct BrokerPublisher<T> {
    inner: Arc<PublisherInner<T>>,
}

struct PublisherInner<T> {
    transport: T,
    state_tx: watch::Sender<ConnectionState>,
    health: HealthTracker,
    retry: RetryPolicy,
}

impl<T> Clone for BrokerPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: BrokerTransport> BrokerPublisher<T> {
    /// Create a disconnected publisher.
    pub fn new(transport: T, health: HealthTracker, retry: RetryPolicy) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        health.set_broker_connected(false);
        Self {
            inner: Arc::new(PublisherInner {
                transport,
                state_tx,
                health,
                retry,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Connect at startup.
    ///
    /// Returns [`BrokerError::RetriesExhausted`] if the broker cannot be
    /// reached within the retry policy; the caller must not start
    /// consuming events in that case.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        self.set_state(ConnectionState::Connecting);
        match self.connect_with_retry("broker connect").await {
            Ok(()) => {
                info!("Connected to Kafka");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to Kafka");
                Err(e)
            }
        }
    }

    /// Reconnect after a disconnect notification.
    ///
    /// Returns whether the connection was restored. Exhaustion is logged
    /// and leaves the publisher `Failed`; it never terminates the process.
    pub async fn reconnect(&self) -> bool {
        self.set_state(ConnectionState::Reconnecting);
        match self.connect_with_retry("broker reconnect").await {
            Ok(()) => {
                info!("Reconnected to Kafka");
                true
            }
            Err(e) => {
                error!(error = %e, "Kafka reconnect failed, publishing is degraded");
                false
            }
        }
    }

    /// Publish one message.
    ///
    /// Failures are logged here and returned for accounting; they are never
    /// retried or queued.
    pub async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let state = self.state();
        let result = if state == ConnectionState::Connected {
            self.inner.transport.send(topic, key, payload).await
        } else {
            Err(BrokerError::NotConnected(state))
        };
        if let Err(e) = &result {
            error!(topic, error = %e, "Failed to send message to Kafka");
        }
        result
    }

    /// Close the transport.
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.set_state(ConnectionState::Disconnected);
        let result = self.inner.transport.close().await;
        match &result {
            Ok(()) => info!("Kafka producer disconnected"),
            Err(e) => warn!(error = %e, "Error while disconnecting Kafka producer"),
        }
        result
    }

    /// Supervise the connection until shutdown is signaled.
    ///
    /// Reacts to transport disconnect notifications by running a bounded
    /// reconnect round. While `Failed`, another round is started every
    /// retry interval.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut link_rx = self.inner.transport.link_events();
        info!("Kafka connection supervisor started");

        loop {
            let failed = self.state() == ConnectionState::Failed;
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Kafka connection supervisor received shutdown signal");
                        break;
                    }
                }

                event = link_rx.recv() => {
                    match event {
                        Ok(LinkEvent::Disconnected { reason }) => {
                            if !self.should_reconnect() {
                                debug!(%reason, state = %self.state(), "Ignoring disconnect notification");
                                continue;
                            }
                            error!(%reason, "Kafka producer disconnected");
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed Kafka link notifications, checking connection");
                            if !self.should_reconnect() {
                                continue;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Kafka link notification channel closed");
                            break;
                        }
                    }
                    if !self.reconnect_unless_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    drain(&mut link_rx);
                }

                _ = tokio::time::sleep(self.inner.retry.delay), if failed => {
                    info!("Starting another Kafka reconnect round");
                    if !self.reconnect_unless_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    drain(&mut link_rx);
                }
            }
        }

        info!("Kafka connection supervisor shutdown complete");
    }

    // -- Private helpers ----------------------------------------------------

    fn should_reconnect(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Failed
        )
    }

    /// Returns `false` if shutdown was signaled during the reconnect round.
    async fn reconnect_unless_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown_rx) => {
                info!("Shutdown requested during Kafka reconnect");
                false
            }
            _ = self.reconnect() => true,
        }
    }

    async fn connect_with_retry(&self, what: &str) -> Result<(), BrokerError> {
        let transport = &self.inner.transport;
        let result = retry(self.inner.retry, what, move |attempt| {
            debug!(attempt, "Connecting to Kafka");
            transport.connect()
        })
        .await;
        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(exhausted) => {
                self.set_state(ConnectionState::Failed);
                Err(BrokerError::RetriesExhausted {
                    attempts: exhausted.attempts,
                    last_error: Box::new(exhausted.last_error),
                })
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state_tx.send_replace(state);
        self.inner
            .health
            .set_broker_connected(state == ConnectionState::Connected);
        if previous != state {
            debug!(from = %previous, to = %state, "Broker connection state changed");
        }
    }
}

/// Discard notifications that piled up while reconnecting.
fn drain(link_rx: &mut broadcast::Receiver<LinkEvent>) {
    loop {
        match link_rx.try_recv() {
            Ok(event) => debug!(?event, "Dropping stale link notification"),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                debug!(skipped, "Dropping stale link notifications");
            }
            Err(_) => break,
        }
    }
}

/// Resolve once shutdown has been signaled or the sender is gone.
async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

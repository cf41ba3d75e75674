//! Jetstream implementation of [`EventSource`].
//!
//! Connects lazily on the first read, remembers the `time_us` of every
//! frame it sees and resumes from there when the subscription drops. The
//! cursor lives in memory only.

use super::stream_consumer::{EventSource, SourceError};
use crate::config::JetstreamConfig;
use crate::events::CommitEvent;
use crate::utils::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use skygrep_sdk::client::{ClientError, JetstreamClient, JetstreamSubscription};
use skygrep_sdk::objects::JetstreamMessage;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const MICROS_PER_HOUR: i128 = 3_600_000_000;

/// Cursor (unix microseconds) `hours` before `now`.
pub fn cursor_from_lookback(hours: u64, now: OffsetDateTime) -> i64 {
    let now_us = now.unix_timestamp_nanos() / 1_000;
    let cursor = now_us - i128::from(hours) * MICROS_PER_HOUR;
    cursor.clamp(0, i128::from(i64::MAX)) as i64
}

pub struct JetstreamSource {
    client: JetstreamClient,
    retry: RetryPolicy,
    subscription: Option<JetstreamSubscription>,
    cursor: Option<i64>,
    finished: bool,
}

impl JetstreamSource {
    pub fn new(config: &JetstreamConfig, wanted_collections: Vec<String>, cursor: Option<i64>) -> Self {
        Self {
            client: JetstreamClient::new(config.endpoint.clone(), wanted_collections),
            retry: config.retry,
            subscription: None,
            cursor,
            finished: false,
        }
    }

    /// Where the next (re)connect will resume from.
    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    async fn open(&self) -> Result<JetstreamSubscription, SourceError> {
        let client = &self.client;
        let cursor = self.cursor;
        let subscription = retry(self.retry, "jetstream connect", move |attempt| {
            debug!(attempt, ?cursor, "Connecting to Jetstream");
            client.connect(cursor)
        })
        .await
        .map_err(|exhausted| SourceError::RetriesExhausted {
            attempts: exhausted.attempts,
            last_error: Box::new(SourceError::Client(exhausted.last_error)),
        })?;
        info!(
            collections = ?client.wanted_collections(),
            ?cursor,
            "Connected to Jetstream"
        );
        Ok(subscription)
    }
}

#[async_trait]
impl EventSource for JetstreamSource {
    async fn next_event(&mut self) -> Option<Result<CommitEvent, SourceError>> {
        loop {
            if self.finished {
                return None;
            }
            let subscription = match self.subscription.as_mut() {
                Some(subscription) => subscription,
                None => match self.open().await {
                    Ok(subscription) => self.subscription.insert(subscription),
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                },
            };

            match subscription.next_message().await {
                Some(Ok(JetstreamMessage::Commit(message))) => {
                    self.cursor = Some(message.time_us);
                    return Some(Ok(message.into()));
                }
                Some(Ok(other)) => {
                    self.cursor = Some(other.time_us());
                    debug!(time_us = other.time_us(), "Skipping non-commit frame");
                }
                Some(Err(ClientError::Json(e))) => return Some(Err(SourceError::Decode(e))),
                Some(Err(e)) => {
                    warn!(error = %e, cursor = ?self.cursor, "Jetstream connection lost, reconnecting");
                    self.subscription = None;
                }
                None => {
                    warn!(cursor = ?self.cursor, "Jetstream closed the subscription, reconnecting");
                    self.subscription = None;
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.finished = true;
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close().await?;
            info!("Jetstream subscription closed");
        }
        Ok(())
    }
}

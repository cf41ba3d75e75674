//! In-memory transport and source used by the processor tests.

use super::broker_publisher::{BrokerError, BrokerTransport, LinkEvent};
use super::stream_consumer::{EventSource, SourceError};
use crate::events::CommitEvent;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

pub struct FakeTransport {
    /// Outcomes of upcoming `connect` calls; empty means success.
    pub connect_results: Mutex<VecDeque<Result<(), String>>>,
    pub connect_calls: AtomicU32,
    pub sent: Mutex<Vec<SentMessage>>,
    /// Topics whose sends fail.
    pub failing_topics: Mutex<Vec<String>>,
    /// Sends never resolve while set.
    pub hang_sends: AtomicBool,
    pub closed: AtomicBool,
    pub link_tx: broadcast::Sender<LinkEvent>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (link_tx, _) = broadcast::channel(16);
        Self {
            connect_results: Mutex::new(VecDeque::new()),
            connect_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            failing_topics: Mutex::new(Vec::new()),
            hang_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            link_tx,
        }
    }

    pub fn queue_connect_failures(&self, count: usize) {
        let mut results = self.connect_results.lock().unwrap();
        for i in 0..count {
            results.push_back(Err(format!("broker unreachable ({i})")));
        }
    }

    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().push(topic.to_string());
    }

    pub fn disconnect(&self) {
        let _ = self.link_tx.send(LinkEvent::Disconnected {
            reason: "all brokers down".to_string(),
        });
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_topics(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.topic).collect()
    }
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.connect_results.lock().unwrap().pop_front();
        match next {
            Some(Err(reason)) => Err(BrokerError::Transport(reason)),
            _ => Ok(()),
        }
    }

    async fn send(&self, topic: &str, key: Option<&str>, payload: &[u8]) -> Result<(), BrokerError> {
        if self.hang_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing_topics.lock().unwrap().iter().any(|t| t == topic) {
            return Err(BrokerError::Transport(format!("send to {topic} rejected")));
        }
        self.sent.lock().unwrap().push(SentMessage {
            topic: topic.to_string(),
            key: key.map(str::to_string),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.link_tx.subscribe()
    }
}

/// Yields a fixed list of items, then either ends or stays open.
pub struct FakeSource {
    pub items: VecDeque<Result<CommitEvent, SourceError>>,
    /// Keep the stream open (pending) after the items run out.
    pub stay_open: bool,
    pub closed: std::sync::Arc<AtomicBool>,
    /// Number of `next_event` calls.
    pub polls: std::sync::Arc<AtomicU32>,
}

impl FakeSource {
    pub fn new(items: Vec<Result<CommitEvent, SourceError>>) -> Self {
        Self {
            items: items.into(),
            stay_open: false,
            closed: std::sync::Arc::new(AtomicBool::new(false)),
            polls: std::sync::Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn staying_open(mut self) -> Self {
        self.stay_open = true;
        self
    }
}

#[async_trait]
impl EventSource for FakeSource {
    async fn next_event(&mut self) -> Option<Result<CommitEvent, SourceError>> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.items.pop_front() {
            Some(item) => Some(item),
            None if self.stay_open => std::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

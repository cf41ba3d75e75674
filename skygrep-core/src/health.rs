//! Process health tracking.
//!
//! The tracker is written by the stream consumer (event timestamps) and
//! the broker publisher (connection flag) and read by the status
//! endpoint. The verdict is recomputed on every read; there is no
//! background health-check loop.

use crate::config::HealthConfig;
use skygrep_sdk::objects::{HealthResponse, HealthVerdict};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared health state.
///
/// Cheap to clone; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    inner: Arc<HealthInner>,
}

#[derive(Debug)]
struct HealthInner {
    config: HealthConfig,
    start: Instant,
    /// Microseconds after `start` at which the last event was seen.
    last_event_offset_us: AtomicU64,
    broker_connected: AtomicBool,
    /// Verdict of the most recent derivation.
    is_healthy: AtomicBool,
}

/// A derived health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub verdict: HealthVerdict,
    pub uptime_ms: u64,
    pub last_event_ms_ago: u64,
    pub broker_connected: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.verdict == HealthVerdict::Healthy
    }

    /// HTTP status code for the status endpoint.
    pub fn status_code(&self) -> u16 {
        if self.is_healthy() { 200 } else { 503 }
    }
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        HealthResponse {
            status: report.verdict,
            uptime_ms: report.uptime_ms,
            last_event_ms_ago: report.last_event_ms_ago,
        }
    }
}

impl HealthTracker {
    /// Start tracking now. The last-event time starts at process start.
    pub fn new(config: HealthConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    pub fn starting_at(config: HealthConfig, start: Instant) -> Self {
        Self {
            inner: Arc::new(HealthInner {
                config,
                start,
                last_event_offset_us: AtomicU64::new(0),
                broker_connected: AtomicBool::new(false),
                is_healthy: AtomicBool::new(true),
            }),
        }
    }

    /// Record that an event was received now.
    pub fn record_event(&self) {
        self.record_event_at(Instant::now());
    }

    pub fn record_event_at(&self, at: Instant) {
        let offset = micros(at.saturating_duration_since(self.inner.start));
        self.inner
            .last_event_offset_us
            .fetch_max(offset, Ordering::Relaxed);
    }

    pub fn set_broker_connected(&self, connected: bool) {
        self.inner
            .broker_connected
            .store(connected, Ordering::Relaxed);
    }

    pub fn broker_connected(&self) -> bool {
        self.inner.broker_connected.load(Ordering::Relaxed)
    }

    /// Verdict of the most recent [`derive`](Self::derive) call.
    pub fn is_healthy(&self) -> bool {
        self.inner.is_healthy.load(Ordering::Relaxed)
    }

    pub fn derive(&self) -> HealthReport {
        self.derive_at(Instant::now())
    }

    /// Derive the verdict as of `now`.
    ///
    /// Unhealthy once `now - last_event >= stale_after`, or while the
    /// broker is disconnected if the broker gate is enabled.
    pub fn derive_at(&self, now: Instant) -> HealthReport {
        let inner = &self.inner;
        let uptime = now.saturating_duration_since(inner.start);
        let last_event =
            Duration::from_micros(inner.last_event_offset_us.load(Ordering::Relaxed));
        let age = uptime.saturating_sub(last_event);
        let broker_connected = self.broker_connected();

        let fresh = age < inner.config.stale_after;
        let broker_ok = broker_connected || !inner.config.require_broker_connection;
        let healthy = fresh && broker_ok;
        inner.is_healthy.store(healthy, Ordering::Relaxed);

        HealthReport {
            verdict: if healthy {
                HealthVerdict::Healthy
            } else {
                HealthVerdict::Unhealthy
            },
            uptime_ms: millis(uptime),
            last_event_ms_ago: millis(age),
            broker_connected,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

//! Validated runtime configuration.
//!
//! These types are built by the server crate after the configuration file
//! has been parsed and every field checked; once constructed they are
//! immutable for the lifetime of the process.

use crate::rules::RuleSet;
use crate::utils::retry::RetryPolicy;
use std::time::Duration;
use url::Url;

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub rules: RuleSet,
    pub kafka: KafkaConfig,
    pub jetstream: JetstreamConfig,
    pub health: HealthConfig,
    pub shutdown: ShutdownConfig,
}

/// Message broker settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Bootstrap addresses in `host:port` form.
    pub brokers: Vec<String>,
    /// Connect and reconnect policy.
    pub retry: RetryPolicy,
    /// Upper bound on a single send, including time queued in the client.
    pub send_timeout: Duration,
}

impl KafkaConfig {
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

    /// The value for librdkafka's `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Event source settings.
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub endpoint: Url,
    /// Reconnect policy after the subscription drops.
    pub retry: RetryPolicy,
}

/// Health verdict settings.
#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    /// No event for this long makes the process unhealthy.
    pub stale_after: Duration,
    /// Also report unhealthy while the broker is disconnected.
    pub require_broker_connection: bool,
}

impl HealthConfig {
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after: Self::DEFAULT_STALE_AFTER,
            require_broker_connection: false,
        }
    }
}

/// Shutdown settings.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    /// Independent bound on every teardown step.
    pub step_timeout: Duration,
}

impl ShutdownConfig {
    pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            step_timeout: Self::DEFAULT_STEP_TIMEOUT,
        }
    }
}

//! Application state shared across all request handlers.

use skygrep_core::health::HealthTracker;
use skygrep_core::metrics::RuleMetrics;

/// Read-only view of the pipeline for the status endpoints.
///
/// Cheap to clone; both trackers share their state with the pipeline.
#[derive(Clone)]
pub struct AppState {
    pub health: HealthTracker,
    pub metrics: RuleMetrics,
}

impl AppState {
    pub fn new(health: HealthTracker, metrics: RuleMetrics) -> Self {
        Self { health, metrics }
    }
}

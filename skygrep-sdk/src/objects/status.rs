//! Payloads served by the status endpoint.
//!
//! - `GET /health` → [`HealthResponse`]
//! - `GET /metrics` → [`MetricsResponse`], one key per configured topic

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Unhealthy,
}

/// Body of `GET /health`. The shape is identical for 200 and 503.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthVerdict,
    pub uptime_ms: u64,
    pub last_event_ms_ago: u64,
}

/// Body of `GET /metrics`.
///
/// Serialized as a JSON object whose keys keep the order of the entries,
/// i.e. topic declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsResponse(pub Vec<(String, u64)>);

impl Serialize for MetricsResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (topic, count) in &self.0 {
            map.serialize_entry(topic, count)?;
        }
        map.end()
    }
}

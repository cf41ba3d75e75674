//! JSON file configuration structures.
//!
//! These structs map to `config.json`. Every value is wrapped in a
//! [`Field`] so that missing, empty and wrongly typed values can be
//! reported together by the validator instead of failing on the first
//! one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A configuration value as found in the file.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    /// Absent or `null`.
    Missing,
    Present(T),
    /// Present but not of the expected type.
    Invalid(Value),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<T: DeserializeOwned> Field<T> {
    fn from_value(value: Value) -> Self {
        if value.is_null() {
            return Field::Missing;
        }
        match serde_json::from_value(value.clone()) {
            Ok(parsed) => Field::Present(parsed),
            Err(_) => Field::Invalid(value),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Field::from_value)
    }
}

/// Like [`Field`]'s own impl, but only a JSON object counts as present.
fn section<'de, D, T>(deserializer: D) -> Result<Field<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Object(_) => Field::from_value(value),
        Value::Null => Field::Missing,
        other => Field::Invalid(other),
    })
}

/// Root configuration structure as read from the JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    /// Kept raw so a non-array value is a validation issue, not a parse
    /// failure.
    #[serde(default)]
    pub rules: Option<Value>,
    #[serde(default, deserialize_with = "section")]
    pub kafka: Field<KafkaSection>,
    #[serde(default, deserialize_with = "section")]
    pub jetstream: Field<JetstreamSection>,
    #[serde(default, deserialize_with = "section")]
    pub health: Field<HealthSection>,
    #[serde(default, deserialize_with = "section")]
    pub shutdown: Field<ShutdownSection>,
}

/// One entry of `rules`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRule {
    /// `"pattern"` or `"collection"`.
    #[serde(rename = "type", default)]
    pub kind: Field<String>,
    #[serde(default)]
    pub field: Field<String>,
    #[serde(default)]
    pub pattern: Field<String>,
    /// Raw elements so that each one can be checked individually.
    #[serde(default)]
    pub collections: Field<Vec<Value>>,
    #[serde(default)]
    pub kafka_topic: Field<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSection {
    #[serde(default)]
    pub brokers: Field<Vec<Value>>,
    /// Connect attempts, including the first.
    #[serde(default)]
    pub connect_retries: Field<u32>,
    #[serde(default)]
    pub retry_delay_ms: Field<u64>,
    #[serde(default)]
    pub send_timeout_ms: Field<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JetstreamSection {
    #[serde(default)]
    pub endpoint: Field<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSection {
    #[serde(default)]
    pub stale_after_ms: Field<u64>,
    #[serde(default)]
    pub require_broker_connection: Field<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownSection {
    #[serde(default)]
    pub step_timeout_ms: Field<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrongly_typed_values_do_not_fail_parsing() {
        let file: FileConfig = serde_json::from_value(json!({
            "kafka": { "brokers": "localhost:9092", "connectRetries": -1 },
            "jetstream": null,
            "health": [],
            "shutdown": { "stepTimeoutMs": 100 }
        }))
        .unwrap();

        let Field::Present(kafka) = file.kafka else {
            panic!("kafka section should be present");
        };
        assert_eq!(kafka.brokers, Field::Invalid(json!("localhost:9092")));
        assert_eq!(kafka.connect_retries, Field::Invalid(json!(-1)));
        assert_eq!(kafka.retry_delay_ms, Field::Missing);
        assert!(matches!(file.jetstream, Field::Missing));
        assert!(matches!(file.health, Field::Invalid(_)));
        assert!(matches!(
            file.shutdown,
            Field::Present(ShutdownSection {
                step_timeout_ms: Field::Present(100)
            })
        ));
    }

    #[test]
    fn test_rule_fields_are_lenient() {
        let rule: FileRule = serde_json::from_value(json!({
            "type": "pattern",
            "field": 5,
            "pattern": null
        }))
        .unwrap();

        assert_eq!(rule.kind, Field::Present("pattern".to_string()));
        assert_eq!(rule.field, Field::Invalid(json!(5)));
        assert_eq!(rule.pattern, Field::Missing);
        assert_eq!(rule.kafka_topic, Field::Missing);
    }
}

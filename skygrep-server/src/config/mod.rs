//! Configuration module for skygrep-server.
//!
//! Reads the JSON configuration file, checks every field and builds the
//! immutable core [`Config`]. Validation never stops at the first problem;
//! all issues are reported together.

pub mod file;

use crate::config::file::{Field, FileConfig, FileRule};
use regex::Regex;
use serde_json::Value;
use skygrep_core::config::{
    Config, HealthConfig, JetstreamConfig, KafkaConfig, ShutdownConfig,
};
use skygrep_core::rules::{CollectionRule, PatternRule, Rule, RuleSet, Topic};
use skygrep_core::utils::retry::RetryPolicy;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Environment variable that overrides `--config`.
pub const CONFIG_ENV: &str = "SKYGREP_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

const DEFAULT_KAFKA_PORT: u16 = 9092;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration must be a valid JSON object")]
    NotAnObject,

    #[error("{0}")]
    Invalid(ValidationIssues),
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path of the offending value, e.g. `rules[0].pattern`.
    pub field: String,
    pub message: String,
}

/// Every problem found in one configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationIssues(pub Vec<ValidationIssue>);

impl ValidationIssues {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationIssue {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid configuration:")?;
        for issue in &self.0 {
            write!(f, "\n- {}: {}", issue.field, issue.message)?;
        }
        Ok(())
    }
}

/// Pick the configuration file: the environment variable wins over the
/// CLI flag, which wins over the default path.
pub fn resolve_config_path(env: Option<OsString>, cli: Option<PathBuf>) -> PathBuf {
    env.filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or(cli)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Configuration loader for a single file.
pub struct ConfigLoader {
    config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read, parse and validate the configuration file.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|source| ConfigError::Io {
                path: self.config_path.clone(),
                source,
            })?;
        parse_config(&content)
    }
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let value: Value = serde_json::from_str(content)?;
    if !value.is_object() {
        return Err(ConfigError::NotAnObject);
    }
    let file_config: FileConfig = serde_json::from_value(value)?;
    build_config(file_config).map_err(ConfigError::Invalid)
}

fn build_config(file: FileConfig) -> Result<Config, ValidationIssues> {
    let mut issues = ValidationIssues::default();

    let kafka = section(file.kafka, "kafka", &mut issues);
    let brokers = validate_brokers(kafka.brokers, &mut issues);
    let jetstream = section(file.jetstream, "jetstream", &mut issues);
    let endpoint = validate_endpoint(jetstream.endpoint, &mut issues);
    let rules = validate_rules(file.rules.as_ref(), &mut issues);

    let connect_retries = optional(
        kafka.connect_retries,
        "kafka.connectRetries",
        "Must be a positive integer",
        &mut issues,
    )
    .unwrap_or(RetryPolicy::DEFAULT_MAX_ATTEMPTS);
    if connect_retries == 0 {
        issues.push("kafka.connectRetries", "Must be at least 1");
    }
    let retry_delay = optional_millis(kafka.retry_delay_ms, "kafka.retryDelayMs", &mut issues);
    let send_timeout = optional_millis(kafka.send_timeout_ms, "kafka.sendTimeoutMs", &mut issues);

    let health = section(file.health, "health", &mut issues);
    let stale_after = optional_millis(health.stale_after_ms, "health.staleAfterMs", &mut issues);
    if stale_after == Some(Duration::ZERO) {
        issues.push("health.staleAfterMs", "Must be greater than 0");
    }
    let require_broker_connection = optional(
        health.require_broker_connection,
        "health.requireBrokerConnection",
        "Must be a boolean",
        &mut issues,
    );

    let shutdown = section(file.shutdown, "shutdown", &mut issues);
    let step_timeout = optional_millis(
        shutdown.step_timeout_ms,
        "shutdown.stepTimeoutMs",
        &mut issues,
    );
    if step_timeout == Some(Duration::ZERO) {
        issues.push("shutdown.stepTimeoutMs", "Must be greater than 0");
    }

    let (Some(endpoint), true) = (endpoint, issues.is_empty()) else {
        return Err(issues);
    };

    Ok(Config {
        rules,
        kafka: KafkaConfig {
            brokers,
            retry: RetryPolicy::new(
                connect_retries,
                retry_delay.unwrap_or(RetryPolicy::DEFAULT_DELAY),
            ),
            send_timeout: send_timeout.unwrap_or(KafkaConfig::DEFAULT_SEND_TIMEOUT),
        },
        jetstream: JetstreamConfig {
            endpoint,
            retry: RetryPolicy::default(),
        },
        health: HealthConfig {
            stale_after: stale_after.unwrap_or(HealthConfig::DEFAULT_STALE_AFTER),
            require_broker_connection: require_broker_connection.unwrap_or(false),
        },
        shutdown: ShutdownConfig {
            step_timeout: step_timeout.unwrap_or(ShutdownConfig::DEFAULT_STEP_TIMEOUT),
        },
    })
}

/// A section that is not an object is reported and treated as empty.
fn section<T: Default>(field: Field<T>, path: &str, issues: &mut ValidationIssues) -> T {
    match field {
        Field::Present(section) => section,
        Field::Missing => T::default(),
        Field::Invalid(_) => {
            issues.push(path, "Must be an object");
            T::default()
        }
    }
}

fn optional<T>(
    field: Field<T>,
    path: &str,
    expected: &str,
    issues: &mut ValidationIssues,
) -> Option<T> {
    match field {
        Field::Present(value) => Some(value),
        Field::Missing => None,
        Field::Invalid(_) => {
            issues.push(path, expected);
            None
        }
    }
}

fn optional_millis(
    field: Field<u64>,
    path: &str,
    issues: &mut ValidationIssues,
) -> Option<Duration> {
    optional(field, path, "Must be a non-negative integer", issues).map(Duration::from_millis)
}

/// A string that must be present and non-empty.
fn required_string(
    field: Field<String>,
    path: String,
    required: &str,
    issues: &mut ValidationIssues,
) -> Option<String> {
    match field {
        Field::Present(value) if !value.is_empty() => Some(value),
        Field::Invalid(_) => {
            issues.push(path, "Must be a string");
            None
        }
        _ => {
            issues.push(path, required);
            None
        }
    }
}

fn validate_brokers(brokers: Field<Vec<Value>>, issues: &mut ValidationIssues) -> Vec<String> {
    let brokers = match brokers {
        Field::Present(brokers) if !brokers.is_empty() => brokers,
        Field::Invalid(_) => {
            issues.push("kafka.brokers", "Brokers must be an array");
            return Vec::new();
        }
        _ => {
            issues.push("kafka.brokers", "At least one Kafka broker is required");
            return Vec::new();
        }
    };
    brokers
        .iter()
        .filter_map(|broker| {
            let parsed = broker.as_str().and_then(parse_broker);
            if parsed.is_none() {
                let shown = broker.as_str().map_or_else(|| broker.to_string(), str::to_string);
                issues.push("kafka.brokers", format!("Invalid broker URL: {shown}"));
            }
            parsed
        })
        .collect()
}

/// Normalise a broker address to `host:port`.
///
/// Accepts `host:port` or a URL with a host (`kafka://host:9092`); a URL
/// without a port gets the default Kafka port.
pub fn parse_broker(broker: &str) -> Option<String> {
    let broker = broker.trim();
    if !broker.contains("://") {
        let (host, port) = broker.rsplit_once(':')?;
        let valid_host = !host.is_empty() && !host.contains(['/', '@', ' ']);
        return (valid_host && port.parse::<u16>().is_ok()).then(|| broker.to_string());
    }
    let url = Url::parse(broker).ok()?;
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let port = url.port().unwrap_or(DEFAULT_KAFKA_PORT);
    Some(format!("{host}:{port}"))
}

fn validate_endpoint(endpoint: Field<String>, issues: &mut ValidationIssues) -> Option<Url> {
    let path = "jetstream.endpoint";
    let endpoint = required_string(
        endpoint,
        path.into(),
        "Jetstream endpoint is required",
        issues,
    )?;
    match Url::parse(&endpoint) {
        Ok(url) => Some(url),
        Err(_) => {
            issues.push(path, format!("Invalid Jetstream endpoint URL: {endpoint}"));
            None
        }
    }
}

fn validate_rules(rules: Option<&Value>, issues: &mut ValidationIssues) -> RuleSet {
    let Some(Value::Array(rules)) = rules else {
        issues.push("rules", "Rules must be an array");
        return RuleSet::default();
    };
    if rules.is_empty() {
        issues.push("rules", "At least one rule is required");
        return RuleSet::default();
    }

    rules
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let path = format!("rules[{index}]");
            if !raw.is_object() {
                issues.push(path, "Rule must be an object");
                return None;
            }
            match serde_json::from_value::<FileRule>(raw.clone()) {
                Ok(rule) => validate_rule(&path, rule, issues),
                Err(e) => {
                    issues.push(path, e.to_string());
                    None
                }
            }
        })
        .collect()
}

fn validate_rule(path: &str, rule: FileRule, issues: &mut ValidationIssues) -> Option<Rule> {
    let kind = required_string(
        rule.kind.clone(),
        format!("{path}.type"),
        "Rule type is required ('pattern' or 'collection')",
        issues,
    )?;
    match kind.as_str() {
        "pattern" => validate_pattern_rule(path, rule, issues),
        "collection" => validate_collection_rule(path, rule, issues),
        _ => {
            issues.push(
                format!("{path}.type"),
                "Invalid rule type. Must be 'pattern' or 'collection'",
            );
            None
        }
    }
}

fn validate_pattern_rule(path: &str, rule: FileRule, issues: &mut ValidationIssues) -> Option<Rule> {
    let field = required_string(
        rule.field,
        format!("{path}.field"),
        "Field name is required",
        issues,
    );

    let pattern = match required_string(
        rule.pattern,
        format!("{path}.pattern"),
        "Pattern is required",
        issues,
    ) {
        None => None,
        Some(pattern) if Regex::new(&pattern).is_err() => {
            issues.push(
                format!("{path}.pattern"),
                "Invalid regular expression pattern",
            );
            None
        }
        Some(pattern) => Some(pattern),
    };

    let topic = validate_topic(path, rule.kafka_topic, issues);

    let rule = PatternRule::new(field?, &pattern?, topic?);
    match rule {
        Ok(rule) => Some(rule.into()),
        Err(e) => {
            issues.push(path.to_string(), e.to_string());
            None
        }
    }
}

fn validate_collection_rule(
    path: &str,
    rule: FileRule,
    issues: &mut ValidationIssues,
) -> Option<Rule> {
    let collections = match rule.collections {
        Field::Present(items) if !items.is_empty() => {
            let mut collections = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str().filter(|c| !c.is_empty()) {
                    Some(collection) => collections.push(collection.to_string()),
                    None => issues.push(
                        format!("{path}.collections[{i}]"),
                        "Collection must be a non-empty string",
                    ),
                }
            }
            (collections.len() == items.len()).then_some(collections)
        }
        _ => {
            issues.push(
                format!("{path}.collections"),
                "Collections must be a non-empty array of strings",
            );
            None
        }
    };

    let topic = validate_topic(path, rule.kafka_topic, issues);

    match CollectionRule::new(collections?, topic?) {
        Ok(rule) => Some(rule.into()),
        Err(e) => {
            issues.push(format!("{path}.collections"), e.to_string());
            None
        }
    }
}

fn validate_topic(
    path: &str,
    topic: Field<String>,
    issues: &mut ValidationIssues,
) -> Option<Topic> {
    let field = format!("{path}.kafkaTopic");
    let topic = required_string(topic, field.clone(), "Kafka topic is required", issues)?;
    match Topic::new(topic) {
        Ok(topic) => Some(topic),
        Err(_) => {
            issues.push(field, "Invalid Kafka topic name format");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skygrep_core::rules::RuleKind;
    use std::io::Write;

    const VALID: &str = r#"{
        "rules": [
            { "type": "pattern", "field": "text", "pattern": "cat", "kafkaTopic": "cats" },
            { "type": "collection", "collections": ["app.bsky.feed.like"], "kafkaTopic": "likes" }
        ],
        "kafka": { "brokers": ["localhost:9092"] },
        "jetstream": { "endpoint": "wss://jetstream2.us-east.bsky.network/subscribe" }
    }"#;

    fn issues(content: &str) -> Vec<String> {
        match parse_config(content) {
            Err(ConfigError::Invalid(issues)) => issues
                .0
                .into_iter()
                .map(|issue| format!("{}: {}", issue.field, issue.message))
                .collect(),
            other => panic!("expected validation issues, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_config_with_defaults() {
        let config = parse_config(VALID).unwrap();

        assert_eq!(config.rules.len(), 2);
        let kinds: Vec<RuleKind> = config.rules.iter().map(Rule::kind).collect();
        assert_eq!(kinds, [RuleKind::Pattern, RuleKind::Collection]);
        assert_eq!(config.kafka.brokers, ["localhost:9092"]);
        assert_eq!(config.kafka.retry, RetryPolicy::default());
        assert_eq!(
            config.jetstream.endpoint.as_str(),
            "wss://jetstream2.us-east.bsky.network/subscribe"
        );
        assert_eq!(config.health.stale_after, Duration::from_secs(300));
        assert!(!config.health.require_broker_connection);
        assert_eq!(config.shutdown.step_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_tuning_sections_override_defaults() {
        let config = parse_config(
            r#"{
                "rules": [{ "type": "collection", "collections": ["app.bsky.graph.follow"], "kafkaTopic": "follows" }],
                "kafka": { "brokers": ["kafka://broker-1"], "connectRetries": 2, "retryDelayMs": 250 },
                "jetstream": { "endpoint": "ws://localhost:6008/subscribe" },
                "health": { "staleAfterMs": 60000, "requireBrokerConnection": true },
                "shutdown": { "stepTimeoutMs": 1500 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.kafka.brokers, ["broker-1:9092"]);
        assert_eq!(
            config.kafka.retry,
            RetryPolicy::new(2, Duration::from_millis(250))
        );
        assert_eq!(config.health.stale_after, Duration::from_secs(60));
        assert!(config.health.require_broker_connection);
        assert_eq!(config.shutdown.step_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_all_issues_are_reported_together() {
        let found = issues(
            r#"{
                "rules": [
                    { "type": "pattern", "field": "", "pattern": "(unclosed", "kafkaTopic": "bad topic!" },
                    { "type": "collection", "collections": ["app.bsky.feed.like", ""] },
                    { "type": "regex" },
                    {}
                ],
                "kafka": { "brokers": [] },
                "jetstream": { "endpoint": "not a url" }
            }"#,
        );

        assert_eq!(
            found,
            [
                "kafka.brokers: At least one Kafka broker is required",
                "jetstream.endpoint: Invalid Jetstream endpoint URL: not a url",
                "rules[0].field: Field name is required",
                "rules[0].pattern: Invalid regular expression pattern",
                "rules[0].kafkaTopic: Invalid Kafka topic name format",
                "rules[1].collections[1]: Collection must be a non-empty string",
                "rules[1].kafkaTopic: Kafka topic is required",
                "rules[2].type: Invalid rule type. Must be 'pattern' or 'collection'",
                "rules[3].type: Rule type is required ('pattern' or 'collection')",
            ]
        );
    }

    #[test]
    fn test_wrongly_typed_sections_still_report_everything() {
        let found = issues(
            r#"{
                "kafka": null,
                "jetstream": { "endpoint": "not a url" },
                "health": "fast",
                "rules": [
                    { "type": "pattern", "field": "text", "pattern": "(", "kafkaTopic": "bad topic" }
                ]
            }"#,
        );
        assert_eq!(
            found,
            [
                "kafka.brokers: At least one Kafka broker is required",
                "jetstream.endpoint: Invalid Jetstream endpoint URL: not a url",
                "rules[0].pattern: Invalid regular expression pattern",
                "rules[0].kafkaTopic: Invalid Kafka topic name format",
                "health: Must be an object",
            ]
        );
    }

    #[test]
    fn test_wrongly_typed_values_are_issues() {
        let found = issues(
            r#"{
                "kafka": { "brokers": "localhost:9092", "connectRetries": "three", "retryDelayMs": -5 },
                "jetstream": { "endpoint": 42 },
                "shutdown": { "stepTimeoutMs": 0 },
                "rules": [
                    { "type": "pattern", "field": 5, "pattern": "(", "kafkaTopic": "bad topic" },
                    { "type": 1, "kafkaTopic": "ok" }
                ]
            }"#,
        );
        assert_eq!(
            found,
            [
                "kafka.brokers: Brokers must be an array",
                "jetstream.endpoint: Must be a string",
                "rules[0].field: Must be a string",
                "rules[0].pattern: Invalid regular expression pattern",
                "rules[0].kafkaTopic: Invalid Kafka topic name format",
                "rules[1].type: Must be a string",
                "kafka.connectRetries: Must be a positive integer",
                "kafka.retryDelayMs: Must be a non-negative integer",
                "shutdown.stepTimeoutMs: Must be greater than 0",
            ]
        );
    }

    #[test]
    fn test_each_broker_entry_is_checked() {
        let found = issues(
            r#"{
                "kafka": { "brokers": ["localhost:9092", 9092, "nohost"] },
                "jetstream": { "endpoint": "wss://x" },
                "rules": [{ "type": "collection", "collections": ["app.bsky.feed.like"], "kafkaTopic": "likes" }]
            }"#,
        );
        assert_eq!(
            found,
            [
                "kafka.brokers: Invalid broker URL: 9092",
                "kafka.brokers: Invalid broker URL: nohost",
            ]
        );
    }

    #[test]
    fn test_missing_sections() {
        let found = issues("{}");
        assert_eq!(
            found,
            [
                "kafka.brokers: At least one Kafka broker is required",
                "jetstream.endpoint: Jetstream endpoint is required",
                "rules: Rules must be an array",
            ]
        );

        let found = issues(
            r#"{ "rules": [], "kafka": { "brokers": ["localhost:9092"] }, "jetstream": { "endpoint": "wss://x" } }"#,
        );
        assert_eq!(found, ["rules: At least one rule is required"]);
    }

    #[test]
    fn test_error_message_lists_every_issue() {
        let Err(e) = parse_config("{}") else {
            panic!("expected an error");
        };
        assert_eq!(
            e.to_string(),
            "Invalid configuration:\n\
             - kafka.brokers: At least one Kafka broker is required\n\
             - jetstream.endpoint: Jetstream endpoint is required\n\
             - rules: Rules must be an array"
        );
    }

    #[test]
    fn test_non_object_and_malformed_json() {
        assert!(matches!(parse_config("[]"), Err(ConfigError::NotAnObject)));
        assert!(matches!(parse_config("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_parse_broker() {
        assert_eq!(parse_broker("localhost:9092").as_deref(), Some("localhost:9092"));
        assert_eq!(
            parse_broker("kafka://broker.internal:19092").as_deref(),
            Some("broker.internal:19092")
        );
        assert_eq!(parse_broker("kafka://broker").as_deref(), Some("broker:9092"));
        assert_eq!(parse_broker("localhost"), None);
        assert_eq!(parse_broker("localhost:http"), None);
        assert_eq!(parse_broker(":9092"), None);
        assert_eq!(parse_broker("file:///tmp/kafka"), None);
    }

    #[test]
    fn test_resolve_config_path_precedence() {
        let cli = Some(PathBuf::from("/etc/skygrep/cli.json"));
        assert_eq!(
            resolve_config_path(Some("/etc/skygrep/env.json".into()), cli.clone()),
            PathBuf::from("/etc/skygrep/env.json")
        );
        assert_eq!(
            resolve_config_path(Some(OsString::new()), cli.clone()),
            PathBuf::from("/etc/skygrep/cli.json")
        );
        assert_eq!(resolve_config_path(None, cli), PathBuf::from("/etc/skygrep/cli.json"));
        assert_eq!(resolve_config_path(None, None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(VALID.as_bytes()).unwrap();

        let config = ConfigLoader::new(file.path()).load().unwrap();
        assert_eq!(config.rules.len(), 2);

        let missing = ConfigLoader::new(file.path().with_extension("missing")).load();
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}

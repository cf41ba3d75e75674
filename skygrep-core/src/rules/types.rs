//! Rule definitions.

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest topic name Kafka accepts.
const MAX_TOPIC_LEN: usize = 249;

/// Errors raised while constructing rules.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid topic name {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: &'static str },

    #[error("field name is required")]
    EmptyField,

    #[error("pattern is required")]
    EmptyPattern,

    #[error("invalid regular expression pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("collections must be a non-empty list")]
    EmptyCollections,

    #[error("collection names must be non-empty")]
    EmptyCollectionName,
}

/// A broker topic name.
///
/// Non-empty, at most 249 characters of `[a-zA-Z0-9._-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(name: impl Into<String>) -> Result<Self, RuleError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("topic is required")
        } else if name.len() > MAX_TOPIC_LEN {
            Some("longer than 249 characters")
        } else if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            Some("only alphanumerics, '.', '_' and '-' are allowed")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(RuleError::InvalidTopic { topic: name, reason }),
            None => Ok(Self(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Discriminant of [`Rule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Pattern,
    Collection,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::Pattern => write!(f, "pattern"),
            RuleKind::Collection => write!(f, "collection"),
        }
    }
}

/// Matches when a string field of the record payload contains a match of
/// the pattern.
#[derive(Debug, Clone)]
pub struct PatternRule {
    field: String,
    pattern: Regex,
    topic: Topic,
}

impl PatternRule {
    pub fn new(field: impl Into<String>, pattern: &str, topic: Topic) -> Result<Self, RuleError> {
        let field = field.into();
        if field.is_empty() {
            return Err(RuleError::EmptyField);
        }
        if pattern.is_empty() {
            return Err(RuleError::EmptyPattern);
        }
        Ok(Self {
            field,
            pattern: Regex::new(pattern)?,
            topic,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Absent and non-string fields never match.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        payload
            .get(&self.field)
            .and_then(Value::as_str)
            .is_some_and(|value| self.pattern.is_match(value))
    }
}

/// Matches when the commit belongs to one of the listed collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRule {
    /// Deduplicated, declaration order.
    collections: Vec<String>,
    topic: Topic,
}

impl CollectionRule {
    pub fn new<I, S>(collections: I, topic: Topic) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for collection in collections {
            let collection = collection.into();
            if collection.is_empty() {
                return Err(RuleError::EmptyCollectionName);
            }
            if !unique.contains(&collection) {
                unique.push(collection);
            }
        }
        if unique.is_empty() {
            return Err(RuleError::EmptyCollections);
        }
        Ok(Self {
            collections: unique,
            topic,
        })
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn matches(&self, collection: &str) -> bool {
        self.collections.iter().any(|c| c == collection)
    }
}

/// A single matching rule bound to one output topic.
#[derive(Debug, Clone)]
pub enum Rule {
    Pattern(PatternRule),
    Collection(CollectionRule),
}

impl Rule {
    pub fn topic(&self) -> &Topic {
        match self {
            Rule::Pattern(rule) => &rule.topic,
            Rule::Collection(rule) => &rule.topic,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Pattern(_) => RuleKind::Pattern,
            Rule::Collection(_) => RuleKind::Collection,
        }
    }
}

impl From<PatternRule> for Rule {
    fn from(rule: PatternRule) -> Self {
        Rule::Pattern(rule)
    }
}

impl From<CollectionRule> for Rule {
    fn from(rule: CollectionRule) -> Self {
        Rule::Collection(rule)
    }
}

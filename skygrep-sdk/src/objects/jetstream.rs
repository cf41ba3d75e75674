//! Jetstream frame types.
//!
//! Jetstream pushes one JSON object per websocket text frame. The `kind`
//! field discriminates between repository commits and account/identity
//! updates:
//!
//! ```json
//! {"did":"did:plc:abc","time_us":1725911162329308,"kind":"commit",
//!  "commit":{"rev":"3l3qo2vutsw2b","operation":"create",
//!            "collection":"app.bsky.feed.like","rkey":"3l3qo2vuowo2b",
//!            "record":{"$type":"app.bsky.feed.like"},"cid":"bafyrei..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single frame received from a Jetstream subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JetstreamMessage {
    /// A repository record was created, updated or deleted.
    Commit(CommitMessage),
    /// An identity (handle / DID document) changed.
    Identity {
        did: String,
        time_us: i64,
        #[serde(default)]
        identity: Value,
    },
    /// An account status changed.
    Account {
        did: String,
        time_us: i64,
        #[serde(default)]
        account: Value,
    },
}

impl JetstreamMessage {
    /// Event-source timestamp of this frame in microseconds.
    pub fn time_us(&self) -> i64 {
        match self {
            JetstreamMessage::Commit(c) => c.time_us,
            JetstreamMessage::Identity { time_us, .. } => *time_us,
            JetstreamMessage::Account { time_us, .. } => *time_us,
        }
    }
}

/// Body of a `kind: "commit"` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub did: String,
    pub time_us: i64,
    pub commit: CommitData,
}

/// The commit itself. `record` and `cid` are absent on deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitData {
    #[serde(default)]
    pub rev: String,
    pub operation: CommitOperation,
    pub collection: String,
    pub rkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for CommitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitOperation::Create => write!(f, "create"),
            CommitOperation::Update => write!(f, "update"),
            CommitOperation::Delete => write!(f, "delete"),
        }
    }
}

//! Commit event definition.

use serde_json::{Map, Value};
use skygrep_sdk::objects::{CommitData, CommitMessage, JetstreamMessage};

pub use skygrep_sdk::objects::CommitOperation;

/// The collection that is always subscribed to and against which pattern
/// rules are evaluated.
pub const BASELINE_COLLECTION: &str = "app.bsky.feed.post";

/// One create/update/delete notification from the event source.
///
/// Read-only to the pipeline: matching and publishing only borrow it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    /// Actor that owns the repository.
    pub did: String,
    /// Collection (record NSID) the commit belongs to.
    pub collection: String,
    pub record_key: String,
    pub operation: CommitOperation,
    /// Record body. Empty for deletes.
    pub payload: Map<String, Value>,
    /// Source timestamp in microseconds, doubles as the resume cursor.
    pub time_us: i64,
    pub rev: String,
    pub cid: Option<String>,
}

impl CommitEvent {
    /// Whether the event belongs to the baseline collection.
    pub fn is_baseline(&self) -> bool {
        self.collection == BASELINE_COLLECTION
    }

    /// AT URI of the record, used as the broker message key.
    pub fn message_key(&self) -> String {
        format!("at://{}/{}/{}", self.did, self.collection, self.record_key)
    }

    /// Re-encode as a Jetstream commit frame.
    pub fn to_message(&self) -> JetstreamMessage {
        let record = match self.operation {
            CommitOperation::Delete if self.payload.is_empty() => None,
            _ => Some(self.payload.clone()),
        };
        JetstreamMessage::Commit(CommitMessage {
            did: self.did.clone(),
            time_us: self.time_us,
            commit: CommitData {
                rev: self.rev.clone(),
                operation: self.operation,
                collection: self.collection.clone(),
                rkey: self.record_key.clone(),
                record,
                cid: self.cid.clone(),
            },
        })
    }

    /// Serialized broker payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_message())
    }
}

impl From<CommitMessage> for CommitEvent {
    fn from(message: CommitMessage) -> Self {
        let CommitMessage {
            did,
            time_us,
            commit,
        } = message;
        Self {
            did,
            collection: commit.collection,
            record_key: commit.rkey,
            operation: commit.operation,
            payload: commit.record.unwrap_or_default(),
            time_us,
            rev: commit.rev,
            cid: commit.cid,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::commit;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_key_is_at_uri() {
        let event = commit("app.bsky.feed.like", json!({}));
        assert_eq!(
            event.message_key(),
            "at://did:plc:eygmaihciaxprqvxpfvl6flk/app.bsky.feed.like/3l3qo2vuowo2b"
        );
    }

    #[test]
    fn test_payload_is_jetstream_commit_frame() {
        let event = commit(BASELINE_COLLECTION, json!({ "text": "I love cats" }));
        let payload = event.to_payload().unwrap();
        let decoded: JetstreamMessage = serde_json::from_slice(&payload).unwrap();
        let JetstreamMessage::Commit(message) = decoded else {
            panic!("expected commit frame");
        };
        assert_eq!(CommitEvent::from(message), event);
    }

    #[test]
    fn test_delete_has_empty_payload() {
        let message = CommitMessage {
            did: "did:plc:abc".into(),
            time_us: 1,
            commit: CommitData {
                rev: "r".into(),
                operation: CommitOperation::Delete,
                collection: BASELINE_COLLECTION.into(),
                rkey: "k".into(),
                record: None,
                cid: None,
            },
        };
        let event = CommitEvent::from(message);
        assert!(event.payload.is_empty());
        assert!(event.is_baseline());
    }
}

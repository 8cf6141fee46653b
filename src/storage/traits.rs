//! Storage trait definitions and the multi-operation batch type.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::Result;

/// One operation inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    /// Replace the document stored at `key`
    Set { key: String, value: Value },
    /// Store `value` at `key` only if the key holds nothing yet
    SetIfAbsent { key: String, value: Value },
    /// Replace the value at dotted `field` inside the document at `key`
    SetField { key: String, field: String, value: Value },
    /// Add `member` to the set stored at `key`
    SetAdd { key: String, member: String },
    /// Add `by` to the integer at dotted `field` inside the document at `key`
    Increment { key: String, field: String, by: i64 },
    /// Deliver `message` to the subscribers of `channel`
    Publish { channel: String, message: String },
}

impl Op {
    /// Whether the operation changes stored state (publishes do not)
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Op::Publish { .. })
    }
}

/// Operations applied all-or-nothing by `MetadataStore::exec`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.ops.push(Op::Set {
            key: key.into(),
            value,
        });
        self
    }

    /// Serialize `record` and set it at `key`.
    pub fn set_record<T: Serialize>(self, key: impl Into<String>, record: &T) -> Result<Self> {
        let value = serde_json::to_value(record)?;
        Ok(self.set(key, value))
    }

    /// Serialize `record` and store it at `key` unless the key is already taken.
    pub fn set_if_absent<T: Serialize>(mut self, key: impl Into<String>, record: &T) -> Result<Self> {
        self.ops.push(Op::SetIfAbsent {
            key: key.into(),
            value: serde_json::to_value(record)?,
        });
        Ok(self)
    }

    /// Serialize `value` into the dotted `field` of the document at `key`.
    pub fn set_field<T: Serialize>(mut self, key: impl Into<String>, field: impl Into<String>, value: &T) -> Result<Self> {
        self.ops.push(Op::SetField {
            key: key.into(),
            field: field.into(),
            value: serde_json::to_value(value)?,
        });
        Ok(self)
    }

    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(Op::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn increment(mut self, key: impl Into<String>, field: impl Into<String>, by: i64) -> Self {
        self.ops.push(Op::Increment {
            key: key.into(),
            field: field.into(),
            by,
        });
        self
    }

    pub fn publish(mut self, channel: impl Into<String>, message: impl Into<String>) -> Self {
        self.ops.push(Op::Publish {
            channel: channel.into(),
            message: message.into(),
        });
        self
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Keyed document store with sets, atomic counters and pub/sub.
///
/// Every operation on a store that is not connected fails immediately with
/// `VizregError::StorageUnavailable`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Establish the connection. Connecting an already connected store is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Drop the connection and close every subscription. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Get the document stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Members of the set at `key` (empty if the set does not exist).
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Atomically add `by` to a numeric field and return the new value.
    async fn increment(&self, key: &str, field: &str, by: i64) -> Result<i64>;

    /// Apply every operation in `batch` atomically.
    async fn exec(&self, batch: Batch) -> Result<()>;

    /// Receive messages published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>>;

    /// Replace the document stored at `key`.
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.exec(Batch::new().set(key, value)).await
    }

    /// Add a member to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> Result<()> {
        self.exec(Batch::new().set_add(key, member)).await
    }

    /// Publish a message on `channel`.
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        self.exec(Batch::new().publish(channel, message)).await
    }
}

/// Get the document at `key` deserialized as `T`.
pub async fn get_record<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: MetadataStore + ?Sized,
{
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Whole-file image storage addressed by relative path.
///
/// Reads and deletes never fail: a missing or unreadable image is reported as
/// absent, and deleting something already gone is fine.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` to `path`, replacing any existing file.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read the file at `path`, or None if it cannot be read.
    async fn read(&self, path: &str) -> Option<Vec<u8>>;

    /// Remove the file at `path` if it exists.
    async fn delete(&self, path: &str);

    async fn exists(&self, path: &str) -> bool {
        self.read(path).await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_batch_builder_preserves_order() {
        let batch = Batch::new()
            .set("a", json!({"n": 1}))
            .set_add("s", "a")
            .increment("a", "n", 2)
            .publish("ch", "hello");

        assert_eq!(batch.len(), 4);
        assert!(matches!(batch.ops()[0], Op::Set { .. }));
        assert!(matches!(batch.ops()[1], Op::SetAdd { .. }));
        assert!(matches!(batch.ops()[2], Op::Increment { by: 2, .. }));
        assert!(matches!(batch.ops()[3], Op::Publish { .. }));
    }

    #[test]
    fn test_set_record_serializes() {
        #[derive(Serialize)]
        struct Doc {
            id: String,
        }
        let batch = Batch::new().set_record("k", &Doc { id: "x".into() }).unwrap();
        assert_eq!(
            batch.ops()[0],
            Op::Set {
                key: "k".into(),
                value: json!({"id": "x"})
            }
        );
    }

    #[test]
    fn test_op_is_mutation() {
        assert!(Op::SetAdd { key: "k".into(), member: "m".into() }.is_mutation());
        assert!(!Op::Publish { channel: "c".into(), message: "m".into() }.is_mutation());
    }

    #[test]
    fn test_op_serialization_is_tagged() {
        let op = Op::Increment {
            key: "run".into(),
            field: "summary.finished".into(),
            by: 1,
        };
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "increment");
        assert_eq!(value["field"], "summary.finished");
    }

    #[test]
    fn test_set_field_serializes_value() {
        let batch = Batch::new()
            .set_if_absent("run", &json!({"summary": {}}))
            .unwrap()
            .set_field("run", "reason", &Some("passed"))
            .unwrap();
        assert!(matches!(batch.ops()[0], Op::SetIfAbsent { .. }));
        assert_eq!(
            batch.ops()[1],
            Op::SetField {
                key: "run".into(),
                field: "reason".into(),
                value: json!("passed")
            }
        );
        assert!(batch.ops()[1].is_mutation());
    }

    #[test]
    fn test_empty_batch() {
        assert!(Batch::new().is_empty());
    }
}

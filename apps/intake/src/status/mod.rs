//! Upload status store.
//!
//! One key per upload (`upload:<id>`) holding the JSON-encoded
//! `UploadRecord`, plus `upload:<id>:payload` holding the raw file so an
//! interrupted run can be resumed. Every write refreshes the TTL; expired
//! uploads are gone for good.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::intake::models::{Stage, UploadRecord};

pub mod memory;
pub mod redis_store;
pub mod tracker;

pub use memory::MemoryStatusStore;
pub use redis_store::RedisStatusStore;
pub use tracker::StatusTracker;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Corrupt record under '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Upload {0} not found")]
    Missing(String),

    #[error("Illegal stage transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("Upload {0} kept changing underneath the update")]
    Contended(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Shared, record-scoped status storage.
///
/// Records are read and written as whole objects. `compare_and_set` only
/// writes `next` when the stored record is still exactly `expected`.
#[async_trait]
pub trait UploadStatusStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError>;

    async fn set(&self, record: &UploadRecord) -> Result<(), StoreError>;

    async fn compare_and_set(
        &self,
        expected: &UploadRecord,
        next: &UploadRecord,
    ) -> Result<bool, StoreError>;

    async fn put_payload(&self, id: &str, payload: &[u8]) -> Result<(), StoreError>;

    async fn get_payload(&self, id: &str) -> Result<Option<Bytes>, StoreError>;
}

pub fn record_key(id: &str) -> String {
    format!("upload:{id}")
}

pub fn payload_key(id: &str) -> String {
    format!("upload:{id}:payload")
}

pub(crate) fn encode(record: &UploadRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|source| StoreError::Corrupt {
        key: record_key(&record.id),
        source,
    })
}

pub(crate) fn decode(key: &str, raw: &str) -> Result<UploadRecord, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

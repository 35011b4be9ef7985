use std::sync::Arc;

use tracing::{debug, warn};

use super::{StoreError, UploadStatusStore};
use crate::intake::models::{Stage, UploadRecord};

/// Attempts at a read-modify-CAS cycle before giving up on a contended record.
const MAX_CAS_ATTEMPTS: u32 = 5;

/// Typed read-modify-write access to upload records.
///
/// Every mutation re-reads the record, validates the stage transition and
/// writes through `compare_and_set`, so a concurrent writer can never make a
/// record go backwards.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn UploadStatusStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn UploadStatusStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UploadStatusStore> {
        &self.store
    }

    pub async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        self.store.get(id).await
    }

    /// Writes a brand-new record.
    pub async fn create(&self, record: &UploadRecord) -> Result<(), StoreError> {
        self.store.set(record).await
    }

    /// Applies `change` to the current record and commits it atomically.
    pub async fn update<F>(&self, id: &str, change: F) -> Result<UploadRecord, StoreError>
    where
        F: Fn(&UploadRecord) -> UploadRecord + Send + Sync,
    {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| StoreError::Missing(id.to_string()))?;
            let next = change(&current);

            if !current.stage.can_advance_to(next.stage) {
                return Err(StoreError::IllegalTransition {
                    from: current.stage,
                    to: next.stage,
                });
            }

            if self.store.compare_and_set(&current, &next).await? {
                debug!(
                    "Upload {id}: {} -> {} ({}%)",
                    current.stage, next.stage, next.progress
                );
                return Ok(next);
            }
            warn!("Upload {id}: concurrent update detected (attempt {attempt})");
        }
        Err(StoreError::Contended(id.to_string()))
    }

    pub async fn advance(&self, id: &str, stage: Stage) -> Result<UploadRecord, StoreError> {
        self.update(id, |r| r.entering(stage)).await
    }

    pub async fn fail(&self, id: &str, message: &str) -> Result<UploadRecord, StoreError> {
        self.update(id, |r| r.failed(message)).await
    }

    /// Appends a soft-failure note without changing the stage.
    pub async fn add_warning(&self, id: &str, message: &str) -> Result<UploadRecord, StoreError> {
        self.update(id, |r| {
            let mut next = r.entering(r.stage);
            next.warnings.push(message.to_string());
            next
        })
        .await
    }

    pub async fn set_file_url(&self, id: &str, url: &str) -> Result<UploadRecord, StoreError> {
        self.update(id, |r| {
            let mut next = r.entering(r.stage);
            next.file_url = Some(url.to_string());
            next
        })
        .await
    }
}

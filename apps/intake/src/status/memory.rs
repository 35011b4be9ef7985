use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::{decode, encode, payload_key, record_key, StoreError, UploadStatusStore};
use crate::intake::models::UploadRecord;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Process-local status store with the same TTL and CAS semantics as Redis.
/// Used by tests and single-instance development runs.
pub struct MemoryStatusStore {
    ttl: Duration,
    records: Mutex<HashMap<String, Entry<String>>>,
    payloads: Mutex<HashMap<String, Entry<Bytes>>>,
}

impl MemoryStatusStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(HashMap::new()),
            payloads: Mutex::new(HashMap::new()),
        }
    }

    fn lock<V>(
        map: &Mutex<HashMap<String, Entry<V>>>,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry<V>>>, StoreError> {
        map.lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn live<'a, V>(map: &'a mut HashMap<String, Entry<V>>, key: &str) -> Option<&'a V> {
        if map.get(key).is_some_and(|e| e.expires_at <= Instant::now()) {
            map.remove(key);
        }
        map.get(key).map(|e| &e.value)
    }

    /// Drops every expired entry, then stores `entry` under `key`.
    fn insert<V>(map: &mut HashMap<String, Entry<V>>, key: String, entry: Entry<V>) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
        map.insert(key, entry);
    }

    /// Number of stored records and payloads, expired ones included.
    #[cfg(test)]
    pub fn entry_counts(&self) -> (usize, usize) {
        let records = Self::lock(&self.records).map_or(0, |m| m.len());
        let payloads = Self::lock(&self.payloads).map_or(0, |m| m.len());
        (records, payloads)
    }

    fn entry<V>(&self, value: V) -> Entry<V> {
        Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        }
    }
}

#[async_trait]
impl UploadStatusStore for MemoryStatusStore {
    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        let key = record_key(id);
        let mut records = Self::lock(&self.records)?;
        Self::live(&mut records, &key)
            .map(|raw| decode(&key, raw))
            .transpose()
    }

    async fn set(&self, record: &UploadRecord) -> Result<(), StoreError> {
        let raw = encode(record)?;
        let entry = self.entry(raw);
        Self::insert(&mut *Self::lock(&self.records)?, record_key(&record.id), entry);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        expected: &UploadRecord,
        next: &UploadRecord,
    ) -> Result<bool, StoreError> {
        let expected_raw = encode(expected)?;
        let next_raw = encode(next)?;
        let key = record_key(&next.id);
        let mut records = Self::lock(&self.records)?;
        if Self::live(&mut records, &key) != Some(&expected_raw) {
            return Ok(false);
        }
        let entry = self.entry(next_raw);
        Self::insert(&mut records, key, entry);
        Ok(true)
    }

    async fn put_payload(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        let entry = self.entry(Bytes::copy_from_slice(payload));
        Self::insert(&mut *Self::lock(&self.payloads)?, payload_key(id), entry);
        Ok(())
    }

    async fn get_payload(&self, id: &str) -> Result<Option<Bytes>, StoreError> {
        let mut payloads = Self::lock(&self.payloads)?;
        Ok(Self::live(&mut payloads, &payload_key(id)).cloned())
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::info;

use super::{decode, encode, payload_key, record_key, StoreError, UploadStatusStore};
use crate::intake::models::UploadRecord;

/// Atomically replaces KEYS[1] with ARGV[2] (TTL ARGV[3]) iff it currently equals ARGV[1].
const COMPARE_AND_SET: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[3])
  return 1
end
return 0
"#;

/// Redis-backed status store. Works against any Redis-protocol KV service.
pub struct RedisStatusStore {
    conn: MultiplexedConnection,
    cas: Script,
    ttl_secs: u64,
}

impl RedisStatusStore {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Redis status store connected (ttl={ttl_secs}s)");
        Ok(Self {
            conn,
            cas: Script::new(COMPARE_AND_SET),
            ttl_secs,
        })
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UploadStatusStore for RedisStatusStore {
    async fn get(&self, id: &str) -> Result<Option<UploadRecord>, StoreError> {
        let key = record_key(id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        raw.map(|raw| decode(&key, &raw)).transpose()
    }

    async fn set(&self, record: &UploadRecord) -> Result<(), StoreError> {
        let value = encode(record)?;
        self.set_with_ttl(&record_key(&record.id), value.as_bytes())
            .await
    }

    async fn compare_and_set(
        &self,
        expected: &UploadRecord,
        next: &UploadRecord,
    ) -> Result<bool, StoreError> {
        let expected_raw = encode(expected)?;
        let next_raw = encode(next)?;
        let mut conn = self.conn.clone();
        let swapped: i32 = self
            .cas
            .key(record_key(&next.id))
            .arg(expected_raw)
            .arg(next_raw)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn put_payload(&self, id: &str, payload: &[u8]) -> Result<(), StoreError> {
        self.set_with_ttl(&payload_key(id), payload).await
    }

    async fn get_payload(&self, id: &str) -> Result<Option<Bytes>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(payload_key(id))
            .query_async(&mut conn)
            .await?;
        Ok(raw.map(Bytes::from))
    }
}

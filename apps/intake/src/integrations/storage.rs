use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

/// URL recorded when the file could not be stored.
pub const PLACEHOLDER_URL: &str = "N/A";

const CACHE_CONTROL: &str = "public, max-age=31536000";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object storage upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under a key derived from `filename` and returns its public URL.
    async fn upload(&self, bytes: Bytes, filename: &str, mime: &str) -> Result<String, StorageError>;
}

/// S3-compatible object storage (Google Cloud Storage interop, MinIO, AWS).
pub struct S3ObjectStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3ObjectStorage {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base_url, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for S3ObjectStorage {
    async fn upload(&self, bytes: Bytes, filename: &str, mime: &str) -> Result<String, StorageError> {
        let key = object_key(filename, Utc::now());
        let size = bytes.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(mime)
            .cache_control(CACHE_CONTROL)
            .send()
            .await
            .map_err(|e| StorageError::Upload(DisplayErrorContext(&e).to_string()))?;

        info!("Uploaded {size} bytes to {}/{}", self.bucket, key);
        Ok(self.public_url(&key))
    }
}

/// `<unix-millis>-<filename>` with every character outside `[A-Za-z0-9.-]`
/// replaced by `-`.
pub fn object_key(filename: &str, at: DateTime<Utc>) -> String {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}-{}", at.timestamp_millis(), sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_object_key_sanitizes_filename() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            object_key("Jane Doe (CV)_v2.pdf", at),
            "1700000000123-Jane-Doe--CV--v2.pdf"
        );
    }

    #[test]
    fn test_object_key_replaces_non_ascii() {
        let at = Utc.timestamp_millis_opt(1).unwrap();
        assert_eq!(object_key("résumé.docx", at), "1-r-sum-.docx");
    }
}

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::storage::PLACEHOLDER_URL;
use crate::extraction::ParsedCv;
use crate::intake::models::UploadRecord;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Called once when a supervised run reaches a terminal stage. `cv` is
/// present when the run got past structuring.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_terminal(&self, record: &UploadRecord, cv: Option<&ParsedCv>);
}

/// Posts the final record to an external URL. Failures are logged only.
pub struct WebhookHook {
    client: Client,
    url: String,
}

impl WebhookHook {
    pub fn new(client: Client, url: String) -> Self {
        Self { client, url }
    }
}

pub fn webhook_payload(record: &UploadRecord, cv: Option<&ParsedCv>) -> Value {
    let processed_at = Utc::now().to_rfc3339();
    let parsed_name = cv.and_then(|cv| cv.personal_info.name.as_deref());
    let parsed_email = cv.and_then(|cv| cv.personal_info.email.as_deref());
    let stored = record
        .file_url
        .as_deref()
        .is_some_and(|url| url != PLACEHOLDER_URL);

    json!({
        "uploadId": record.id,
        "stage": record.stage,
        "progress": record.progress,
        "fileUrl": record.file_url,
        "fields": record.fields,
        "error": record.error,
        "processedAt": processed_at,
        "cvData": cv.map(|cv| json!({
            "personalInfo": cv.personal_info,
            "education": cv.education,
            "experience": cv.experience,
            "projects": cv.projects,
            "cvPublicLink": record.file_url,
        })),
        "metadata": {
            "applicantName": record.fields.name.as_deref().or(parsed_name),
            "email": record.fields.email.as_deref().or(parsed_email),
            "status": record.stage,
            "cvProcessed": cv.is_some(),
            "processedTimestamp": processed_at,
            "storageUploadSuccess": stored,
        },
    })
}

#[async_trait]
impl CompletionHook for WebhookHook {
    async fn on_terminal(&self, record: &UploadRecord, cv: Option<&ParsedCv>) {
        let result = self
            .client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(&webhook_payload(record, cv))
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(response) => info!(
                "Webhook for upload {} delivered ({})",
                record.id,
                response.status()
            ),
            Err(e) => warn!("Webhook for upload {} failed: {e}", record.id),
        }
    }
}

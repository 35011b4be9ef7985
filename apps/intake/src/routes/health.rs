use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::state::AppState;

/// GET /health
/// Returns service version and which optional integrations are configured.
/// Never exposes credential values.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "success": true,
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "timestamp": Utc::now().to_rfc3339(),
        "config": {
            "hasBucket": config.bucket_hint.is_some(),
            "hasStorageCredentials": config.storage.is_some(),
            "hasSheets": config.sheets.is_some(),
            "hasLlm": config.llm.is_some(),
            "hasEmail": config.email.is_some(),
            "hasWebhook": config.webhook_url.is_some(),
        }
    }))
}

mod config;
mod errors;
mod extraction;
mod intake;
mod integrations;
mod llm_client;
mod pipeline;
mod routes;
mod state;
mod status;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, StorageConfig};
use crate::extraction::{CvStructurer, HeuristicStructurer, LlmStructurer};
use crate::integrations::google_auth::{ServiceAccountAuth, SHEETS_SCOPE};
use crate::integrations::{
    CompletionHook, GoogleSheets, ResendNotifier, S3ObjectStorage, WebhookHook,
};
use crate::llm_client::LlmClient;
use crate::pipeline::{JobSupervisor, Pipeline, RetryPolicy};
use crate::routes::build_router;
use crate::state::AppState;
use crate::status::{MemoryStatusStore, RedisStatusStore, StatusTracker, UploadStatusStore};

/// `REDIS_URL` prefix selecting the in-process store for single-instance runs.
const MEMORY_STORE_SCHEME: &str = "memory://";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast when the status store is not configured)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV intake v{}", env!("CARGO_PKG_VERSION"));

    // Status store
    let store: Arc<dyn UploadStatusStore> = if config.redis_url.starts_with(MEMORY_STORE_SCHEME) {
        warn!("Using the in-process status store; records will not survive a restart");
        Arc::new(MemoryStatusStore::new(Duration::from_secs(config.status_ttl_secs)))
    } else {
        Arc::new(RedisStatusStore::connect(&config.redis_url, config.status_ttl_secs).await?)
    };
    let tracker = StatusTracker::new(store);

    let http = reqwest::Client::new();

    // Structuring backend
    let structurer: Arc<dyn CvStructurer> = match &config.llm {
        Some(llm_config) => {
            let llm = LlmClient::new(llm_config)?;
            info!("LLM structuring enabled (model: {})", llm.model());
            Arc::new(LlmStructurer::new(Arc::new(llm)))
        }
        None => {
            warn!("No LLM credentials configured; CVs will be structured heuristically");
            Arc::new(HeuristicStructurer)
        }
    };

    let mut pipeline = Pipeline::new(tracker.clone(), structurer)
        .with_retry(RetryPolicy::new(Duration::from_millis(config.retry_base_delay_ms)));

    // Object storage
    match &config.storage {
        Some(storage) => {
            let s3 = build_s3_client(storage).await;
            pipeline = pipeline.with_storage(Arc::new(S3ObjectStorage::new(
                s3,
                storage.bucket.clone(),
                storage.public_base_url.clone(),
            )));
            info!("Object storage initialized (bucket: {})", storage.bucket);
        }
        None => warn!("Object storage not configured; file URLs will be recorded as N/A"),
    }

    // Spreadsheet
    match &config.sheets {
        Some(sheets) => {
            let auth = ServiceAccountAuth::new(
                http.clone(),
                sheets.service_account.clone(),
                SHEETS_SCOPE,
            )?;
            pipeline = pipeline.with_sheets(Arc::new(GoogleSheets::new(
                http.clone(),
                auth,
                sheets.spreadsheet_id.clone(),
                sheets.tab.clone(),
            )));
            info!("Spreadsheet sink initialized (tab: {})", sheets.tab);
        }
        None => warn!("Spreadsheet not configured; rows will not be recorded"),
    }

    // Confirmation email
    match &config.email {
        Some(email) => {
            pipeline = pipeline.with_notifier(Arc::new(ResendNotifier::new(
                http.clone(),
                email.api_key.clone(),
                email.from.clone(),
            )));
            info!("Confirmation emails enabled");
        }
        None => warn!("Email not configured; confirmations will be skipped"),
    }

    let hook = config.webhook_url.as_ref().map(|url| {
        info!("Completion webhook enabled");
        Arc::new(WebhookHook::new(http.clone(), url.clone())) as Arc<dyn CompletionHook>
    });

    let supervisor = JobSupervisor::new(
        Arc::new(pipeline),
        hook,
        Duration::from_secs(config.pipeline_timeout_secs),
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        tracker,
        supervisor,
    };

    // Build router
    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client for any S3-compatible endpoint (GCS interop, MinIO, AWS).
async fn build_s3_client(storage: &StorageConfig) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &storage.access_key_id,
        &storage.secret_access_key,
        None,
        None,
        "intake-static",
    );

    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(storage.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&storage.endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

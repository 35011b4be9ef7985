use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_STATUS_TTL_SECS: u64 = 3600;
const DEFAULT_PIPELINE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4o";
const DEFAULT_SHEET_TAB: &str = "Submissions";
const DEFAULT_EMAIL_FROM: &str = "CV Intake <onboarding@resend.dev>";

/// Application configuration loaded from environment variables.
///
/// Only the status store is mandatory. Every other collaborator is an
/// optional section; when its credentials are missing the matching pipeline
/// stage degrades instead of failing the request.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub rust_log: String,
    pub max_upload_bytes: usize,
    pub status_ttl_secs: u64,
    pub pipeline_timeout_secs: u64,
    pub retry_base_delay_ms: u64,
    pub llm: Option<LlmConfig>,
    pub storage: Option<StorageConfig>,
    pub sheets: Option<SheetsConfig>,
    pub email: Option<EmailConfig>,
    pub webhook_url: Option<String>,
    /// Bucket name seen even when storage credentials are incomplete; reported by /health.
    pub bucket_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub org_id: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub tab: String,
    pub service_account: ServiceAccount,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: String,
    pub from: String,
}

/// Google service-account identity used to sign OAuth2 assertions.
#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup: &lookup };

        let redis_url = env.require(&["REDIS_URL", "KV_URL"])?;
        let bucket_hint = env.first(&["GCS_BUCKET_NAME", "GOOGLE_STORAGE_BUCKET", "S3_BUCKET"]);

        Ok(Config {
            redis_url,
            port: env.parse("PORT", 8080)?,
            rust_log: env.first(&["RUST_LOG"]).unwrap_or_else(|| "info".to_string()),
            max_upload_bytes: env.parse("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            status_ttl_secs: env.parse("STATUS_TTL_SECS", DEFAULT_STATUS_TTL_SECS)?,
            pipeline_timeout_secs: env
                .parse("PIPELINE_TIMEOUT_SECS", DEFAULT_PIPELINE_TIMEOUT_SECS)?,
            retry_base_delay_ms: env.parse("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?,
            llm: llm_section(&env),
            storage: storage_section(&env, bucket_hint.clone()),
            sheets: sheets_section(&env)?,
            email: email_section(&env),
            webhook_url: env.first(&["WEBHOOK_URL"]),
            bucket_hint,
        })
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    /// First non-blank value among `keys`, in order.
    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| (self.lookup)(k))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    fn require(&self, keys: &[&str]) -> Result<String> {
        self.first(keys).ok_or_else(|| {
            anyhow!(
                "Required environment variable '{}' is not set",
                keys.join("' or '")
            )
        })
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.first(&[key]) {
            Some(raw) => raw
                .parse::<T>()
                .ok()
                .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
            None => Ok(default),
        }
    }
}

fn llm_section(env: &Env) -> Option<LlmConfig> {
    Some(LlmConfig {
        api_key: env.first(&["OPENAI_API_KEY"])?,
        org_id: env.first(&["OPENAI_ORG_ID"]),
        model: env
            .first(&["OPENAI_MODEL"])
            .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        base_url: env
            .first(&["OPENAI_BASE_URL"])
            .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
    })
}

fn storage_section(env: &Env, bucket: Option<String>) -> Option<StorageConfig> {
    let endpoint = env
        .first(&["S3_ENDPOINT"])
        .unwrap_or_else(|| DEFAULT_STORAGE_ENDPOINT.to_string());
    Some(StorageConfig {
        bucket: bucket?,
        access_key_id: env.first(&["S3_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"])?,
        secret_access_key: env.first(&["S3_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"])?,
        region: env
            .first(&["S3_REGION", "AWS_REGION"])
            .unwrap_or_else(|| "us-east-1".to_string()),
        public_base_url: env
            .first(&["STORAGE_PUBLIC_BASE_URL"])
            .unwrap_or_else(|| endpoint.clone())
            .trim_end_matches('/')
            .to_string(),
        endpoint,
    })
}

fn sheets_section(env: &Env) -> Result<Option<SheetsConfig>> {
    let Some(spreadsheet_id) = env.first(&["GOOGLE_SHEET_ID"]) else {
        return Ok(None);
    };
    let Some(service_account) = service_account(env)? else {
        return Ok(None);
    };
    Ok(Some(SheetsConfig {
        spreadsheet_id,
        tab: env
            .first(&["GOOGLE_SHEET_TAB"])
            .unwrap_or_else(|| DEFAULT_SHEET_TAB.to_string()),
        service_account,
    }))
}

/// Resolves service-account credentials: a JSON blob wins, discrete
/// variables fill whatever the blob did not provide.
fn service_account(env: &Env) -> Result<Option<ServiceAccount>> {
    if let Some(blob) = env.first(&["GCS_CREDENTIALS", "GOOGLE_CREDENTIALS"]) {
        let mut account: ServiceAccount = serde_json::from_str(&blob)
            .context("GCS_CREDENTIALS must be a service-account JSON document")?;
        account.private_key = normalize_private_key(&account.private_key);
        return Ok(Some(account));
    }

    let email = env.first(&[
        "GOOGLE_SERVICE_ACCOUNT_EMAIL",
        "GCP_CLIENT_EMAIL",
        "GOOGLE_CLIENT_EMAIL",
    ]);
    let key = env.first(&["GOOGLE_PRIVATE_KEY", "GCP_PRIVATE_KEY", "PRIVATE_KEY"]);
    Ok(match (email, key) {
        (Some(client_email), Some(key)) => Some(ServiceAccount {
            client_email,
            private_key: normalize_private_key(&key),
            token_uri: default_token_uri(),
        }),
        _ => None,
    })
}

fn email_section(env: &Env) -> Option<EmailConfig> {
    Some(EmailConfig {
        api_key: env.first(&["RESEND_API_KEY"])?,
        from: env
            .first(&["EMAIL_FROM"])
            .unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
    })
}

/// Strips wrapping quotes and expands literal `\n` sequences in a PEM key.
pub fn normalize_private_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed);
    unquoted.replace("\\n", "\n")
}

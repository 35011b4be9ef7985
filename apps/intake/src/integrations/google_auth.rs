//! Google service-account OAuth2: signs an RS256 JWT assertion with the
//! account's private key and exchanges it for a bearer token.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use ring::rand::SystemRandom;
use ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::config::ServiceAccount;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// A cached token is refreshed this long before it actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid service-account private key: {0}")]
    InvalidKey(String),

    #[error("Failed to sign JWT assertion")]
    Signing,

    #[error("Token exchange request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token exchange failed ({status}): {body}")]
    Exchange { status: u16, body: String },
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct ServiceAccountAuth {
    client: Client,
    account: ServiceAccount,
    key_pair: RsaKeyPair,
    scope: String,
    token: RwLock<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    /// Parses the PEM key up front so bad credentials fail at startup.
    pub fn new(client: Client, account: ServiceAccount, scope: &str) -> Result<Self, AuthError> {
        let pem = pem::parse(account.private_key.as_bytes())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        let key_pair = RsaKeyPair::from_pkcs8(pem.contents())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self {
            client,
            account,
            key_pair,
            scope: scope.to_string(),
            token: RwLock::new(None),
        })
    }

    /// Returns a valid access token, exchanging a new assertion when the
    /// cached one is missing or about to expire.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        {
            let token = self.token.read().await;
            if let Some(cached) = token.as_ref() {
                if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut token = self.token.write().await;
        // another task may have refreshed while we waited for the write lock
        if let Some(cached) = token.as_ref() {
            if cached.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(cached.access_token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let access_token = fresh.access_token.clone();
        *token = Some(CachedToken {
            access_token: fresh.access_token,
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        debug!(
            "Obtained Google access token for {} (expires in {}s)",
            self.account.client_email, fresh.expires_in
        );
        Ok(access_token)
    }

    async fn exchange(&self) -> Result<TokenResponse, AuthError> {
        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;
        let response = self
            .client
            .post(&self.account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Exchange {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    fn signed_assertion(&self, now: i64) -> Result<String, AuthError> {
        let claims = serde_json::json!({
            "iss": self.account.client_email,
            "scope": self.scope,
            "aud": self.account.token_uri,
            "iat": now,
            "exp": now + ASSERTION_LIFETIME_SECS,
        });
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        let signing_input = format!("{header}.{payload}");

        let mut signature = vec![0u8; self.key_pair.public().modulus_len()];
        self.key_pair
            .sign(
                &RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                signing_input.as_bytes(),
                &mut signature,
            )
            .map_err(|_| AuthError::Signing)?;

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(&signature)))
    }
}

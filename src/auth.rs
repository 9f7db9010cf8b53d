// OAuth2 client-credentials authentication against the Amadeus API

use crate::config::ApiCredentials;
use crate::supplier::TokenResponse;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info};

pub const TOKEN_PATH: &str = "/v1/security/oauth2/token";

// Tokens are treated as expired this many seconds before the server says so
pub const TOKEN_EXPIRY_SKEW_SECS: u64 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token request rejected: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Token request failed: {0}")]
    Network(String),

    #[error("Token response could not be decoded: {0}")]
    Malformed(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    // Build from the server-declared lifetime, minus the expiry skew
    pub fn from_lifetime(value: impl Into<String>, obtained_at: DateTime<Utc>, expires_in: u64) -> Self {
        // Lifetimes past what chrono can represent never expire
        let lifetime = expires_in.saturating_sub(TOKEN_EXPIRY_SKEW_SECS);
        let expires_at = i64::try_from(lifetime)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| obtained_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(value, expires_at)
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

// Never print the bearer value
impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    // Return the cached token while it is valid, otherwise fetch a new one.
    // Never retries internally.
    async fn access_token(&mut self) -> Result<AccessToken, AuthError>;

    // Drop the cached token so the next call re-authenticates
    fn invalidate(&mut self);
}

pub struct AmadeusAuth {
    client: Client,
    token_url: String,
    credentials: ApiCredentials,
    cached: Option<AccessToken>,
}

impl AmadeusAuth {
    pub fn new(client: Client, base_url: &str, credentials: ApiCredentials) -> Self {
        Self {
            client,
            token_url: format!("{}{}", base_url.trim_end_matches('/'), TOKEN_PATH),
            credentials,
            cached: None,
        }
    }

    pub fn cached(&self) -> Option<&AccessToken> {
        self.cached.as_ref()
    }

    async fn request_token(&self) -> Result<AccessToken, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.api_key.as_str()),
            ("client_secret", self.credentials.api_secret.as_str()),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Malformed(e.to_string()))?;
        debug!(
            expires_in = token.expires_in,
            token_type = token.token_type.as_deref().unwrap_or("unknown"),
            "Token response received"
        );

        Ok(AccessToken::from_lifetime(
            token.access_token,
            Utc::now(),
            token.expires_in,
        ))
    }
}

#[async_trait]
impl TokenProvider for AmadeusAuth {
    async fn access_token(&mut self) -> Result<AccessToken, AuthError> {
        if let Some(token) = &self.cached {
            if token.is_valid_at(Utc::now()) {
                return Ok(token.clone());
            }
            debug!(expired_at = %token.expires_at(), "Cached access token expired");
        }

        self.cached = None;
        let token = self.request_token().await?;
        info!(expires_at = %token.expires_at(), "Access token retrieved");
        self.cached = Some(token.clone());
        Ok(token)
    }

    fn invalidate(&mut self) {
        self.cached = None;
    }
}

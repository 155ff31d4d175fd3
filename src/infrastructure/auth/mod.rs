//! Authentication providers.
//!
//! Two variants behind one trait: a static API key and an OAuth bearer
//! token with proactive, single-flight refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::infrastructure::config::TokenStore;

/// Required prefix for static API keys.
const API_KEY_PREFIX: &str = "sk-ant-api";

/// Production token refresh endpoint.
pub const TOKEN_REFRESH_URL: &str = "https://console.anthropic.com/v1/oauth/token";

/// OAuth client id used for refresh grants.
pub const CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Refresh this long before expiry to absorb clock skew.
const REFRESH_BUFFER: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Token expired and refresh failed; re-authenticate")]
    TokenExpired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    OAuth,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::OAuth => "oauth",
        }
    }
}

/// Credentials handed to the inference client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// "api_key" or "bearer"
    pub auth_type: &'static str,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Polymorphic authentication contract.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current credentials, refreshing proactively when needed.
    async fn get_credentials(&self) -> Result<Credentials, AuthError>;

    /// Force-refresh; true on success. A no-op true for static keys.
    async fn refresh_credentials(&self) -> Result<bool, AuthError>;

    /// Whether the current credentials are usable right now.
    async fn is_valid(&self) -> bool;

    fn auth_method(&self) -> AuthMethod;

    /// Context window budget for this auth method, in tokens.
    fn context_limit(&self) -> u32;
}

/// Static API key provider.
pub struct ApiKeyAuthProvider {
    api_key: String,
}

impl ApiKeyAuthProvider {
    /// Fails on an empty key or one without the `sk-ant-api` prefix.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AuthError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AuthError::InvalidApiKey("key is empty".to_string()));
        }
        if !api_key.starts_with(API_KEY_PREFIX) {
            return Err(AuthError::InvalidApiKey(format!(
                "key must start with {API_KEY_PREFIX}"
            )));
        }
        Ok(Self { api_key })
    }
}

#[async_trait]
impl AuthProvider for ApiKeyAuthProvider {
    async fn get_credentials(&self) -> Result<Credentials, AuthError> {
        Ok(Credentials {
            auth_type: "api_key",
            value: self.api_key.clone(),
            expires_at: None,
        })
    }

    async fn refresh_credentials(&self) -> Result<bool, AuthError> {
        Ok(true)
    }

    async fn is_valid(&self) -> bool {
        true
    }

    fn auth_method(&self) -> AuthMethod {
        AuthMethod::ApiKey
    }

    fn context_limit(&self) -> u32 {
        1_000_000
    }
}

/// Mutable token state behind the provider.
struct TokenState {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// OAuth provider with automatic token refresh.
///
/// - Proactive refresh 5 minutes before expiry.
/// - Single-flight: concurrent refreshes serialize on one lock, and the
///   second caller revalidates after acquiring it and skips the network
///   round-trip when the token is already fresh.
/// - Up to 3 attempts with exponential backoff for transient errors;
///   `Retry-After` honored on 429; a 401 means the refresh token is dead
///   and retrying stops immediately.
/// - Rotated refresh tokens are adopted and persisted via the token store.
pub struct OAuthAuthProvider {
    state: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
    token_store: Arc<dyn TokenStore>,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl OAuthAuthProvider {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        token_store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            state: RwLock::new(TokenState {
                access_token: access_token.into(),
                refresh_token: refresh_token.into(),
                expires_at,
            }),
            refresh_lock: Mutex::new(()),
            token_store,
            http: reqwest::Client::new(),
            token_url: TOKEN_REFRESH_URL.to_string(),
            client_id: CLIENT_ID.to_string(),
        }
    }

    /// Override the token endpoint (tests point this at a mock server).
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Interpret a possibly-naive timestamp as UTC, warning when the
    /// offset had to be assumed.
    pub fn normalize_expiry(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
            warn!(raw, "expires_at has no timezone, assuming UTC");
            return Some(naive.and_utc());
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            warn!(raw, "expires_at has no timezone, assuming UTC");
            return Some(naive.and_utc());
        }
        None
    }

    async fn is_expired(&self) -> bool {
        let state = self.state.read().await;
        Utc::now() >= state.expires_at
    }

    async fn is_near_expiry(&self) -> bool {
        let state = self.state.read().await;
        Utc::now() >= state.expires_at - REFRESH_BUFFER
    }

    /// Refresh with single-flight semantics.
    async fn refresh_inner(&self, force: bool) -> Result<bool, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Double-checked: another caller may have refreshed while we
        // waited on the lock.
        if !force && !self.is_expired().await && !self.is_near_expiry().await {
            debug!("token already refreshed by another caller");
            return Ok(true);
        }

        for attempt in 0..3u32 {
            let refresh_token = self.state.read().await.refresh_token.clone();
            let body = serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": self.client_id,
            });

            let response = self
                .http
                .post(&self.token_url)
                .json(&body)
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 401 {
                        error!("refresh token expired or revoked");
                        return Ok(false);
                    }

                    if status.as_u16() == 429 && attempt < 2 {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(retry_after, attempt = attempt + 1, "token refresh rate limited");
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }

                    if !status.is_success() {
                        error!(status = %status, attempt = attempt + 1, "token refresh http error");
                        if attempt == 2 {
                            return Ok(false);
                        }
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                        continue;
                    }

                    let payload: RefreshResponse = response.json().await.map_err(|e| {
                        AuthError::RefreshFailed(format!("bad refresh response: {e}"))
                    })?;

                    let rotated = payload.refresh_token.is_some();
                    let expires_at = Utc::now() + chrono::Duration::seconds(payload.expires_in);

                    {
                        let mut state = self.state.write().await;
                        state.access_token = payload.access_token.clone();
                        if let Some(new_refresh) = payload.refresh_token {
                            state.refresh_token = new_refresh;
                        }
                        state.expires_at = expires_at;
                    }

                    let state = self.state.read().await;
                    if let Err(e) = self
                        .token_store
                        .set_oauth_token(&state.access_token, &state.refresh_token, expires_at)
                        .await
                    {
                        warn!(error = %e, "failed to persist refreshed tokens");
                    }

                    info!(expires_at = %expires_at, rotated, "oauth token refreshed");
                    return Ok(true);
                }
                Err(e) => {
                    error!(error = %e, attempt = attempt + 1, "token refresh request failed");
                    if attempt == 2 {
                        return Ok(false);
                    }
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }

        Ok(false)
    }
}

#[async_trait]
impl AuthProvider for OAuthAuthProvider {
    async fn get_credentials(&self) -> Result<Credentials, AuthError> {
        if self.is_near_expiry().await {
            let state = self.state.read().await;
            info!(
                expires_at = %state.expires_at,
                "proactively refreshing oauth token"
            );
            drop(state);
            self.refresh_inner(false).await?;
        }

        if !self.is_valid().await {
            return Err(AuthError::TokenExpired);
        }

        let state = self.state.read().await;
        Ok(Credentials {
            auth_type: "bearer",
            value: state.access_token.clone(),
            expires_at: Some(state.expires_at),
        })
    }

    async fn refresh_credentials(&self) -> Result<bool, AuthError> {
        self.refresh_inner(true).await
    }

    async fn is_valid(&self) -> bool {
        let state = self.state.read().await;
        !state.access_token.is_empty() && Utc::now() < state.expires_at
    }

    fn auth_method(&self) -> AuthMethod {
        AuthMethod::OAuth
    }

    fn context_limit(&self) -> u32 {
        200_000
    }
}

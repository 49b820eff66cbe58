use crate::error::{ApiError, ApiResult, Error};
use crate::session::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

/// Access-token lifetime assumed when the provider omits one
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Delegated-access credential stored per session
///
/// Mutated only through [`Credential::issue`], [`Credential::refreshed`] and
/// [`Credential::invalidate`]; the Token Manager writes every mutation back
/// to the session store immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp after which the access token must not be used
    pub expires_at: i64,
    /// Set when a refresh attempt failed; cleared only by re-authentication
    #[serde(default)]
    pub refresh_failed: bool,
}

impl Credential {
    /// Build a fresh credential from a sign-in token response
    pub fn issue(token: TokenResponse, now: i64) -> Result<Self, Error> {
        let refresh_token = token
            .refresh_token
            .ok_or_else(|| Error::Identity("Provider did not issue a refresh token".to_string()))?;

        Ok(Self {
            access_token: token.access_token,
            refresh_token,
            expires_at: now + token.expires_in,
            refresh_failed: false,
        })
    }

    /// Whether the access token is past its recorded expiry
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Apply a successful refresh: new access token, recomputed expiry, and
    /// the old refresh token retained unless the provider issued a new one
    pub fn refreshed(&self, token: TokenResponse, now: i64) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token
                .refresh_token
                .unwrap_or_else(|| self.refresh_token.clone()),
            expires_at: now + token.expires_in,
            refresh_failed: false,
        }
    }

    /// Mark the credential unusable after a failed refresh
    pub fn invalidate(&self) -> Self {
        Self {
            refresh_failed: true,
            ..self.clone()
        }
    }
}

/// Token payload returned by the identity provider
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// OAuth token operations against the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Exchange an authorization code for tokens (sign-in)
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, String>;

    /// Trade a refresh token for a new access token
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, String>;
}

/// Google OAuth implementation of [`IdentityProvider`]
pub struct GoogleIdentityProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl GoogleIdentityProvider {
    pub fn new(
        client: Client,
        token_url: String,
        client_id: String,
        client_secret: String,
        redirect_url: String,
    ) -> Self {
        Self {
            client,
            token_url,
            client_id,
            client_secret,
            redirect_url,
        }
    }

    /// Post a form to the token endpoint and parse the token fields
    async fn request_token(&self, params: &[(&str, String)]) -> Result<TokenResponse, String> {
        let response = self
            .client
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| format!("Token request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error response".to_string());
            return Err(format!("Token endpoint returned HTTP {} - {}", status, error_body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse token response: {}", e))?;

        let access_token = payload
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or("Token response missing 'access_token' field")?
            .to_string();

        let refresh_token = payload
            .get("refresh_token")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());

        let expires_in = payload
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        Ok(TokenResponse {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, String> {
        self.request_token(&[
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("code", code.to_string()),
            ("redirect_uri", self.redirect_url.clone()),
            ("grant_type", "authorization_code".to_string()),
        ])
        .await
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse, String> {
        self.request_token(&[
            ("client_id", self.client_id.clone()),
            ("client_secret", self.client_secret.clone()),
            ("refresh_token", refresh_token.to_string()),
            ("grant_type", "refresh_token".to_string()),
        ])
        .await
    }
}

/// Owns the credential lifecycle for all sessions
#[derive(Clone)]
pub struct TokenManager {
    sessions: Arc<dyn SessionStore>,
    identity: Arc<dyn IdentityProvider>,
}

impl TokenManager {
    pub fn new(sessions: Arc<dyn SessionStore>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { sessions, identity }
    }

    /// Return a credential that is valid right now, refreshing it first if
    /// its expiry has passed
    ///
    /// A credential whose last refresh failed keeps reporting
    /// `RefreshFailed` until the user signs in again; refresh is never
    /// retried within the same request.
    pub async fn get_valid_credential(&self, session_id: &str) -> ApiResult<Credential> {
        let credential = self
            .sessions
            .get(session_id)
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::Unauthenticated)?;

        if credential.refresh_failed {
            return Err(ApiError::RefreshFailed);
        }

        let now = Utc::now().timestamp();
        if !credential.is_expired(now) {
            return Ok(credential);
        }

        info!("Access token expired, refreshing");
        match self
            .identity
            .refresh_access_token(&credential.refresh_token)
            .await
        {
            Ok(token) => {
                let refreshed = credential.refreshed(token, now);
                self.sessions
                    .put(session_id, &refreshed)
                    .await
                    .map_err(ApiError::Internal)?;
                Ok(refreshed)
            }
            Err(detail) => {
                error!("Token refresh failed: {}", detail);
                let invalidated = credential.invalidate();
                if let Err(e) = self.sessions.put(session_id, &invalidated).await {
                    error!("Failed to persist invalidated credential: {}", e);
                }
                Err(ApiError::RefreshFailed)
            }
        }
    }

    /// Exchange a sign-in authorization code and persist the new credential
    /// under the given session id
    pub async fn sign_in(&self, session_id: &str, code: &str) -> ApiResult<Credential> {
        let token = self
            .identity
            .exchange_code(code)
            .await
            .map_err(ApiError::Internal)?;

        let credential = Credential::issue(token, Utc::now().timestamp())
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        self.sessions
            .put(session_id, &credential)
            .await
            .map_err(ApiError::Internal)?;

        Ok(credential)
    }

    /// Destroy the session's credential (sign-out)
    pub async fn sign_out(&self, session_id: &str) -> ApiResult<()> {
        self.sessions
            .remove(session_id)
            .await
            .map_err(ApiError::Internal)
    }
}

//! Supabase (GoTrue) auth adapter.
//!
//! Thin HTTP wrapper over `{SUPABASE_URL}/auth/v1`. Response decoding lives in
//! pure `parse_*` functions for testability.
//!
//! SESSION PERSISTENCE
//! ===================
//! The signed-in session is cached in memory and mirrored into the local
//! store under `PROVIDER_SESSION_KEY`, so a restarted process can pick it up
//! again. A stored session close to expiry is refreshed before being handed
//! out; a refresh the provider rejects clears it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AuthChangeEvent, AuthChangeReceiver, AuthEventHub, AuthResponse, IdentityProvider, ProviderError};
use super::{ProviderSession, ProviderUser};
use crate::config::SupabaseConfig;
use crate::storage::{LocalStore, PROVIDER_SESSION_KEY};

/// Refresh this many seconds before the access token actually expires.
const EXPIRY_LEEWAY_SECS: i64 = 30;

// =============================================================================
// CLIENT
// =============================================================================

pub struct SupabaseAuth {
    http: reqwest::Client,
    auth_url: String,
    anon_key: String,
    store: Arc<dyn LocalStore>,
    current: Mutex<Option<ProviderSession>>,
    events: AuthEventHub,
}

impl SupabaseAuth {
    /// Build the adapter and load any session left in `store` by a previous run.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &SupabaseConfig, store: Arc<dyn LocalStore>) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| ProviderError::HttpClientBuild(e.to_string()))?;

        let current = store
            .get(PROVIDER_SESSION_KEY)
            .and_then(|raw| match serde_json::from_str::<ProviderSession>(&raw) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(error = %e, "discarding unreadable stored auth session");
                    None
                }
            });

        Ok(Self {
            http,
            auth_url: format!("{}/auth/v1", config.url),
            anon_key: config.anon_key.clone(),
            store,
            current: Mutex::new(current),
            events: AuthEventHub::new(),
        })
    }

    fn cached(&self) -> Option<ProviderSession> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn persist(&self, session: Option<&ProviderSession>) -> Result<(), ProviderError> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = session.cloned();
        let written = match session {
            Some(s) => {
                let raw = serde_json::to_string(s).map_err(|e| ProviderError::Storage(e.to_string()))?;
                self.store.set(PROVIDER_SESSION_KEY, &raw)
            }
            None => self.store.remove(PROVIDER_SESSION_KEY),
        };
        written.map_err(|e| ProviderError::Storage(e.to_string()))
    }

    fn request(&self, method: reqwest::Method, path: &str, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let token = bearer.unwrap_or(self.anon_key.as_str());
        self.http
            .request(method, format!("{}{path}", self.auth_url))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(parse_error(status, &text));
        }
        Ok(text)
    }

    async fn fetch_user(&self, access_token: &str) -> Result<ProviderUser, ProviderError> {
        let body = self
            .send(self.request(reqwest::Method::GET, "/user", Some(access_token)))
            .await?;
        parse_user(&body)
    }

    /// Exchange a refresh token for a new session and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the token or is unreachable.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        let request = self
            .request(reqwest::Method::POST, "/token?grant_type=refresh_token", None)
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let body = self.send(request).await?;
        let session = parse_session(&body, now_secs())?;
        self.persist(Some(&session))?;
        debug!(user_id = %session.user.id, "auth session refreshed");
        self.events.emit(AuthChangeEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    fn drop_session(&self) -> Result<(), ProviderError> {
        self.persist(None)?;
        self.events.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn get_current_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        let Some(mut session) = self.cached() else {
            return Ok(None);
        };

        if session.expires_within(now_secs(), EXPIRY_LEEWAY_SECS) {
            match self.refresh_session(&session.refresh_token).await {
                Ok(fresh) => session = fresh,
                Err(e) if is_rejection(&e) => {
                    warn!(error = %e, "stored auth session could not be refreshed");
                    self.drop_session()?;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        match self.fetch_user(&session.access_token).await {
            Ok(user) => {
                session.user = user;
                self.persist(Some(&session))?;
                Ok(Some(session))
            }
            Err(ProviderError::Response { status: 401 | 403, .. }) => {
                info!("stored auth session was revoked");
                self.drop_session()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// An auto-confirmed registration still returns its session, but it is
    /// neither stored nor announced: registering never signs the user in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError> {
        let request = self
            .request(reqwest::Method::POST, "/signup", None)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let body = self.send(request).await?;
        parse_signup(&body, now_secs())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError> {
        let request = self
            .request(reqwest::Method::POST, "/token?grant_type=password", None)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let body = self.send(request).await?;
        let session = parse_session(&body, now_secs())?;
        self.persist(Some(&session))?;
        self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(AuthResponse { user: Some(session.user.clone()), session: Some(session) })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let session = self.cached();
        self.drop_session()?;
        let Some(session) = session else {
            return Ok(());
        };
        let request = self.request(reqwest::Method::POST, "/logout", Some(&session.access_token));
        self.send(request).await.map(|_| ())
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), ProviderError> {
        let request = self
            .request(reqwest::Method::POST, "/recover", None)
            .json(&serde_json::json!({ "email": email }));
        self.send(request).await.map(|_| ())
    }

    async fn update_user_password(&self, password: &str) -> Result<(), ProviderError> {
        let mut session = self.cached().ok_or(ProviderError::NoSession)?;
        let request = self
            .request(reqwest::Method::PUT, "/user", Some(&session.access_token))
            .json(&serde_json::json!({ "password": password }));
        let body = self.send(request).await?;
        session.user = parse_user(&body)?;
        self.persist(Some(&session))?;
        self.events.emit(AuthChangeEvent::UserUpdated, Some(session));
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthChangeReceiver {
        self.events.subscribe()
    }

    fn discard_local_session(&self) -> Result<(), ProviderError> {
        self.persist(None)
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

fn is_rejection(err: &ProviderError) -> bool {
    matches!(err, ProviderError::InvalidCredentials(_) | ProviderError::Response { status: 400..=499, .. })
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: ProviderUser,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_session(json: &str, now: i64) -> Result<ProviderSession, ProviderError> {
    let token: TokenResponse = serde_json::from_str(json).map_err(|e| ProviderError::Parse(e.to_string()))?;
    let expires_at = token
        .expires_at
        .or_else(|| token.expires_in.map(|secs| now + secs));
    Ok(ProviderSession {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        user: token.user,
    })
}

fn parse_user(json: &str) -> Result<ProviderUser, ProviderError> {
    serde_json::from_str(json).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Registration answers with a full session when auto-confirm is on, and
/// with the bare user when email confirmation is pending.
fn parse_signup(json: &str, now: i64) -> Result<AuthResponse, ProviderError> {
    let value: serde_json::Value = serde_json::from_str(json).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if value.get("access_token").is_some() {
        let session = parse_session(json, now)?;
        return Ok(AuthResponse { user: Some(session.user.clone()), session: Some(session) });
    }
    let user: ProviderUser = serde_json::from_value(value).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(AuthResponse { user: Some(user), session: None })
}

fn parse_error(status: u16, body: &str) -> ProviderError {
    let ErrorBody { error, error_code, error_description, msg, message } =
        serde_json::from_str(body).unwrap_or_default();
    let invalid_credentials = matches!(
        error_code.as_deref().or(error.as_deref()),
        Some("invalid_grant" | "invalid_credentials")
    );
    let message = error_description
        .or(msg)
        .or(message)
        .or(error)
        .unwrap_or_else(|| if body.trim().is_empty() { format!("status {status}") } else { body.trim().to_owned() });

    if status == 400 && invalid_credentials {
        return ProviderError::InvalidCredentials(message);
    }
    ProviderError::Response { status, message }
}

#[cfg(test)]
#[path = "supabase_test.rs"]
mod tests;

//! Identity provider contract consumed by the session store.
//!
//! DESIGN
//! ======
//! The hosted auth service is an external collaborator. The store only sees
//! the narrow `IdentityProvider` trait below, so tests swap in an in-process
//! double and production wires the Supabase adapter in `supabase`.
//!
//! Change notifications are delivered over one unbounded channel per
//! subscriber. Senders whose receiver was dropped are pruned on the next
//! emit, so dropping the receiver is the unsubscribe.

pub mod supabase;

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

// =============================================================================
// ERROR
// =============================================================================

/// Failures reported by the identity provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Email/password pair rejected.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Transport-level failure (DNS, TLS, timeout).
    #[error("auth request failed: {0}")]
    Request(String),

    /// The provider answered with a non-success status.
    #[error("auth provider error (status {status}): {message}")]
    Response { status: u16, message: String },

    /// The provider answered with a body we could not decode.
    #[error("auth response parse failed: {0}")]
    Parse(String),

    /// The operation needs a signed-in session and there is none.
    #[error("no active session")]
    NoSession,

    /// The HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The provider session could not be persisted locally.
    #[error("session storage failed: {0}")]
    Storage(String),
}

// =============================================================================
// TYPES
// =============================================================================

/// Account as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verified provider session. `expires_at` is unix seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub user: ProviderUser,
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

impl ProviderSession {
    /// True once `now` is within `leeway_secs` of expiry.
    #[must_use]
    pub fn expires_within(&self, now: i64, leeway_secs: i64) -> bool {
        self.expires_at.is_some_and(|at| at - leeway_secs <= now)
    }
}

/// Result of sign-in or registration. Registration may return a user with no
/// session when the provider requires email confirmation first.
#[derive(Debug, Clone, Default)]
pub struct AuthResponse {
    pub user: Option<ProviderUser>,
    pub session: Option<ProviderSession>,
}

impl AuthResponse {
    /// The user from the session when present, else the bare user.
    #[must_use]
    pub fn user(&self) -> Option<&ProviderUser> {
        self.session.as_ref().map(|s| &s.user).or(self.user.as_ref())
    }
}

/// Email + password pair. `Debug` never prints the password.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One provider notification: what happened, and the session after it.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthChangeEvent,
    pub session: Option<ProviderSession>,
}

pub type AuthChangeReceiver = mpsc::UnboundedReceiver<AuthChange>;

// =============================================================================
// PROVIDER TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Existing valid session, refreshed if it was about to expire.
    async fn get_current_session(&self) -> Result<Option<ProviderSession>, ProviderError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    async fn reset_password_for_email(&self, email: &str) -> Result<(), ProviderError>;

    async fn update_user_password(&self, password: &str) -> Result<(), ProviderError>;

    /// Register a durable subscription. Notifications arrive in provider order.
    fn on_auth_state_change(&self) -> AuthChangeReceiver;

    /// Forget any locally held session without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the local copy cannot be removed.
    fn discard_local_session(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

// =============================================================================
// EVENT HUB
// =============================================================================

/// Fan-out of `AuthChange` notifications to every live subscriber.
#[derive(Debug, Default)]
pub struct AuthEventHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthChange>>>,
}

impl AuthEventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> AuthChangeReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn emit(&self, event: AuthChangeEvent, session: Option<ProviderSession>) {
        let change = AuthChange { event, session };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

//! In-process doubles for the identity provider and analytics sink.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::analytics::{AnalyticsError, AnalyticsSink, TrackEvent};
use crate::identity::{
    AuthChangeEvent, AuthChangeReceiver, AuthEventHub, AuthResponse, IdentityProvider, ProviderError, ProviderSession,
    ProviderUser,
};
use crate::session::SessionStore;
use crate::storage::MemoryStore;

pub const VALID_EMAIL: &str = "reader@example.com";
pub const VALID_PASSWORD: &str = "correct-horse";

#[must_use]
pub fn user(email: &str) -> ProviderUser {
    ProviderUser { id: Uuid::new_v4(), email: Some(email.to_owned()) }
}

#[must_use]
pub fn session_for(user: ProviderUser) -> ProviderSession {
    ProviderSession { access_token: "access".into(), refresh_token: "refresh".into(), expires_at: None, user }
}

// =============================================================================
// MockProvider
// =============================================================================

#[derive(Default)]
pub struct MockProvider {
    pub current: Mutex<Option<ProviderSession>>,
    pub account: Mutex<Option<ProviderUser>>,
    pub fail_lookup: AtomicBool,
    pub fail_sign_out: AtomicBool,
    pub confirm_on_sign_up: AtomicBool,
    pub lookup_calls: AtomicUsize,
    pub sign_in_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
    pub lookup_gate: Option<Arc<Notify>>,
    pub events: AuthEventHub,
}

impl MockProvider {
    /// Provider with one registered account (`VALID_EMAIL` / `VALID_PASSWORD`).
    #[must_use]
    pub fn new() -> Self {
        Self { account: Mutex::new(Some(user(VALID_EMAIL))), ..Self::default() }
    }

    /// Provider that already holds a signed-in session for the account.
    #[must_use]
    pub fn signed_in() -> Self {
        let provider = Self::new();
        let account = provider.account().unwrap();
        *provider.current.lock().unwrap() = Some(session_for(account));
        provider
    }

    /// Session lookups block until `gate.notify_one()`.
    #[must_use]
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self { lookup_gate: Some(gate), ..Self::new() }
    }

    #[must_use]
    pub fn account(&self) -> Option<ProviderUser> {
        self.account.lock().unwrap().clone()
    }

    pub fn emit(&self, event: AuthChangeEvent, session: Option<ProviderSession>) {
        self.events.emit(event, session);
    }
}

#[async_trait::async_trait]
impl IdentityProvider for MockProvider {
    async fn get_current_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.lookup_gate {
            gate.notified().await;
        }
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("connection refused".into()));
        }
        Ok(self.current.lock().unwrap().clone())
    }

    async fn sign_up(&self, email: &str, _password: &str) -> Result<AuthResponse, ProviderError> {
        if email == VALID_EMAIL {
            return Err(ProviderError::Response { status: 422, message: "User already registered".into() });
        }
        let new_user = user(email);
        let session = self
            .confirm_on_sign_up
            .load(Ordering::SeqCst)
            .then(|| session_for(new_user.clone()));
        Ok(AuthResponse { user: Some(new_user), session })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let account = self.account().filter(|a| a.email.as_deref() == Some(email));
        let Some(account) = account.filter(|_| password == VALID_PASSWORD) else {
            return Err(ProviderError::InvalidCredentials("Invalid login credentials".into()));
        };
        let session = session_for(account.clone());
        *self.current.lock().unwrap() = Some(session.clone());
        self.events.emit(AuthChangeEvent::SignedIn, Some(session.clone()));
        Ok(AuthResponse { user: Some(account), session: Some(session) })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("network unreachable".into()));
        }
        *self.current.lock().unwrap() = None;
        self.events.emit(AuthChangeEvent::SignedOut, None);
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), ProviderError> {
        if email.contains('@') {
            Ok(())
        } else {
            Err(ProviderError::Response { status: 400, message: "invalid email".into() })
        }
    }

    async fn update_user_password(&self, password: &str) -> Result<(), ProviderError> {
        if self.current.lock().unwrap().is_none() {
            return Err(ProviderError::NoSession);
        }
        if password.len() < 6 {
            return Err(ProviderError::Response { status: 422, message: "Password should be at least 6 characters".into() });
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthChangeReceiver {
        self.events.subscribe()
    }

    fn discard_local_session(&self) -> Result<(), ProviderError> {
        *self.current.lock().unwrap() = None;
        Ok(())
    }
}

// =============================================================================
// Analytics doubles
// =============================================================================

#[derive(Default)]
pub struct RecordingAnalytics {
    pub events: Mutex<Vec<TrackEvent>>,
}

impl RecordingAnalytics {
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.event.name()).collect()
    }
}

#[async_trait::async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn track(&self, event: TrackEvent) -> Result<(), AnalyticsError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct FailingAnalytics;

#[async_trait::async_trait]
impl AnalyticsSink for FailingAnalytics {
    async fn track(&self, _event: TrackEvent) -> Result<(), AnalyticsError> {
        Err(AnalyticsError::Request("analytics endpoint down".into()))
    }
}

// =============================================================================
// Store wiring
// =============================================================================

pub struct Harness {
    pub store: Arc<SessionStore>,
    pub provider: Arc<MockProvider>,
    pub analytics: Arc<RecordingAnalytics>,
    pub local: Arc<MemoryStore>,
}

#[must_use]
pub fn harness(provider: MockProvider) -> Harness {
    harness_with_local(provider, MemoryStore::new())
}

#[must_use]
pub fn harness_with_local(provider: MockProvider, local: MemoryStore) -> Harness {
    let provider = Arc::new(provider);
    let analytics = Arc::new(RecordingAnalytics::default());
    let local = Arc::new(local);
    let store = Arc::new(SessionStore::new(provider.clone(), analytics.clone(), local.clone()));
    Harness { store, provider, analytics, local }
}

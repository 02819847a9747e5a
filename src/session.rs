//! Session store: who is using this client right now.
//!
//! SYSTEM CONTEXT
//! ==============
//! One `SessionStore` exists per process, shared by `Arc` with the router and
//! any UI layer. It is the only writer of `Session`; readers take snapshots
//! or watch the change feed.
//!
//! DESIGN
//! ======
//! - State lives in a `watch` channel so readers can await transitions
//!   (the guard waits on `loading` clearing).
//! - `initialize` runs at most once; concurrent callers share the single
//!   in-flight run through a `OnceCell`.
//! - Provider change notifications are applied by one listener task in
//!   arrival order. A Guest identity is never overridden by them.
//! - Analytics calls run on spawned tasks and only ever log failures.
//!
//! TRADE-OFFS
//! ==========
//! `sign_out` clears local state before talking to the provider and never
//! rolls back: local state is authoritative for what the UI may show, even
//! when the remote revoke fails.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::Serialize;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{AnalyticsSink, TrackEvent};
use crate::identity::{AuthChange, AuthResponse, Credentials, IdentityProvider, ProviderError, ProviderUser};
use crate::storage::{GUEST_MODE_KEY, GUEST_USER_ID_KEY, LocalStore, PROVIDER_SESSION_KEY, StorageError};

const GUEST_ID_SUFFIX_LEN: usize = 8;
const GUEST_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

// =============================================================================
// SESSION
// =============================================================================

/// Exactly one of these holds at any time; Guest and Authenticated exclude
/// each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Unauthenticated,
    Guest,
    Authenticated { user_id: Uuid, email: Option<String> },
}

impl Identity {
    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

impl From<&ProviderUser> for Identity {
    fn from(user: &ProviderUser) -> Self {
        Self::Authenticated { user_id: user.id, email: user.email.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub identity: Identity,
    /// Flips to true once per process and stays there.
    pub initialized: bool,
    pub loading: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self { identity: Identity::Unauthenticated, initialized: false, loading: true }
    }
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.identity.is_authenticated()
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.identity.is_guest()
    }

    #[must_use]
    pub fn can_access_protected_routes(&self) -> bool {
        self.is_authenticated() || self.is_guest()
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle for the provider change-notification listener. Dropping it stops
/// the listener.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Apply one provider notification to the session.
pub(crate) fn apply_auth_change(state: &watch::Sender<Session>, change: &AuthChange) {
    state.send_if_modified(|session| {
        if session.is_guest() {
            return false;
        }
        let next = change
            .session
            .as_ref()
            .map_or(Identity::Unauthenticated, |s| Identity::from(&s.user));
        if session.identity == next {
            return false;
        }
        session.identity = next;
        true
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// STORE
// =============================================================================

pub struct SessionStore {
    provider: Arc<dyn IdentityProvider>,
    analytics: Arc<dyn AnalyticsSink>,
    local: Arc<dyn LocalStore>,
    state: Arc<watch::Sender<Session>>,
    init: OnceCell<()>,
    subscription: Mutex<Option<Subscription>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        analytics: Arc<dyn AnalyticsSink>,
        local: Arc<dyn LocalStore>,
    ) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            provider,
            analytics,
            local,
            state: Arc::new(state),
            init: OnceCell::new(),
            subscription: Mutex::new(None),
            background: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Change feed for readers. Every mutation made by the store is visible here.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    #[must_use]
    pub fn can_access_protected_routes(&self) -> bool {
        self.state.borrow().can_access_protected_routes()
    }

    /// Resolve the session from the guest flag or the provider. Runs once per
    /// store; later and concurrent calls wait for that run and return.
    pub async fn initialize(&self) {
        self.init.get_or_init(|| self.run_initialize()).await;
    }

    async fn run_initialize(&self) {
        if self.local.contains(GUEST_MODE_KEY) {
            info!("restored guest session");
            self.state.send_modify(|s| {
                s.identity = Identity::Guest;
                s.loading = false;
                s.initialized = true;
            });
            return;
        }

        self.state.send_modify(|s| s.loading = true);
        match self.provider.get_current_session().await {
            Ok(Some(session)) => {
                info!(user_id = %session.user.id, "restored authenticated session");
                self.state.send_modify(|s| s.identity = Identity::from(&session.user));
            }
            Ok(None) => debug!("no existing provider session"),
            Err(e) => warn!(error = %e, "session lookup failed; continuing unauthenticated"),
        }

        self.listen_for_changes();
        self.state.send_modify(|s| {
            s.loading = false;
            s.initialized = true;
        });
    }

    fn listen_for_changes(&self) {
        let mut changes = self.provider.on_auth_state_change();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                debug!(event = ?change.event, "provider auth change");
                apply_auth_change(&state, &change);
            }
        });
        *lock(&self.subscription) = Some(Subscription { task });
    }

    /// Stop applying provider notifications. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(subscription) = lock(&self.subscription).take() {
            subscription.unsubscribe();
        }
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        lock(&self.subscription)
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Resolves once `loading` is false and returns that snapshot.
    pub async fn wait_until_loaded(&self) -> Session {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| !s.loading).await {
            Ok(session) => session.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Verify credentials with the provider. Guest mode is left first,
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the provider's failure; the identity is not authenticated then.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<AuthResponse, ProviderError> {
        self.leave_guest_mode();

        let response = self
            .provider
            .sign_in_with_password(&credentials.email, &credentials.password)
            .await
            .inspect_err(|e| warn!(error = %e, "sign-in failed"))?;
        let user = response.user().ok_or(ProviderError::NoSession)?;

        let identity = Identity::from(user);
        let user_id = user.id.to_string();
        self.state.send_modify(|s| s.identity = identity);
        info!(%user_id, "signed in");

        self.track(vec![TrackEvent::logged_in(&credentials.email, &user_id), TrackEvent::daily_active(&user_id)]);
        Ok(response)
    }

    /// Register an account. The session is not authenticated by this call;
    /// the provider may require email confirmation first.
    ///
    /// # Errors
    ///
    /// Returns the provider's failure.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<AuthResponse, ProviderError> {
        let response = self
            .provider
            .sign_up(&credentials.email, &credentials.password)
            .await
            .inspect_err(|e| warn!(error = %e, "sign-up failed"))?;

        let user_id = match response.user() {
            Some(user) => user.id.to_string(),
            None => self.analytics_user_id(),
        };
        info!(%user_id, confirmed = response.session.is_some(), "signed up");
        self.track(vec![TrackEvent::signed_up(&credentials.email, &user_id)]);
        Ok(response)
    }

    /// Clear local identity, then revoke the provider session. Always
    /// succeeds from the caller's point of view.
    pub async fn sign_out(&self) {
        let mut previous = Identity::Unauthenticated;
        self.state
            .send_modify(|s| previous = std::mem::replace(&mut s.identity, Identity::Unauthenticated));
        if let Err(e) = self.local.remove(GUEST_MODE_KEY) {
            warn!(error = %e, "failed to clear guest marker");
        }

        if previous.is_guest() {
            info!("left guest session");
            return;
        }

        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "provider sign-out failed; local session already cleared");
        }

        if let Identity::Authenticated { user_id, email } = previous {
            info!(%user_id, "signed out");
            self.track(vec![TrackEvent::logged_out(email.as_deref(), &user_id.to_string())]);
        }
    }

    /// Local-only sign-out for an expired or unusable session. Clears the
    /// identity, the guest marker and the stored provider session without a
    /// provider call or analytics.
    pub fn force_sign_out(&self) {
        self.state
            .send_modify(|s| s.identity = Identity::Unauthenticated);
        for key in [GUEST_MODE_KEY, PROVIDER_SESSION_KEY] {
            if let Err(e) = self.local.remove(key) {
                warn!(error = %e, key, "failed to clear local session data");
            }
        }
        if let Err(e) = self.provider.discard_local_session() {
            warn!(error = %e, "failed to discard provider session");
        }
        info!("forced local sign-out");
    }

    /// Enter guest mode and persist the marker so it survives a restart.
    /// Replaces an authenticated identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be written; the identity is
    /// unchanged then.
    pub fn enable_guest_mode(&self) -> Result<(), StorageError> {
        self.local.set(GUEST_MODE_KEY, "true")?;
        self.state.send_modify(|s| s.identity = Identity::Guest);
        info!("guest mode enabled");
        Ok(())
    }

    /// Leave guest mode and remove the persisted marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be removed. The in-memory guest
    /// identity is cleared regardless.
    pub fn disable_guest_mode(&self) -> Result<(), StorageError> {
        self.state.send_if_modified(|s| {
            if !s.is_guest() {
                return false;
            }
            s.identity = Identity::Unauthenticated;
            true
        });
        info!("guest mode disabled");
        self.local.remove(GUEST_MODE_KEY)
    }

    fn leave_guest_mode(&self) {
        if let Err(e) = self.disable_guest_mode() {
            warn!(error = %e, "failed to clear guest marker");
        }
    }

    /// # Errors
    ///
    /// Returns the provider's failure.
    pub async fn reset_password(&self, email: &str) -> Result<(), ProviderError> {
        self.provider
            .reset_password_for_email(email)
            .await
            .inspect_err(|e| warn!(error = %e, "password reset request failed"))
    }

    /// # Errors
    ///
    /// Returns the provider's failure.
    pub async fn update_password(&self, new_password: &str) -> Result<(), ProviderError> {
        self.provider
            .update_user_password(new_password)
            .await
            .inspect_err(|e| warn!(error = %e, "password update failed"))
    }

    /// Identifier used for analytics: the account id when signed in, otherwise
    /// a durable anonymous id created on first use.
    #[must_use]
    pub fn analytics_user_id(&self) -> String {
        if let Identity::Authenticated { user_id, .. } = &self.state.borrow().identity {
            return user_id.to_string();
        }
        if let Some(id) = self.local.get(GUEST_USER_ID_KEY) {
            return id;
        }
        let id = generate_guest_analytics_id();
        if let Err(e) = self.local.set(GUEST_USER_ID_KEY, &id) {
            warn!(error = %e, "failed to persist anonymous analytics id");
        }
        id
    }

    fn track(&self, events: Vec<TrackEvent>) {
        let sink = Arc::clone(&self.analytics);
        let task = tokio::spawn(async move {
            for event in events {
                let name = event.event.name();
                if let Err(e) = sink.track(event).await {
                    warn!(error = %e, event = name, "analytics tracking failed");
                }
            }
        });
        let mut background = lock(&self.background);
        background.retain(|handle| !handle.is_finished());
        background.push(task);
    }

    /// Wait for queued analytics deliveries. Used before process exit.
    pub async fn drain_background(&self) {
        let pending = std::mem::take(&mut *lock(&self.background));
        for handle in pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task did not complete");
            }
        }
    }
}

#[must_use]
pub fn generate_guest_analytics_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let mut rng = rand::rng();
    let suffix: String = (0..GUEST_ID_SUFFIX_LEN)
        .map(|_| GUEST_ID_ALPHABET[rng.random_range(0..GUEST_ID_ALPHABET.len())] as char)
        .collect();
    format!("guest_{millis}_{suffix}")
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

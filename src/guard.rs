//! Navigation guard: allow or redirect one route transition.
//!
//! DESIGN
//! ======
//! `decide` is a pure function of route flags and a session snapshot, so the
//! rule order can be tested without a runtime. `evaluate` is the async
//! wrapper that first makes sure the store has finished resolving identity.
//!
//! Rule order (first match wins):
//! 1. authenticated user on an auth page → landing
//! 2. guest on an auth page → landing
//! 3. no protected access and the route requires auth → login
//! 4. public page → allow
//! 5. protected access → allow
//! 6. otherwise → login
//!
//! `evaluate` imposes no timeout. A provider that never answers leaves the
//! navigation pending; the HTTP adapter's request timeout bounds that in
//! practice.

use tracing::debug;

use crate::config::RoutePaths;
use crate::routes::RouteMeta;
use crate::session::{Session, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(String),
}

impl GuardDecision {
    #[must_use]
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NavigationGuard {
    paths: RoutePaths,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(paths: RoutePaths) -> Self {
        Self { paths }
    }

    #[must_use]
    pub fn paths(&self) -> &RoutePaths {
        &self.paths
    }

    #[must_use]
    pub fn decide(&self, meta: &RouteMeta, session: &Session) -> GuardDecision {
        if meta.is_auth_page && (session.is_authenticated() || session.is_guest()) {
            return GuardDecision::Redirect(self.paths.landing.clone());
        }
        let can_access = session.can_access_protected_routes();
        if !can_access && meta.requires_auth {
            return GuardDecision::Redirect(self.paths.login.clone());
        }
        if meta.is_public_page || can_access {
            return GuardDecision::Allow;
        }
        GuardDecision::Redirect(self.paths.login.clone())
    }

    /// Wait for the store to finish resolving identity, then decide.
    pub async fn evaluate(&self, store: &SessionStore, meta: &RouteMeta) -> GuardDecision {
        if !store.snapshot().initialized {
            store.initialize().await;
        }
        let session = store.wait_until_loaded().await;
        let decision = self.decide(meta, &session);
        debug!(?decision, identity = ?session.identity, "guard decision");
        decision
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;

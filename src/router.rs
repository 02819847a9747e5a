//! Router: drives one navigation from a raw target to a committed location.
//!
//! DESIGN
//! ======
//! - Every navigation takes a ticket from a sequence counter. When a newer
//!   navigation has started by the time a guard decision lands, the older
//!   one is reported `Superseded` and commits nothing (last navigation wins).
//! - Redirects from the guard are followed up to `MAX_REDIRECTS` hops.
//! - Query preservation: a target carrying a query merges it into the
//!   remembered query and uses its own; a target without one inherits the
//!   remembered query.
//! - After each commit the scroll position resets to the top, then the
//!   registered after-navigation hooks run outside the state lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::guard::{GuardDecision, NavigationGuard};
use crate::routes::{RouteMatch, RouteTable};
use crate::session::SessionStore;

pub const MAX_REDIRECTS: usize = 8;

const BASE_URL: &str = "http://router.invalid/";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NavigationError {
    #[error("invalid navigation target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("no route matches {0}")]
    NoRoute(String),
    #[error("navigation to {target} exceeded {hops} redirects")]
    RedirectLoop { target: String, hops: usize },
}

// =============================================================================
// LOCATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub path: String,
    pub name: &'static str,
    pub params: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
}

impl Location {
    /// Path plus the encoded query string, as it would appear in the address bar.
    #[must_use]
    pub fn full_path(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.query)
            .finish();
        format!("{}?{query}", self.path)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScrollPosition {
    pub top: u32,
    pub left: u32,
}

impl ScrollPosition {
    pub const TOP: Self = Self { top: 0, left: 0 };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Completed(Location),
    /// A newer navigation started before this one's guard decision landed.
    Superseded,
}

/// Target split into path and decoded query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    pub query: BTreeMap<String, String>,
}

impl Target {
    /// # Errors
    ///
    /// Returns `InvalidTarget` for unparseable input or a URL on another origin.
    pub fn parse(raw: &str) -> Result<Self, NavigationError> {
        let invalid = |reason: String| NavigationError::InvalidTarget { target: raw.to_owned(), reason };
        let base = Url::parse(BASE_URL).map_err(|e| invalid(e.to_string()))?;
        let url = base.join(raw).map_err(|e| invalid(e.to_string()))?;
        if url.origin() != base.origin() {
            return Err(invalid("external URL".into()));
        }
        Ok(Self { path: url.path().to_owned(), query: url.query_pairs().into_owned().collect() })
    }
}

pub type AfterEachHook = Box<dyn Fn(&Location, Option<&Location>) + Send + Sync>;

#[derive(Debug, Default)]
struct RouterState {
    current: Option<Location>,
    remembered_query: BTreeMap<String, String>,
    scroll: ScrollPosition,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// ROUTER
// =============================================================================

pub struct Router {
    table: RouteTable,
    guard: NavigationGuard,
    store: Arc<SessionStore>,
    state: Mutex<RouterState>,
    seq: AtomicU64,
    after_each: Vec<AfterEachHook>,
}

impl Router {
    #[must_use]
    pub fn new(table: RouteTable, guard: NavigationGuard, store: Arc<SessionStore>) -> Self {
        Self {
            table,
            guard,
            store,
            state: Mutex::new(RouterState::default()),
            seq: AtomicU64::new(0),
            after_each: Vec::new(),
        }
    }

    /// Register a hook run after every committed navigation with `(to, from)`.
    #[must_use]
    pub fn with_after_each(mut self, hook: impl Fn(&Location, Option<&Location>) + Send + Sync + 'static) -> Self {
        self.after_each.push(Box::new(hook));
        self
    }

    #[must_use]
    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    #[must_use]
    pub fn current(&self) -> Option<Location> {
        lock(&self.state).current.clone()
    }

    #[must_use]
    pub fn scroll_position(&self) -> ScrollPosition {
        lock(&self.state).scroll
    }

    pub fn scroll_to(&self, position: ScrollPosition) {
        lock(&self.state).scroll = position;
    }

    #[must_use]
    pub fn remembered_query(&self) -> BTreeMap<String, String> {
        lock(&self.state).remembered_query.clone()
    }

    /// Resolve, guard and commit a navigation, following redirects.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTarget` or `NoRoute` for the target or any redirect
    /// it leads to, and `RedirectLoop` once `MAX_REDIRECTS` is exceeded.
    pub async fn navigate(&self, raw: &str) -> Result<NavigationOutcome, NavigationError> {
        let ticket = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut target = Target::parse(raw)?;
        let mut hops = 0;

        loop {
            let matched = self
                .table
                .resolve(&target.path)
                .ok_or_else(|| NavigationError::NoRoute(target.path.clone()))?;

            match self.guard.evaluate(&self.store, &matched.route.meta).await {
                GuardDecision::Allow => {
                    return Ok(self.commit(ticket, target, matched));
                }
                GuardDecision::Redirect(next) => {
                    if self.is_stale(ticket) {
                        debug!(path = %target.path, "navigation superseded");
                        return Ok(NavigationOutcome::Superseded);
                    }
                    hops += 1;
                    if hops > MAX_REDIRECTS {
                        warn!(path = raw, hops, "redirect loop");
                        return Err(NavigationError::RedirectLoop { target: raw.to_owned(), hops: MAX_REDIRECTS });
                    }
                    debug!(from = %target.path, to = %next, "guard redirect");
                    target = Target::parse(&next)?;
                }
            }
        }
    }

    fn is_stale(&self, ticket: u64) -> bool {
        self.seq.load(Ordering::SeqCst) != ticket
    }

    fn commit(&self, ticket: u64, target: Target, matched: RouteMatch<'_>) -> NavigationOutcome {
        let (to, from) = {
            let mut state = lock(&self.state);
            if self.is_stale(ticket) {
                debug!(path = %target.path, "navigation superseded");
                return NavigationOutcome::Superseded;
            }
            let query = if target.query.is_empty() {
                state.remembered_query.clone()
            } else {
                state.remembered_query.extend(target.query.clone());
                target.query
            };
            let to = Location { path: target.path, name: matched.route.name, params: matched.params, query };
            let from = state.current.replace(to.clone());
            state.scroll = ScrollPosition::TOP;
            (to, from)
        };

        info!(path = %to.full_path(), route = to.name, "navigated");
        for hook in &self.after_each {
            hook(&to, from.as_ref());
        }
        NavigationOutcome::Completed(to)
    }
}

#[cfg(test)]
#[path = "router_test.rs"]
mod tests;

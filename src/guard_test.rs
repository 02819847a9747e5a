use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;
use uuid::Uuid;

use super::*;
use crate::session::Identity;
use crate::test_helpers::*;

fn session(identity: Identity) -> Session {
    Session { identity, initialized: true, loading: false }
}

fn authenticated() -> Session {
    session(Identity::Authenticated { user_id: Uuid::new_v4(), email: Some(VALID_EMAIL.into()) })
}

fn all_identities() -> Vec<Session> {
    vec![session(Identity::Unauthenticated), session(Identity::Guest), authenticated()]
}

fn redirect(path: &str) -> GuardDecision {
    GuardDecision::Redirect(path.to_owned())
}

// =============================================================================
// decide
// =============================================================================

#[test]
fn protected_route_redirects_unauthenticated_to_login() {
    let guard = NavigationGuard::default();
    let anon = session(Identity::Unauthenticated);
    for meta in [
        RouteMeta::protected(),
        RouteMeta { is_public_page: true, ..RouteMeta::protected() },
        RouteMeta { is_auth_page: true, ..RouteMeta::protected() },
    ] {
        assert_eq!(guard.decide(&meta, &anon), redirect("/login"), "{meta:?}");
    }
}

#[test]
fn auth_pages_bounce_signed_in_and_guest_to_landing() {
    let guard = NavigationGuard::default();
    for meta in [RouteMeta::auth_page(), RouteMeta { is_auth_page: true, ..RouteMeta::protected() }] {
        assert_eq!(guard.decide(&meta, &authenticated()), redirect("/app"));
        assert_eq!(guard.decide(&meta, &session(Identity::Guest)), redirect("/app"));
    }
}

#[test]
fn auth_page_allows_unauthenticated() {
    let guard = NavigationGuard::default();
    assert!(guard.decide(&RouteMeta::auth_page(), &session(Identity::Unauthenticated)).is_allow());
}

#[test]
fn public_page_allows_every_identity() {
    let guard = NavigationGuard::default();
    for s in all_identities() {
        assert_eq!(guard.decide(&RouteMeta::public(), &s), GuardDecision::Allow, "{:?}", s.identity);
    }
}

#[test]
fn protected_route_allows_guest_and_authenticated() {
    let guard = NavigationGuard::default();
    assert!(guard.decide(&RouteMeta::protected(), &session(Identity::Guest)).is_allow());
    assert!(guard.decide(&RouteMeta::protected(), &authenticated()).is_allow());
}

#[test]
fn unflagged_unprotected_route_falls_back_to_login() {
    let guard = NavigationGuard::default();
    let meta = RouteMeta { requires_auth: false, is_auth_page: false, is_public_page: false };
    assert_eq!(guard.decide(&meta, &session(Identity::Unauthenticated)), redirect("/login"));
    assert!(guard.decide(&meta, &session(Identity::Guest)).is_allow());
}

#[test]
fn configured_paths_are_used() {
    let guard = NavigationGuard::new(RoutePaths { landing: "/home".into(), login: "/sign-in".into() });
    assert_eq!(guard.decide(&RouteMeta::auth_page(), &authenticated()), redirect("/home"));
    assert_eq!(guard.decide(&RouteMeta::protected(), &session(Identity::Unauthenticated)), redirect("/sign-in"));
}

// =============================================================================
// evaluate
// =============================================================================

#[tokio::test]
async fn reader_route_redirects_to_login_when_signed_out() {
    let h = harness(MockProvider::new());
    h.store.initialize().await;
    let guard = NavigationGuard::default();
    let decision = guard.evaluate(&h.store, &RouteMeta::protected()).await;
    assert_eq!(decision, redirect("/login"));
}

#[tokio::test]
async fn login_route_redirects_authenticated_to_landing() {
    let h = harness(MockProvider::signed_in());
    let guard = NavigationGuard::default();
    let decision = guard.evaluate(&h.store, &RouteMeta::auth_page()).await;
    assert_eq!(decision, redirect("/app"));
}

#[tokio::test]
async fn landing_allows_unauthenticated() {
    let h = harness(MockProvider::new());
    let guard = NavigationGuard::default();
    assert!(guard.evaluate(&h.store, &RouteMeta::public()).await.is_allow());
    assert!(h.store.snapshot().initialized);
}

#[tokio::test]
async fn evaluate_initializes_the_store_once() {
    let h = harness(MockProvider::signed_in());
    let guard = NavigationGuard::default();
    assert!(guard.evaluate(&h.store, &RouteMeta::protected()).await.is_allow());
    assert!(guard.evaluate(&h.store, &RouteMeta::protected()).await.is_allow());
    assert_eq!(h.provider.lookup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_navigations_share_one_lookup() {
    let gate = Arc::new(Notify::new());
    let h = harness(MockProvider::gated(gate.clone()));
    {
        let account = h.provider.account().unwrap();
        *h.provider.current.lock().unwrap() = Some(session_for(account));
    }
    let guard = NavigationGuard::default();
    let (protected, auth_page) = (RouteMeta::protected(), RouteMeta::auth_page());

    let release = async {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.provider.lookup_calls.load(Ordering::SeqCst), 1);
        gate.notify_one();
    };
    let (first, second, ()) = tokio::join!(
        guard.evaluate(&h.store, &protected),
        guard.evaluate(&h.store, &auth_page),
        release,
    );

    assert_eq!(first, GuardDecision::Allow);
    assert_eq!(second, redirect("/app"));
    assert_eq!(h.provider.lookup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_lookup_still_resolves_navigation() {
    let provider = MockProvider::signed_in();
    provider.fail_lookup.store(true, Ordering::SeqCst);
    let h = harness(provider);
    let guard = NavigationGuard::default();
    assert_eq!(guard.evaluate(&h.store, &RouteMeta::protected()).await, redirect("/login"));
}

#[tokio::test]
async fn guest_restored_from_storage_reaches_protected_routes() {
    let h = harness(MockProvider::new());
    h.store.enable_guest_mode().unwrap();
    let guard = NavigationGuard::default();
    assert!(guard.evaluate(&h.store, &RouteMeta::protected()).await.is_allow());
    assert_eq!(h.provider.lookup_calls.load(Ordering::SeqCst), 0);
}

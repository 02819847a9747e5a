//! Authentication session, navigation guard and routing core for the reader
//! client.
//!
//! Flow: identity provider → [`session::SessionStore`] → [`guard::NavigationGuard`]
//! (reading [`routes::RouteMeta`]) → [`router::Router`].

pub mod analytics;
pub mod config;
pub mod guard;
pub mod identity;
pub mod router;
pub mod routes;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

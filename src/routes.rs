//! Static route table and path matching.
//!
//! Patterns are `/`-separated segments. `:name` matches one non-empty
//! segment; `:name(.*)*` matches the rest of the path, including nothing.
//! The first declared route that matches wins, so the catch-all goes last.

use std::collections::BTreeMap;

use serde::Serialize;

/// Per-route flags read by the navigation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteMeta {
    /// Defaults to true: a route must opt out of protection.
    pub requires_auth: bool,
    /// Login / signup forms; signed-in and guest users are bounced off them.
    pub is_auth_page: bool,
    /// Reachable in any session state once the auth-page bounce is settled.
    pub is_public_page: bool,
}

impl Default for RouteMeta {
    fn default() -> Self {
        Self { requires_auth: true, is_auth_page: false, is_public_page: false }
    }
}

impl RouteMeta {
    #[must_use]
    pub fn protected() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn public() -> Self {
        Self { requires_auth: false, is_auth_page: false, is_public_page: true }
    }

    #[must_use]
    pub fn auth_page() -> Self {
        Self { requires_auth: false, is_auth_page: true, is_public_page: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescriptor {
    pub path: &'static str,
    pub name: &'static str,
    pub meta: RouteMeta,
}

impl RouteDescriptor {
    #[must_use]
    pub const fn new(path: &'static str, name: &'static str, meta: RouteMeta) -> Self {
        Self { path, name, meta }
    }
}

/// A resolved route plus the captured path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub route: &'a RouteDescriptor,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteDescriptor>,
}

impl RouteTable {
    #[must_use]
    pub fn new(routes: Vec<RouteDescriptor>) -> Self {
        Self { routes }
    }

    #[must_use]
    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }

    /// Match a path (without query string) against the table.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            match_pattern(route.path, path).map(|params| RouteMatch { route, params })
        })
    }
}

impl Default for RouteTable {
    /// The reader application's routes.
    fn default() -> Self {
        Self::new(vec![
            RouteDescriptor::new("/", "Landing", RouteMeta::public()),
            RouteDescriptor::new("/app", "App", RouteMeta::protected()),
            RouteDescriptor::new("/login", "Login", RouteMeta::auth_page()),
            RouteDescriptor::new("/signup", "SignUp", RouteMeta::auth_page()),
            RouteDescriptor::new("/profile", "Profile", RouteMeta::protected()),
            RouteDescriptor::new("/session/:id", "TextSession", RouteMeta::protected()),
            RouteDescriptor::new("/result", "Result", RouteMeta::protected()),
            RouteDescriptor::new("/feedback", "Feedback", RouteMeta::protected()),
            RouteDescriptor::new("/admin", "Admin", RouteMeta::protected()),
            RouteDescriptor::new("/admin/feedback", "AdminFeedback", RouteMeta::protected()),
            RouteDescriptor::new("/import", "TextImporter", RouteMeta::protected()),
            RouteDescriptor::new("/saved-words", "SavedWords", RouteMeta::protected()),
            RouteDescriptor::new("/:pathMatch(.*)*", "NotFound", RouteMeta::public()),
        ])
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_pattern(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern_segments = segments(pattern);
    let path_segments = segments(path);
    let mut params = BTreeMap::new();

    for (i, seg) in pattern_segments.iter().enumerate() {
        if let Some(name) = seg.strip_prefix(':').and_then(|s| s.strip_suffix("(.*)*")) {
            params.insert(name.to_owned(), path_segments.get(i..).unwrap_or_default().join("/"));
            return Some(params);
        }
        let actual = path_segments.get(i)?;
        match seg.strip_prefix(':') {
            Some(name) => {
                params.insert(name.to_owned(), (*actual).to_owned());
            }
            None if seg == actual => {}
            None => return None,
        }
    }

    (pattern_segments.len() == path_segments.len()).then_some(params)
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;

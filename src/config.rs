//! Runtime configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_LANDING_PATH: &str = "/app";
pub const DEFAULT_LOGIN_PATH: &str = "/login";
pub const DEFAULT_LOCAL_STORE_PATH: &str = ".reader-session.json";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Hosted identity provider (Supabase / GoTrue) connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL without trailing slash, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub anon_key: String,
    pub timeouts: AuthTimeouts,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

/// Event-logging service credentials. Absent means analytics is disabled.
#[derive(Clone, PartialEq, Eq)]
pub struct LogSnagConfig {
    pub token: String,
    pub project: String,
}

impl std::fmt::Debug for LogSnagConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSnagConfig")
            .field("token", &"<redacted>")
            .field("project", &self.project)
            .finish()
    }
}

/// Where the guard sends users it turns away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePaths {
    pub landing: String,
    pub login: String,
}

impl Default for RoutePaths {
    fn default() -> Self {
        Self { landing: DEFAULT_LANDING_PATH.to_owned(), login: DEFAULT_LOGIN_PATH.to_owned() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub supabase: SupabaseConfig,
    pub analytics: Option<LogSnagConfig>,
    pub environment: String,
    pub local_store_path: PathBuf,
    pub routes: RoutePaths,
}

impl AppConfig {
    /// Build typed config from the process environment.
    ///
    /// Required:
    /// - `SUPABASE_URL`: https project URL (plain http allowed for localhost)
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `LOGSNAG_TOKEN` + `LOGSNAG_PROJECT`: analytics disabled unless both set
    /// - `APP_ENVIRONMENT`: default `development`
    /// - `LOCAL_STORE_PATH`: default `.reader-session.json`
    /// - `LANDING_PATH`: default `/app`
    /// - `LOGIN_PATH`: default `/login`
    /// - `AUTH_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTH_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] but reads values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let url = get("SUPABASE_URL").ok_or(ConfigError::Missing { var: "SUPABASE_URL" })?;
        let url = validate_provider_url(&url)?;
        let anon_key = get("SUPABASE_ANON_KEY").ok_or(ConfigError::Missing { var: "SUPABASE_ANON_KEY" })?;
        let timeouts = AuthTimeouts {
            request_secs: parse_u64(get("AUTH_REQUEST_TIMEOUT_SECS"), DEFAULT_AUTH_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_u64(get("AUTH_CONNECT_TIMEOUT_SECS"), DEFAULT_AUTH_CONNECT_TIMEOUT_SECS),
        };

        let analytics = match (get("LOGSNAG_TOKEN"), get("LOGSNAG_PROJECT")) {
            (Some(token), Some(project)) => Some(LogSnagConfig { token, project }),
            _ => None,
        };

        let routes = RoutePaths {
            landing: validate_route_path("LANDING_PATH", get("LANDING_PATH"), DEFAULT_LANDING_PATH)?,
            login: validate_route_path("LOGIN_PATH", get("LOGIN_PATH"), DEFAULT_LOGIN_PATH)?,
        };

        Ok(Self {
            supabase: SupabaseConfig { url, anon_key, timeouts },
            analytics,
            environment: get("APP_ENVIRONMENT").unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_owned()),
            local_store_path: get("LOCAL_STORE_PATH").map_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORE_PATH), PathBuf::from),
            routes,
        })
    }
}

fn parse_u64(raw: Option<String>, default: u64) -> u64 {
    raw.and_then(|v| v.parse::<u64>().ok()).unwrap_or(default)
}

fn validate_provider_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim_end_matches('/');
    let local = ["http://localhost", "http://127.0.0.1"]
        .iter()
        .any(|prefix| url.starts_with(prefix));
    if !url.starts_with("https://") && !local {
        return Err(ConfigError::Invalid { var: "SUPABASE_URL", reason: format!("must be an https URL, got '{raw}'") });
    }
    Ok(url.to_owned())
}

fn validate_route_path(var: &'static str, raw: Option<String>, default: &str) -> Result<String, ConfigError> {
    let path = raw.unwrap_or_else(|| default.to_owned());
    if !path.starts_with('/') {
        return Err(ConfigError::Invalid { var, reason: format!("route path must start with '/', got '{path}'") });
    }
    Ok(path)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

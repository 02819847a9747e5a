//! Best-effort engagement analytics.
//!
//! DESIGN
//! ======
//! Tracking is a side channel: callers hand events to an `AnalyticsSink` on a
//! background task and never look at the outcome. `LogSnagClient` forwards
//! events to the hosted event log; `NoopAnalytics` stands in when no
//! credentials are configured.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::config::LogSnagConfig;

const API_URL: &str = "https://api.logsnag.com/v1/log";
const CHANNEL: &str = "user-engagement";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("analytics request failed: {0}")]
    Request(String),
    #[error("analytics rejected event (status {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsEvent {
    UserSignedUp,
    UserLoggedIn,
    UserLoggedOut,
    DailyActiveUser,
}

impl AnalyticsEvent {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UserSignedUp => "user_signed_up",
            Self::UserLoggedIn => "user_logged_in",
            Self::UserLoggedOut => "user_logged_out",
            Self::DailyActiveUser => "daily_active_user",
        }
    }

    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::UserSignedUp => "👤",
            Self::UserLoggedIn => "🔑",
            Self::UserLoggedOut => "🚪",
            Self::DailyActiveUser => "📅",
        }
    }
}

/// A single event ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub event: AnalyticsEvent,
    pub user_id: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
}

impl TrackEvent {
    fn new(event: AnalyticsEvent, user_id: &str, description: String) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("user-id".to_owned(), user_id.to_owned());
        Self { event, user_id: user_id.to_owned(), description, tags }
    }

    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_owned(), value.to_owned());
        self
    }

    #[must_use]
    pub fn signed_up(email: &str, user_id: &str) -> Self {
        Self::new(AnalyticsEvent::UserSignedUp, user_id, format!("New user signed up: {email}")).with_tag("email", email)
    }

    #[must_use]
    pub fn logged_in(email: &str, user_id: &str) -> Self {
        Self::new(AnalyticsEvent::UserLoggedIn, user_id, format!("User logged in: {email}")).with_tag("email", email)
    }

    #[must_use]
    pub fn logged_out(email: Option<&str>, user_id: &str) -> Self {
        let email = email.unwrap_or("Unknown");
        Self::new(AnalyticsEvent::UserLoggedOut, user_id, format!("User logged out: {email}")).with_tag("email", email)
    }

    #[must_use]
    pub fn daily_active(user_id: &str) -> Self {
        Self::new(AnalyticsEvent::DailyActiveUser, user_id, "Daily active user".to_owned()).with_tag("period", "daily")
    }
}

// =============================================================================
// SINKS
// =============================================================================

#[async_trait::async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track(&self, event: TrackEvent) -> Result<(), AnalyticsError>;
}

/// Drops every event. Used when analytics credentials are absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

#[async_trait::async_trait]
impl AnalyticsSink for NoopAnalytics {
    async fn track(&self, event: TrackEvent) -> Result<(), AnalyticsError> {
        debug!(event = event.event.name(), "analytics disabled; event dropped");
        Ok(())
    }
}

pub struct LogSnagClient {
    http: reqwest::Client,
    token: String,
    project: String,
    environment: String,
}

impl LogSnagClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &LogSnagConfig, environment: &str) -> Result<Self, AnalyticsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AnalyticsError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            token: config.token.clone(),
            project: config.project.clone(),
            environment: environment.to_owned(),
        })
    }
}

#[async_trait::async_trait]
impl AnalyticsSink for LogSnagClient {
    async fn track(&self, event: TrackEvent) -> Result<(), AnalyticsError> {
        let body = LogRequest::from_event(&self.project, &self.environment, &event);
        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyticsError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyticsError::Rejected { status, body });
        }
        debug!(event = event.event.name(), "analytics event tracked");
        Ok(())
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
struct LogRequest<'a> {
    project: &'a str,
    channel: &'static str,
    event: &'static str,
    description: &'a str,
    icon: &'static str,
    user_id: &'a str,
    tags: BTreeMap<String, String>,
    notify: bool,
}

impl<'a> LogRequest<'a> {
    fn from_event(project: &'a str, environment: &str, event: &'a TrackEvent) -> Self {
        let mut tags = event.tags.clone();
        tags.insert("environment".to_owned(), environment.to_owned());
        Self {
            project,
            channel: CHANNEL,
            event: event.event.name(),
            description: &event.description,
            icon: event.event.icon(),
            user_id: &event.user_id,
            tags,
            notify: false,
        }
    }
}

#[cfg(test)]
#[path = "analytics_test.rs"]
mod tests;

//! Upstream account state.
//!
//! Fields touched by concurrent requests are atomics or short mutex
//! sections. Rate-limit deadlines only ever move forward while set.

use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Shared handle to an account
pub type AccountHandle = Arc<Account>;

/// One credentialed upstream identity
#[derive(Debug)]
pub struct Account {
    email: String,
    access_token: Option<SecretString>,
    project_id: Option<String>,

    consecutive_failures: AtomicU32,
    invalid: AtomicBool,
    last_selected: AtomicU64,
    rate_limited_until: Mutex<Option<Instant>>,

    cached_token: Mutex<Option<SecretString>>,
    cached_project: Mutex<Option<String>>,
}

impl Account {
    /// Create an account with no configured credentials
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            access_token: None,
            project_id: None,
            consecutive_failures: AtomicU32::new(0),
            invalid: AtomicBool::new(false),
            last_selected: AtomicU64::new(0),
            rate_limited_until: Mutex::new(None),
            cached_token: Mutex::new(None),
            cached_project: Mutex::new(None),
        }
    }

    /// Set the configured access token
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Set the configured project
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project_id = Some(project.into());
        self
    }

    /// Wrap in a shared handle
    #[must_use]
    pub fn into_handle(self) -> AccountHandle {
        Arc::new(self)
    }

    /// Account identifier
    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Token from static configuration
    #[must_use]
    pub fn configured_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    /// Project from static configuration
    #[must_use]
    pub fn configured_project(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Whether the account is permanently excluded
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Whether the account is not rate-limited at `now`
    #[must_use]
    pub fn is_available(&self, now: Instant) -> bool {
        self.rate_limited_until.lock().map_or(true, |until| until <= now)
    }

    /// Whether the account can be selected at `now`
    #[must_use]
    pub fn is_selectable(&self, now: Instant) -> bool {
        !self.is_invalid() && self.is_available(now)
    }

    /// Time left on the rate limit, if one is active
    #[must_use]
    pub fn rate_limit_remaining(&self, now: Instant) -> Option<Duration> {
        self.rate_limited_until
            .lock()
            .and_then(|until| (until > now).then(|| until - now))
    }

    /// Selection sequence number of the last pick (0 = never)
    #[must_use]
    pub fn last_selected(&self) -> u64 {
        self.last_selected.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self, seq: u64) {
        self.last_selected.fetch_max(seq, Ordering::AcqRel);
    }

    pub(crate) fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::AcqRel);
        if previous > 0 {
            debug!(account = %self.email, previous, "Account recovered");
        }
    }

    pub(crate) fn record_failure(&self) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(account = %self.email, failures, "Account failure recorded");
        failures
    }

    /// Extend the rate limit to `until` unless a later deadline is already set
    pub(crate) fn extend_rate_limit(&self, until: Instant) {
        let mut guard = self.rate_limited_until.lock();
        let next = match *guard {
            Some(existing) if existing >= until => existing,
            _ => until,
        };
        *guard = Some(next);
        info!(
            account = %self.email,
            wait_ms = next.saturating_duration_since(Instant::now()).as_millis() as u64,
            "Account rate limited"
        );
    }

    /// Clear an elapsed rate limit. Returns whether one was cleared.
    pub(crate) fn clear_expired_limit(&self, now: Instant) -> bool {
        let mut guard = self.rate_limited_until.lock();
        match *guard {
            Some(until) if until <= now => {
                *guard = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn mark_invalid(&self) {
        if !self.invalid.swap(true, Ordering::AcqRel) {
            warn!(account = %self.email, "Account marked invalid");
        }
    }

    pub(crate) fn cached_token(&self) -> Option<SecretString> {
        self.cached_token.lock().clone()
    }

    pub(crate) fn cache_token(&self, token: SecretString) {
        *self.cached_token.lock() = Some(token);
    }

    pub(crate) fn cached_project(&self) -> Option<String> {
        self.cached_project.lock().clone()
    }

    pub(crate) fn cache_project(&self, project: String) {
        *self.cached_project.lock() = Some(project);
    }

    pub(crate) fn clear_credentials(&self) {
        *self.cached_token.lock() = None;
        *self.cached_project.lock() = None;
    }

    /// Point-in-time status
    #[must_use]
    pub fn status(&self, now: Instant) -> AccountStatus {
        AccountStatus {
            email: self.email.clone(),
            available: self.is_selectable(now),
            rate_limit_remaining_ms: self
                .rate_limit_remaining(now)
                .map(|d| d.as_millis() as u64),
            consecutive_failures: self.consecutive_failures(),
            invalid: self.is_invalid(),
        }
    }
}

/// Account status for health output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStatus {
    /// Account identifier
    pub email: String,
    /// Selectable right now
    pub available: bool,
    /// Remaining rate limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining_ms: Option<u64>,
    /// Consecutive failures
    pub consecutive_failures: u32,
    /// Permanently excluded
    pub invalid: bool,
}

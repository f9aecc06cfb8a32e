//! Account pool.
//!
//! The dispatcher only sees [`AccountPool`]. [`InMemoryAccountPool`] keeps
//! all state in process and prefers the account with the fewest
//! consecutive failures, breaking ties by least recent selection.

use crate::account::{AccountHandle, AccountStatus};
use crate::credentials::CredentialResolver;
use async_trait::async_trait;
use gateway_core::GatewayResult;
use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of [`AccountPool::select_account`]
#[derive(Debug, Clone)]
pub enum Selection {
    /// An account is usable now
    Ready(AccountHandle),
    /// Every usable account is rate-limited; the shortest remaining wait
    Wait(Duration),
    /// No account can ever serve the request
    Empty,
}

/// Owns the accounts a dispatcher may use
#[async_trait]
pub trait AccountPool: Send + Sync {
    /// Accounts that are not rate-limited or invalid right now
    fn available_accounts(&self) -> Vec<AccountHandle>;

    /// Pick an account, or report how long until one frees up
    fn select_account(&self) -> Selection;

    /// Access token for `account`, cached after the first resolution
    async fn token_for(&self, account: &AccountHandle) -> GatewayResult<SecretString>;

    /// Project for `account`, cached after the first resolution
    async fn project_for(&self, account: &AccountHandle) -> GatewayResult<String>;

    /// Reset the failure counter after a successful call
    fn notify_success(&self, account: &AccountHandle);

    /// Count a failure. Returns the new consecutive failure count.
    fn notify_failure(&self, account: &AccountHandle) -> u32;

    /// Rate-limit `account` until `until`. Never shortens an active limit.
    fn notify_rate_limit(&self, account: &AccountHandle, until: Instant);

    /// Exclude `account` from selection
    fn mark_invalid(&self, account: &AccountHandle);

    /// Drop elapsed rate limits. Returns how many were cleared.
    fn clear_expired_limits(&self) -> usize;

    /// Forget cached token and project for `account`
    fn clear_credentials(&self, account: &AccountHandle);

    /// Status of every account
    fn snapshot(&self) -> Vec<AccountStatus>;
}

/// Process-local account pool
pub struct InMemoryAccountPool {
    accounts: Vec<AccountHandle>,
    resolver: Arc<dyn CredentialResolver>,
    selection_seq: AtomicU64,
}

impl std::fmt::Debug for InMemoryAccountPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAccountPool")
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryAccountPool {
    /// Create a pool over `accounts`
    pub fn new(accounts: Vec<AccountHandle>, resolver: Arc<dyn CredentialResolver>) -> Self {
        info!(accounts = accounts.len(), "Account pool initialized");
        Self {
            accounts,
            resolver,
            selection_seq: AtomicU64::new(0),
        }
    }

    /// All accounts, including unavailable ones
    #[must_use]
    pub fn accounts(&self) -> &[AccountHandle] {
        &self.accounts
    }

    /// Number of accounts
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether the pool has no accounts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Find an account by email
    #[must_use]
    pub fn get(&self, email: &str) -> Option<AccountHandle> {
        self.accounts.iter().find(|a| a.email() == email).cloned()
    }
}

#[async_trait]
impl AccountPool for InMemoryAccountPool {
    fn available_accounts(&self) -> Vec<AccountHandle> {
        let now = Instant::now();
        self.accounts
            .iter()
            .filter(|a| a.is_selectable(now))
            .cloned()
            .collect()
    }

    fn select_account(&self) -> Selection {
        let now = Instant::now();
        let best = self
            .accounts
            .iter()
            .filter(|a| a.is_selectable(now))
            .min_by_key(|a| (a.consecutive_failures(), a.last_selected()));

        if let Some(account) = best {
            let seq = self.selection_seq.fetch_add(1, Ordering::AcqRel) + 1;
            account.touch(seq);
            debug!(account = %account.email(), "Selected account");
            return Selection::Ready(Arc::clone(account));
        }

        self.accounts
            .iter()
            .filter(|a| !a.is_invalid())
            .filter_map(|a| a.rate_limit_remaining(now))
            .min()
            .map_or(Selection::Empty, Selection::Wait)
    }

    async fn token_for(&self, account: &AccountHandle) -> GatewayResult<SecretString> {
        if let Some(token) = account.cached_token() {
            return Ok(token);
        }
        let token = self.resolver.resolve_token(account).await?;
        account.cache_token(token.clone());
        Ok(token)
    }

    async fn project_for(&self, account: &AccountHandle) -> GatewayResult<String> {
        if let Some(project) = account.cached_project() {
            return Ok(project);
        }
        let token = self.token_for(account).await?;
        let project = self.resolver.resolve_project(account, &token).await?;
        account.cache_project(project.clone());
        Ok(project)
    }

    fn notify_success(&self, account: &AccountHandle) {
        account.record_success();
    }

    fn notify_failure(&self, account: &AccountHandle) -> u32 {
        account.record_failure()
    }

    fn notify_rate_limit(&self, account: &AccountHandle, until: Instant) {
        account.extend_rate_limit(until);
    }

    fn mark_invalid(&self, account: &AccountHandle) {
        account.mark_invalid();
        account.clear_credentials();
    }

    fn clear_expired_limits(&self) -> usize {
        let now = Instant::now();
        let cleared = self
            .accounts
            .iter()
            .filter(|a| a.clear_expired_limit(now))
            .count();
        if cleared > 0 {
            debug!(cleared, "Cleared expired rate limits");
        }
        cleared
    }

    fn clear_credentials(&self, account: &AccountHandle) {
        account.clear_credentials();
    }

    fn snapshot(&self) -> Vec<AccountStatus> {
        let now = Instant::now();
        self.accounts.iter().map(|a| a.status(now)).collect()
    }
}

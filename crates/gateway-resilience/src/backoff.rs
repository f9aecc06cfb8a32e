//! Tiered backoff plan.
//!
//! A plan is an ordered list of waits, one per retry, plus a retry ceiling.
//! Retries past the end of the list either reuse the last tier or stop.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Ordered retry waits with a retry ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPlan {
    tiers: Vec<Duration>,
    max_retries: u32,
    jitter: f64,
    extend_last_tier: bool,
}

impl Default for BackoffPlan {
    fn default() -> Self {
        Self {
            tiers: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            max_retries: 3,
            jitter: 0.0,
            extend_last_tier: true,
        }
    }
}

impl BackoffPlan {
    /// Create a plan from tiers and a retry ceiling
    #[must_use]
    pub fn new(tiers: Vec<Duration>, max_retries: u32) -> Self {
        Self {
            tiers,
            max_retries,
            ..Default::default()
        }
    }

    /// Start building a plan
    #[must_use]
    pub fn builder() -> BackoffPlanBuilder {
        BackoffPlanBuilder::default()
    }

    /// Maximum number of retries after the first attempt
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Configured tiers
    #[must_use]
    pub fn tiers(&self) -> &[Duration] {
        &self.tiers
    }

    /// Whether retry number `attempt` (0-indexed) is permitted
    #[must_use]
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries && self.base_delay(attempt).is_some()
    }

    /// Base wait for retry `attempt` (0-indexed), without jitter.
    ///
    /// Indexes past the last tier clamp to it when `extend_last_tier` is
    /// set, and yield `None` otherwise.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        let idx = attempt as usize;
        match self.tiers.get(idx) {
            Some(delay) => Some(*delay),
            None if self.extend_last_tier => Some(self.tiers.last().copied().unwrap_or_default()),
            None => None,
        }
    }

    /// Wait for retry `attempt` (0-indexed), jitter applied
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        if self.jitter <= 0.0 || base.is_zero() {
            return Some(base);
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        Some(base + base.mul_f64(extra))
    }

    /// Sum of the base waits for the first `retries` retries
    #[must_use]
    pub fn total_delay(&self, retries: u32) -> Duration {
        (0..retries.min(self.max_retries))
            .filter_map(|attempt| self.base_delay(attempt))
            .sum()
    }

    /// Sleep for retry `attempt`. Returns `false` without sleeping when the
    /// plan does not allow that retry.
    ///
    /// Dropping the returned future cancels the wait.
    pub async fn wait(&self, attempt: u32) -> bool {
        if !self.allows_retry(attempt) {
            return false;
        }
        let Some(delay) = self.delay_for_attempt(attempt) else {
            return false;
        };
        debug!(
            attempt = attempt + 1,
            max_retries = self.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );
        tokio::time::sleep(delay).await;
        true
    }
}

/// Builder for [`BackoffPlan`]
#[derive(Debug, Default)]
pub struct BackoffPlanBuilder {
    plan: Option<BackoffPlan>,
}

impl BackoffPlanBuilder {
    fn plan(&mut self) -> &mut BackoffPlan {
        self.plan.get_or_insert_with(BackoffPlan::default)
    }

    /// Set the tiers
    #[must_use]
    pub fn tiers(mut self, tiers: Vec<Duration>) -> Self {
        self.plan().tiers = tiers;
        self
    }

    /// Set the retry ceiling
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.plan().max_retries = max_retries;
        self
    }

    /// Set the jitter fraction (clamped to 0.0..=1.0)
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.plan().jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Reuse the last tier past the end of the list
    #[must_use]
    pub fn extend_last_tier(mut self, extend: bool) -> Self {
        self.plan().extend_last_tier = extend;
        self
    }

    /// Build the plan
    #[must_use]
    pub fn build(mut self) -> BackoffPlan {
        self.plan.take().unwrap_or_default()
    }
}

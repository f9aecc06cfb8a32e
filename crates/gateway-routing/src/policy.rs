//! Dispatch limits derived from configuration.

use gateway_config::DispatchConfig;
use gateway_resilience::BackoffPlan;
use std::time::Duration;

/// Bounds applied by the dispatcher outside of endpoint failover
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Consecutive failures after which an account's error is surfaced
    pub failure_threshold: u32,
    /// Transport-failure attempts per request
    pub max_account_attempts: u32,
    /// Rate-limit duration when the provider gives no reset hint
    pub default_rate_limit: Duration,
    /// Longest pool wait accepted before giving up
    pub max_rate_limit_wait: Duration,
    /// Account rotations after rate limits before giving up
    pub max_rate_limit_rotations: u32,
    /// Pool waits per request
    pub max_selection_waits: u32,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl DispatchPolicy {
    /// Build from the `dispatch` config section
    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            max_account_attempts: config.max_account_attempts,
            default_rate_limit: config.default_rate_limit,
            max_rate_limit_wait: config.max_rate_limit_wait,
            max_rate_limit_rotations: 32,
            max_selection_waits: config.max_capacity_retries,
        }
    }

    /// Endpoint failover schedule for the same section
    #[must_use]
    pub fn backoff_plan(config: &DispatchConfig) -> BackoffPlan {
        BackoffPlan::builder()
            .tiers(config.backoff_tiers.clone())
            .max_retries(config.max_capacity_retries)
            .jitter(config.backoff_jitter)
            .extend_last_tier(config.extend_last_tier)
            .build()
    }
}

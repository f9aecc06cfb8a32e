//! # Gateway Resilience
//!
//! Tiered backoff used by the dispatcher between capacity-exhaustion
//! retries. Waits are plain `tokio::time::sleep` futures, so dropping the
//! caller cancels them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;

pub use backoff::{BackoffPlan, BackoffPlanBuilder};

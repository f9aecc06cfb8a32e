//! # Gateway Routing
//!
//! Account selection and the dispatch state machine.
//!
//! - [`AccountPool`]: selects a usable account and tracks rate limits,
//!   failures and cached credentials
//! - [`Dispatcher`]: drives one request through account selection,
//!   endpoint failover with tiered backoff, and stream commit

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod credentials;
pub mod dispatcher;
pub mod policy;
pub mod pool;

#[cfg(test)]
mod testing;

pub use account::{Account, AccountHandle, AccountStatus};
pub use credentials::{CredentialResolver, StaticCredentials};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use policy::DispatchPolicy;
pub use pool::{AccountPool, InMemoryAccountPool, Selection};

//! Integration tests for the Cloud Code gateway
//!
//! Each test starts the real HTTP server and `HttpTransport` against
//! wiremock upstreams, so failover, account rotation and signature
//! continuity are exercised over actual sockets.

pub mod fixtures;
pub mod helpers;
pub mod mock_upstream;

pub use fixtures::*;
pub use helpers::*;
pub use mock_upstream::*;

#[cfg(test)]
mod api_tests;
#[cfg(test)]
mod failover_tests;
#[cfg(test)]
mod signature_tests;

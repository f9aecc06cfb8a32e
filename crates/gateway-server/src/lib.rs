//! # Gateway Server
//!
//! Axum HTTP surface for the Cloud Code gateway.
//!
//! - `POST /v1/generate`: aggregated JSON or an SSE stream of events
//! - `GET /health`: status and account snapshot
//! - `GET /metrics`: Prometheus text

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use server::{serve, serve_on};
pub use shutdown::shutdown_signal;
pub use state::AppState;

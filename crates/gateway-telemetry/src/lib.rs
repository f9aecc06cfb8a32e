//! # Gateway Telemetry
//!
//! Observability for the Cloud Code gateway.
//!
//! This crate provides:
//! - Tracing subscriber setup with optional OpenTelemetry export
//! - Request recorders that log, fan out or hand records to a background task
//! - Prometheus metrics fed from request records

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod metrics;
pub mod recorder;
pub mod tracing_setup;

pub use metrics::DispatchMetrics;
pub use recorder::{ChannelRecorder, FanoutRecorder, TracingRecorder};
pub use tracing_setup::{init_tracing, shutdown_tracing, TracingConfig, TracingError};

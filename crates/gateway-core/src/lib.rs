//! # Gateway Core
//!
//! Core types, traits, and error handling for the Cloud Code dispatch gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - The dispatch request and aggregated response types
//! - The normalized stream event model
//! - The upstream transport abstraction
//! - Collaborator seams (request recording, tool argument remapping)
//! - Error taxonomy

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod recorder;
pub mod request;
pub mod response;
pub mod streaming;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use recorder::{NoopRecorder, RequestRecord, RequestRecorder};
pub use request::DispatchRequest;
pub use response::{AggregatedResponse, ContentBlock, ResponseAggregator};
pub use streaming::{EventStream, FinishReason, StreamEvent, Usage};
pub use tools::{ArgumentShim, PassthroughShim};
pub use transport::{ByteStream, UpstreamCall, UpstreamResponse, UpstreamTransport};
pub use types::{ModelFamily, RequestId};

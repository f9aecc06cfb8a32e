//! # Gateway Providers
//!
//! Everything that knows the shape of the Cloud Code `v1internal` API:
//!
//! - [`EndpointList`]: the ordered fallback list of base URLs
//! - [`wrap_request`] / [`restore_signatures`]: outbound request envelope
//! - [`classify_failure`]: maps raw error responses into the gateway taxonomy
//! - [`StreamTranslator`]: SSE bytes to normalized [`gateway_core::StreamEvent`]s
//! - [`SignatureCache`]: TTL-bounded thought-signature continuity store
//! - [`ToolArgumentRemapper`]: rewrites malformed tool-call arguments
//! - [`HttpTransport`]: reqwest-backed [`gateway_core::UpstreamTransport`]
//! - [`CodeAssistProjectResolver`]: project discovery via `loadCodeAssist`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod endpoints;
pub mod envelope;
pub mod project;
pub mod signature_cache;
pub mod tool_args;
pub mod translator;
pub mod transport;

pub use classify::{
    classify_error_frame, classify_failure, parse_duration_str, UpstreamFailure, MAX_RETRY_HINT,
};
pub use endpoints::EndpointList;
pub use envelope::{restore_signatures, wrap_request, RestoreStats};
pub use project::{CodeAssistProjectResolver, ProjectDiscovery, UNTAGGED_ACCOUNT};
pub use signature_cache::{SignatureCache, SweeperHandle};
pub use tool_args::{coerce_to_bool, ToolArgumentRemapper};
pub use translator::{FrameDecoder, StreamTranslator, MAX_LINE_BYTES};
pub use transport::HttpTransport;

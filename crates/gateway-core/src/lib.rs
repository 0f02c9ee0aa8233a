//! # Gateway Core
//!
//! Core types and traits for the API gateway forwarding pipeline:
//! - Error taxonomy with stable status-code mapping
//! - The canonical request envelope
//! - Backend responses, outbound requests and the pipeline result type
//! - The backend client abstraction

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod response;
pub mod types;

pub use backend::BackendClient;
pub use error::{GatewayError, GatewayResult, TimeoutScope};
pub use response::{BackendResponse, OutboundRequest, ProxyError, ProxyResponse, TranslateResult};
pub use types::{RequestBody, RequestEnvelope, RequestEnvelopeBuilder, ALLOWED_METHODS};

//! # Gateway Proxy
//!
//! The outbound edge of the forwarding pipeline:
//! - [`RequestTransformer`] rewrites an authorized envelope into a backend call
//! - [`HttpBackendClient`] executes that call over HTTP

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod transformer;

pub use client::HttpBackendClient;
pub use transformer::{RequestTransformer, FORBIDDEN_HEADERS};

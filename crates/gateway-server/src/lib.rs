//! # Gateway Server
//!
//! The forwarding pipeline and its HTTP adapter:
//! - [`ForwardingPipeline`]: authorization, response cache and resilience policy per request
//! - [`GatewayContext`]: every shared component, built once at startup
//! - An axum router with the catch-all forwarding route and admin endpoints

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use pipeline::ForwardingPipeline;
pub use routes::create_router;
pub use server::{Server, ServerError};
pub use state::{connect_store, GatewayContext, GatewayContextBuilder};

//! # Gateway Routing
//!
//! Route resolution and access control:
//! - Service routes loaded from configuration
//! - ACL entries matched on service, method and path prefix
//! - Dot-segment normalization shared with the outbound URL
//! - Authorization with a typed rejection reason

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acl;
pub mod path;
pub mod table;

pub use acl::AclEntry;
pub use path::normalize_path;
pub use table::{RouteTable, ServiceRoute};

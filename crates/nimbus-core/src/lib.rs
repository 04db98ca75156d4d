//! # Nimbus Core
//!
//! Core types shared by every Nimbus crate:
//! - The workspace-wide [`Error`] type and its HTTP/status-code mapping
//! - The tagged middleware stack applications compose their request pipeline from
//! - JSON response helpers and the uniform error payload
//! - Small value types such as [`AppErrorInfo`]

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod middleware;
pub mod response;
pub mod types;

pub use error::{Error, Result};
pub use middleware::{Body, Middleware, MiddlewareStack, Next};
pub use response::ResponseBuilder;
pub use types::*;

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::middleware::{Body, Middleware, MiddlewareStack, Next};
    pub use crate::response::ResponseBuilder;
    pub use crate::types::*;
}

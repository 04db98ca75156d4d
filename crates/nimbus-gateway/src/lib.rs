//! # Nimbus Gateway
//!
//! Single ingress in front of every application the supervisor manages:
//! - Request routing by application name (header, query, host, default)
//! - Lifecycle-aware answers (`404`/`503`) while an application is not running
//! - WebSocket status push tagged by application
//! - Graceful shutdown on SIGINT/SIGTERM

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod errors;
pub mod gateway;
pub mod resolver;
pub mod shutdown;
pub mod ws;

pub use errors::{state_code, ErrorKind, ErrorTable};
pub use gateway::{Gateway, HEALTH_PATH};
pub use resolver::{AppNameResolver, APP_NAME_QUERY};
pub use shutdown::{ShutdownSignal, SignalHandler};
pub use ws::{MaintainingPayload, WsMessage, WsServer};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::errors::{ErrorKind, ErrorTable};
    pub use crate::gateway::Gateway;
    pub use crate::resolver::AppNameResolver;
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::ws::{WsMessage, WsServer};
}

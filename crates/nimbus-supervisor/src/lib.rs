//! # Nimbus Supervisor
//!
//! Process-wide coordination of many applications:
//! - Per-application lifecycle state machine and its interpreter
//! - [`AppSupervisor`] registry with coalesced, bounded bootstrapping
//! - Status and working-message subscriptions for the gateway and WebSocket server

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod events;
pub mod fsm;
pub mod supervisor;

pub use events::{StatusChanged, Subscription, WorkingMessageChanged};
pub use fsm::{transition, AppState, FsmEvent, FsmInterpreter};
pub use supervisor::{AppBootstrapper, AppSupervisor, GetAppOptions};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::events::{StatusChanged, Subscription, WorkingMessageChanged};
    pub use crate::fsm::{AppState, FsmEvent, FsmInterpreter};
    pub use crate::supervisor::{AppBootstrapper, AppSupervisor, GetAppOptions};
}

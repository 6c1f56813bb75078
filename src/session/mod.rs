//! Channel sessions
//!
//! Configuration, the per-session context, the channel state machine, and
//! the deferred status scheduler that synthesizes terminal statuses.

pub mod channels;
pub mod config;
pub mod context;
pub mod deferred;
pub mod state;

pub use channels::{ChannelId, ChannelSet};
pub use config::{ChannelConfig, ConnectionType, Role, SessionConfig};
pub use context::SessionContext;
pub use deferred::{DeferredStatus, DeferredStatusScheduler, TimerKind};
pub use state::{CallbackReturn, ChannelEventKind, ChannelSession, ChannelState, Connectivity};

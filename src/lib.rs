//! itemstream: stream multiplexing and channel-session engine
//!
//! Multiplexes many logical item streams (single items, batches, tunnel
//! streams and their sub-streams, provider-originated requests) over a small
//! set of physical channels. The engine owns:
//!
//! - handle and wire stream id allocation, including wraparound
//! - the registry mapping both kinds of id to live items
//! - the per-channel session state machine
//! - routing of inbound messages to the owning item's callbacks
//! - synthetic closed statuses for requests that cannot be routed
//!
//! Sockets, message encoding and the service directory stay outside. The
//! engine drives them through the traits in [`transport`].
//!
//! # Layout
//!
//! ```text
//!  client::Consumer / client::NiProvider / server::InteractiveProvider
//!                              │
//!                              ▼
//!                     engine::ItemEngine
//!        ┌──────────┬──────────┼───────────┬────────────┐
//!        ▼          ▼          ▼           ▼            ▼
//!    registry    session     router    watchlist      item
//!   (ids, map)  (channels,  (inbound)  (provider    (variants,
//!               timers)                 requests)    callbacks)
//!                              │
//!                              ▼
//!         transport::{Reactor, ReactorChannel, Codec, ...}
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod item;
pub mod msg;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;
pub mod watchlist;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{Consumer, ConnectivityEvent, NiProvider};
pub use engine::{Collaborators, ConnectionListener, ItemEngine};
pub use error::{Error, ErrorCode, Result, TransportError};
pub use item::{EventContext, ItemClient};
pub use msg::{Msg, ReqMsg, TunnelStreamRequest};
pub use registry::{Handle, StreamId};
pub use server::InteractiveProvider;
pub use session::{ChannelConfig, Role, SessionConfig};
pub use stats::EngineStats;

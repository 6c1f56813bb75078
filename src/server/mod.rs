//! Server-side role facade
//!
//! [`InteractiveProvider`] serves client channels accepted by the transport
//! and can send requests of its own to those clients.

pub mod provider;

pub use provider::InteractiveProvider;

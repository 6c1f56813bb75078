//! Client-side role facades
//!
//! Thin wrappers over [`ItemEngine`] for sessions that connect out:
//! - [`Consumer`] subscribes to items, batches and tunnel streams
//! - [`NiProvider`] publishes items without being asked
//!
//! Both hand back a receiver of [`ConnectivityEvent`]s alongside the facade.

pub mod consumer;
pub mod ni_provider;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::{Collaborators, ConnectionListener, ItemEngine};
use crate::error::{Error, ErrorCode, Result};
use crate::item::ChannelInfo;
use crate::session::{Connectivity, Role, SessionConfig};

pub use consumer::Consumer;
pub use ni_provider::NiProvider;

/// Capacity of the connectivity event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connectivity change on one of the session's channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub channel: ChannelInfo,
    pub event: Connectivity,
}

/// Forwards engine connectivity callbacks into an mpsc channel
pub(crate) struct EventForwarder {
    tx: mpsc::Sender<ConnectivityEvent>,
}

impl ConnectionListener for EventForwarder {
    fn on_connectivity(&self, channel: &ChannelInfo, event: Connectivity) {
        let event = ConnectivityEvent {
            channel: channel.clone(),
            event,
        };
        // Callbacks run on the dispatch thread and must not block
        if let Err(err) = self.tx.try_send(event) {
            tracing::warn!(error = %err, "Dropping connectivity event");
        }
    }
}

/// Build an engine for `role` with an event receiver attached
pub(crate) fn engine_for(
    role: Role,
    config: SessionConfig,
    io: Collaborators,
) -> Result<(Arc<ItemEngine>, mpsc::Receiver<ConnectivityEvent>)> {
    if config.role != role {
        return Err(Error::invalid_usage(
            ErrorCode::InvalidArgument,
            format!("Session configured for {:?} cannot be used as {:?}", config.role, role),
        ));
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let engine = Arc::new(ItemEngine::new(config, io));
    engine.add_connection_listener(Arc::new(EventForwarder { tx }));
    Ok((engine, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChannelId;

    #[test]
    fn test_forwarder_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let forwarder = EventForwarder { tx };
        let channel = ChannelInfo {
            id: ChannelId::new(0),
            name: "Channel_1".into(),
        };

        forwarder.on_connectivity(&channel, Connectivity::DownReconnecting);
        forwarder.on_connectivity(&channel, Connectivity::Ready);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, Connectivity::DownReconnecting);
        assert!(rx.try_recv().is_err());
    }
}

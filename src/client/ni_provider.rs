//! Non-interactive provider session
//!
//! Publishes items to an upstream infrastructure without being asked. A
//! publishing stream is opened locally and the first refresh the application
//! submits on it is what the peer sees.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{engine_for, ConnectivityEvent};
use crate::engine::{Collaborators, ItemEngine};
use crate::error::Result;
use crate::item::{Closure, ItemClient};
use crate::msg::{Msg, ReqMsg};
use crate::registry::Handle;
use crate::session::{ChannelId, Role, SessionConfig};

/// Non-interactive provider facade over an [`ItemEngine`]
pub struct NiProvider {
    engine: Arc<ItemEngine>,
}

impl NiProvider {
    /// Create a non-interactive provider session
    pub fn new(
        config: SessionConfig,
        io: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<ConnectivityEvent>)> {
        let (engine, events) = engine_for(Role::NiProvider, config, io)?;
        Ok((Self { engine }, events))
    }

    /// Connect every configured channel
    pub fn connect(&self) -> Result<Vec<ChannelId>> {
        self.engine.initialize()
    }

    /// Open a stream to publish `req`'s item on; nothing is sent yet
    pub fn open(&self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        self.engine.open_publish(req, client, closure)
    }

    /// Publish a refresh, update or status on an open stream
    pub fn publish(&self, msg: Msg, handle: Handle) -> Result<()> {
        self.engine.submit(msg, handle)
    }

    /// Close a published stream
    pub fn close(&self, handle: Handle) -> Result<()> {
        self.engine.unregister(handle)
    }

    pub fn engine(&self) -> &Arc<ItemEngine> {
        &self.engine
    }
}

impl Drop for NiProvider {
    fn drop(&mut self) {
        self.engine.uninitialize();
    }
}

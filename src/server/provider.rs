//! Interactive provider session

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::{engine_for, ConnectivityEvent};
use crate::engine::{Collaborators, ItemEngine};
use crate::error::Result;
use crate::item::{Closure, ItemClient};
use crate::msg::{Msg, ReqMsg};
use crate::registry::Handle;
use crate::session::{ChannelConfig, ChannelId, Role, SessionConfig};

/// Interactive provider facade over an [`ItemEngine`]
///
/// Requests sent to clients get negative stream ids, are watched for a
/// matching response, and time out after `request_timeout`.
pub struct InteractiveProvider {
    engine: Arc<ItemEngine>,
}

impl InteractiveProvider {
    pub fn new(
        config: SessionConfig,
        io: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<ConnectivityEvent>)> {
        let (engine, events) = engine_for(Role::InteractiveProvider, config, io)?;
        Ok((Self { engine }, events))
    }

    /// Track a client channel the transport accepted
    pub fn accept(&self, config: ChannelConfig) -> ChannelId {
        self.engine.accept_channel(config)
    }

    /// Send a request to the client channel named in `req.channel`
    pub fn request(&self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        self.engine.register_client(req, client, closure, None)
    }

    /// Re-send a request; service and item name must not change
    pub fn reissue(&self, req: ReqMsg, handle: Handle) -> Result<()> {
        self.engine.reissue(req, handle)
    }

    /// Send a generic message on a request stream
    pub fn submit(&self, msg: Msg, handle: Handle) -> Result<()> {
        self.engine.submit(msg, handle)
    }

    pub fn close(&self, handle: Handle) -> Result<()> {
        self.engine.unregister(handle)
    }

    /// A service was deleted; requests made on it are closed
    ///
    /// With `channel` set only requests on that client channel are affected.
    pub fn service_deleted(&self, channel: Option<ChannelId>, service_id: u16) {
        self.engine.service_deleted(channel, service_id)
    }

    /// A client's login stream closed; its requests are closed
    pub fn login_closed(&self, channel: ChannelId) {
        self.engine.login_closed(channel)
    }

    pub fn engine(&self) -> &Arc<ItemEngine> {
        &self.engine
    }
}

impl Drop for InteractiveProvider {
    fn drop(&mut self) {
        self.engine.uninitialize();
    }
}

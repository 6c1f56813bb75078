//! Consumer session
//!
//! Subscribes to items on the services the directory store knows about.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{engine_for, ConnectivityEvent};
use crate::engine::{Collaborators, ItemEngine};
use crate::error::Result;
use crate::item::{Closure, ItemClient};
use crate::msg::{Msg, ReqMsg, TunnelStreamRequest};
use crate::registry::Handle;
use crate::session::{ChannelId, Role, SessionConfig};

/// Consumer facade over an [`ItemEngine`]
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use itemstream::client::Consumer;
/// use itemstream::engine::Collaborators;
/// use itemstream::item::ItemClient;
/// use itemstream::msg::ReqMsg;
/// use itemstream::session::{ChannelConfig, SessionConfig};
///
/// # fn example(io: Collaborators, client: Arc<dyn ItemClient>) -> itemstream::error::Result<()> {
/// let config = SessionConfig::consumer("Consumer_1").channel(ChannelConfig::new("Channel_1"));
/// let (consumer, mut events) = Consumer::new(config, io)?;
/// consumer.connect()?;
///
/// let handle = consumer.subscribe(
///     ReqMsg::new().name("IBM.N").service_name("DIRECT_FEED"),
///     client,
///     None,
/// )?;
/// consumer.unsubscribe(handle)?;
/// # Ok(())
/// # }
/// ```
pub struct Consumer {
    engine: Arc<ItemEngine>,
}

impl Consumer {
    /// Create a consumer session
    ///
    /// Returns the consumer and a receiver for connectivity events. Fails if
    /// `config` is not a consumer configuration.
    pub fn new(
        config: SessionConfig,
        io: Collaborators,
    ) -> Result<(Self, mpsc::Receiver<ConnectivityEvent>)> {
        let (engine, events) = engine_for(Role::Consumer, config, io)?;
        Ok((Self { engine }, events))
    }

    /// Connect every configured channel
    pub fn connect(&self) -> Result<Vec<ChannelId>> {
        self.engine.initialize()
    }

    /// Subscribe to an item, or to every item of a batch request
    pub fn subscribe(&self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        self.engine.register_client(req, client, closure, None)
    }

    /// Open a tunnel stream
    pub fn open_tunnel(
        &self,
        req: TunnelStreamRequest,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        self.engine.register_tunnel(req, client, closure)
    }

    /// Subscribe to an item inside an open tunnel stream
    pub fn subscribe_in_tunnel(
        &self,
        req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
        tunnel: Handle,
    ) -> Result<Handle> {
        self.engine.register_client(req, client, closure, Some(tunnel))
    }

    /// Change the request behind a subscription
    pub fn reissue(&self, req: ReqMsg, handle: Handle) -> Result<()> {
        self.engine.reissue(req, handle)
    }

    /// Send a post or generic message on a subscription
    pub fn submit(&self, msg: Msg, handle: Handle) -> Result<()> {
        self.engine.submit(msg, handle)
    }

    pub fn unsubscribe(&self, handle: Handle) -> Result<()> {
        self.engine.unregister(handle)
    }

    /// Engine driving this session; the transport feeds its callbacks here
    pub fn engine(&self) -> &Arc<ItemEngine> {
        &self.engine
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.engine.uninitialize();
    }
}

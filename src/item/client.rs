//! Application callbacks

use std::any::Any;
use std::sync::Arc;

use crate::msg::{Msg, MsgClass};
use crate::registry::Handle;
use crate::session::ChannelId;

/// Opaque application token carried back on every notification
pub type Closure = Option<Arc<dyn Any + Send + Sync>>;

/// Channel an event arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

/// Context passed alongside every message delivered to an [`ItemClient`]
#[derive(Clone)]
pub struct EventContext {
    /// Handle of the item the message belongs to
    pub handle: Handle,
    /// Closure given at registration
    pub closure: Closure,
    /// Handle of the parent item (tunnel or batch), if any
    pub parent_handle: Option<Handle>,
    /// Channel serving the item, if bound
    pub channel: Option<ChannelInfo>,
}

impl EventContext {
    /// Downcast the closure to a concrete type
    pub fn closure<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.closure.as_ref().and_then(|c| c.downcast_ref::<T>())
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("handle", &self.handle)
            .field("has_closure", &self.closure.is_some())
            .field("parent_handle", &self.parent_handle)
            .field("channel", &self.channel)
            .finish()
    }
}

/// Receiver of item notifications
///
/// Every method defaults to a no-op. `on_all_msg` runs first for every
/// message, then the class-specific method. Callbacks run with the engine
/// lock released and may call back into the engine.
pub trait ItemClient: Send + Sync {
    fn on_refresh(&self, _msg: &Msg, _ctx: &EventContext) {}

    fn on_update(&self, _msg: &Msg, _ctx: &EventContext) {}

    fn on_status(&self, _msg: &Msg, _ctx: &EventContext) {}

    fn on_generic(&self, _msg: &Msg, _ctx: &EventContext) {}

    fn on_ack(&self, _msg: &Msg, _ctx: &EventContext) {}

    fn on_all_msg(&self, _msg: &Msg, _ctx: &EventContext) {}
}

/// A message ready for delivery, collected under the engine lock
pub(crate) struct Notification {
    pub(crate) client: Arc<dyn ItemClient>,
    pub(crate) msg: Msg,
    pub(crate) ctx: EventContext,
}

impl Notification {
    /// Hand the message to the application
    pub(crate) fn deliver(self) {
        let client = self.client.as_ref();
        client.on_all_msg(&self.msg, &self.ctx);
        match self.msg.class {
            MsgClass::Refresh => client.on_refresh(&self.msg, &self.ctx),
            MsgClass::Update => client.on_update(&self.msg, &self.ctx),
            MsgClass::Status => client.on_status(&self.msg, &self.ctx),
            MsgClass::Generic => client.on_generic(&self.msg, &self.ctx),
            MsgClass::Ack => client.on_ack(&self.msg, &self.ctx),
            MsgClass::Request | MsgClass::Close | MsgClass::Post => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::msg::{domain, State};

    #[derive(Default)]
    struct Counting {
        all: AtomicUsize,
        status: AtomicUsize,
    }

    impl ItemClient for Counting {
        fn on_status(&self, _msg: &Msg, _ctx: &EventContext) {
            self.status.fetch_add(1, Ordering::SeqCst);
        }

        fn on_all_msg(&self, _msg: &Msg, _ctx: &EventContext) {
            self.all.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_deliver_calls_all_then_class() {
        let client = Arc::new(Counting::default());
        let ctx = EventContext {
            handle: Handle::new(1),
            closure: Some(Arc::new(42u32)),
            parent_handle: None,
            channel: None,
        };

        Notification {
            client: client.clone(),
            msg: Msg::status(5, domain::MARKET_PRICE, State::open_ok()),
            ctx: ctx.clone(),
        }
        .deliver();

        assert_eq!(client.all.load(Ordering::SeqCst), 1);
        assert_eq!(client.status.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.closure::<u32>(), Some(&42));
        assert!(ctx.closure::<String>().is_none());
    }
}

//! Inbound message routing
//!
//! Inbound envelopes carry only a stream id. [`MessageRouter`] resolves that
//! id against the registry and decides which handling path applies; the
//! engine then runs the path under the user lock.

use std::sync::Arc;

use crate::engine::Locked;
use crate::item::ItemKind;
use crate::msg::{Msg, MsgClass, ReqMsg, State, StreamState};
use crate::registry::{ItemId, ItemRegistry, StreamId};
use crate::session::{CallbackReturn, ChannelId, DeferredStatus, TimerKind};
use crate::transport::TunnelStream;
use crate::watchlist::{check_response, ResponseCheck};

/// Handling path for an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// No live item owns the stream
    Unknown,
    /// The item is waiting for its synthetic status; wire traffic is ignored
    Closing(ItemId),
    /// Aggregate stream of a batch
    Batch(ItemId),
    /// Response to a provider-originated request
    Provider(ItemId),
    /// Any other item
    Item(ItemId),
}

/// Resolves stream ids to handling paths
pub struct MessageRouter;

impl MessageRouter {
    /// Route for a message on an outer stream
    pub fn resolve(registry: &ItemRegistry, stream_id: StreamId) -> Route {
        registry
            .lookup_by_stream(stream_id)
            .map_or(Route::Unknown, |id| Self::classify(registry, id))
    }

    /// Route for a message on a sub-stream of the tunnel at `tunnel_stream_id`
    pub fn resolve_sub(registry: &ItemRegistry, tunnel_stream_id: StreamId, sub_stream_id: StreamId) -> Route {
        let Some(tunnel) = registry.lookup_by_stream(tunnel_stream_id) else {
            return Route::Unknown;
        };
        match registry.get(tunnel).map(|item| &item.kind) {
            Some(ItemKind::Tunnel(tunnel)) => tunnel
                .subs
                .get(sub_stream_id)
                .map_or(Route::Unknown, |id| Self::classify(registry, id)),
            _ => Route::Unknown,
        }
    }

    fn classify(registry: &ItemRegistry, id: ItemId) -> Route {
        match registry.get(id) {
            None => Route::Unknown,
            Some(item) if item.deferred.is_some() => Route::Closing(id),
            Some(item) => match item.kind {
                ItemKind::Batch(_) => Route::Batch(id),
                ItemKind::ProviderSingle(_) => Route::Provider(id),
                _ => Route::Item(id),
            },
        }
    }
}

/// Whether a refresh names a different item than was requested
fn name_mismatch(request: &ReqMsg, msg: &Msg) -> bool {
    let received = msg.key.as_ref().and_then(|k| k.name.as_deref());
    match (received, request.name.as_deref()) {
        (Some(received), Some(requested)) => received != requested,
        _ => false,
    }
}

impl Locked<'_> {
    fn channel_version(&self, channel: Option<ChannelId>) -> Option<(u8, u8)> {
        channel
            .and_then(|c| self.st.channels.get(c))
            .and_then(|session| session.channel())
            .map(|c| c.version())
    }

    pub(crate) fn on_raw(&mut self, channel: ChannelId, raw: &[u8]) -> CallbackReturn {
        let Some((major, minor)) = self.channel_version(Some(channel)) else {
            tracing::error!(channel = %channel, "Received message on unknown channel");
            self.dropped();
            return CallbackReturn::Failure;
        };

        match self.codec().decode(raw, major, minor) {
            Ok(msg) => {
                self.route(channel, msg);
                CallbackReturn::Success
            }
            Err(err) => {
                tracing::error!(channel = %channel, error = %err, "Failed to decode message");
                self.dropped();
                CallbackReturn::Success
            }
        }
    }

    pub(crate) fn route(&mut self, channel: ChannelId, msg: Msg) {
        match MessageRouter::resolve(&self.st.registry, msg.stream_id) {
            Route::Unknown => {
                tracing::warn!(
                    channel = %channel,
                    stream_id = msg.stream_id,
                    class = ?msg.class,
                    "Received message for unknown stream, dropping"
                );
                self.dropped();
            }
            Route::Closing(_) => {
                tracing::trace!(stream_id = msg.stream_id, "Dropping message for closing item");
                self.dropped();
            }
            Route::Batch(id) => self.route_batch(id, msg),
            Route::Provider(id) => self.route_provider(id, msg),
            Route::Item(id) => self.route_item(id, msg),
        }
    }

    /// A terminal status on the batch stream releases the stream id; the
    /// batch itself lives on while it has members
    fn route_batch(&mut self, id: ItemId, msg: Msg) {
        if !(msg.class == MsgClass::Status && msg.is_terminal()) {
            self.deliver(id, msg);
            return;
        }

        let drained = match self.st.registry.get(id).map(|item| &item.kind) {
            Some(ItemKind::Batch(batch)) => batch.live_members() == 0,
            _ => false,
        };
        self.deliver(id, msg);
        self.st.registry.unbind_stream(id);
        if drained {
            self.remove_item(id);
        }
    }

    fn route_provider(&mut self, id: ItemId, mut msg: Msg) {
        if msg.class == MsgClass::Ack {
            tracing::debug!(stream_id = msg.stream_id, "Dropping ack for provider request");
            self.dropped();
            return;
        }

        let st = &mut *self.st;
        st.scheduler.cancel(id, TimerKind::RequestTimeout);
        let Some(item) = st.registry.get_mut(id) else {
            return;
        };
        let domain_type = item.domain_type;
        let ItemKind::ProviderSingle(provider) = &mut item.kind else {
            return;
        };
        provider.timer_armed = false;

        if check_response(provider, domain_type, &mut msg) == ResponseCheck::Mismatch {
            tracing::error!(
                stream_id = msg.stream_id,
                "Received response is mismatch with the initial request, closing item"
            );
            self.dropped();
            if let Err(err) = self.send_close(id) {
                tracing::warn!(error = %err, "Failed to send close for mismatched response");
            }
            self.defer(
                id,
                DeferredStatus::closed_recover("received response is mismatch with the initial request"),
            );
            self.st.watchlist.remove(id);
            return;
        }

        let terminal = msg.is_terminal();
        self.deliver(id, msg);
        if terminal {
            self.remove_item(id);
        }
    }

    fn route_item(&mut self, id: ItemId, msg: Msg) {
        let mismatch = match self.st.registry.get(id).map(|item| &item.kind) {
            Some(ItemKind::Single(single)) => {
                msg.class == MsgClass::Refresh && name_mismatch(&single.request, &msg)
            }
            _ => false,
        };
        if mismatch {
            tracing::error!(
                stream_id = msg.stream_id,
                "Received refresh does not match the item requested, dropping"
            );
            self.dropped();
            return;
        }

        let terminal = msg.is_terminal();
        self.deliver(id, msg);
        if terminal {
            self.remove_item(id);
        }
    }

    /// Tunnel state change; the stream handle comes with the open status
    pub(crate) fn on_tunnel_status(
        &mut self,
        tunnel_stream_id: StreamId,
        state: State,
        stream: Option<Arc<dyn TunnelStream>>,
    ) {
        let Some(id) = self.st.registry.lookup_by_stream(tunnel_stream_id) else {
            tracing::warn!(stream_id = tunnel_stream_id, "Tunnel status for unknown stream");
            return;
        };
        let Some(item) = self.st.registry.get_mut(id) else {
            return;
        };
        let domain_type = item.domain_type;
        let key = item.status_key();
        let ItemKind::Tunnel(tunnel) = &mut item.kind else {
            tracing::warn!(stream_id = tunnel_stream_id, "Tunnel status for a non-tunnel stream");
            return;
        };

        let terminal = state.stream_state.is_terminal();
        if state.stream_state == StreamState::Open {
            if let Some(stream) = stream {
                tunnel.stream = Some(stream);
                tracing::debug!(stream_id = tunnel_stream_id, "Tunnel stream open");
            }
        }

        let mut msg = Msg::status(tunnel_stream_id, domain_type, state);
        msg.key = key;
        self.deliver(id, msg);
        if terminal {
            self.remove_item(id);
        }
    }

    pub(crate) fn on_tunnel_raw(&mut self, tunnel_stream_id: StreamId, raw: &[u8]) -> CallbackReturn {
        let channel = self
            .st
            .registry
            .lookup_by_stream(tunnel_stream_id)
            .and_then(|id| self.st.registry.get(id))
            .and_then(|item| item.channel());
        let Some((major, minor)) = self.channel_version(channel) else {
            tracing::warn!(stream_id = tunnel_stream_id, "Tunnel message for unknown stream");
            self.dropped();
            return CallbackReturn::Success;
        };

        let msg = match self.codec().decode(raw, major, minor) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::error!(stream_id = tunnel_stream_id, error = %err, "Failed to decode tunnel message");
                self.dropped();
                return CallbackReturn::Success;
            }
        };

        match MessageRouter::resolve_sub(&self.st.registry, tunnel_stream_id, msg.stream_id) {
            Route::Item(id) => {
                let terminal = msg.is_terminal();
                self.deliver(id, msg);
                if terminal {
                    self.remove_item(id);
                }
            }
            _ => {
                tracing::warn!(
                    stream_id = tunnel_stream_id,
                    sub_stream_id = msg.stream_id,
                    "Received message for unknown sub-stream, dropping"
                );
                self.dropped();
            }
        }
        CallbackReturn::Success
    }
}

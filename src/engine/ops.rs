//! Item operations run under the user lock
//!
//! Everything here works on a [`Locked`] view: registry mutation, wire
//! submission, and collection of notifications for delivery once the lock
//! is released.

use std::sync::Arc;
use std::time::Instant;

use super::Locked;
use crate::error::{Error, ErrorCode, Result, TransportError};
use crate::item::{tunnel, EventContext, Item, ItemKind, Notification, TunnelItem};
use crate::msg::{Msg, ReqMsg};
use crate::registry::{Handle, ItemId, StreamId};
use crate::session::{
    CallbackReturn, ChannelEventKind, ChannelId, Connectivity, DeferredStatus, Role,
    SessionConfig, TimerKind,
};
use crate::stats::Counters;
use crate::transport::{Codec, ReactorChannel, TunnelStream};

/// Where an item's outbound traffic goes
pub(crate) enum Wire {
    Channel(Arc<dyn ReactorChannel>),
    /// Re-encoded into the parent tunnel's buffers
    Tunnel {
        stream: Arc<dyn TunnelStream>,
        max_msg_size: usize,
    },
}

impl Wire {
    pub(crate) fn send(&self, codec: &dyn Codec, msg: &Msg, handle: Option<Handle>) -> Result<()> {
        match self {
            Wire::Channel(channel) => channel
                .submit(msg)
                .map_err(|err| Error::submit_failed(handle, &err)),
            Wire::Tunnel {
                stream,
                max_msg_size,
            } => tunnel::submit_encoded(codec, stream.as_ref(), msg, *max_msg_size, handle),
        }
    }
}

impl<'a> Locked<'a> {
    pub(crate) fn config(&self) -> &'a SessionConfig {
        self.shared.ctx.config()
    }

    pub(crate) fn codec(&self) -> &'a dyn Codec {
        self.shared.io.codec.as_ref()
    }

    pub(crate) fn next_handle(&self) -> Result<Handle> {
        let registry = &self.st.registry;
        self.shared
            .ctx
            .ids()
            .next_handle(registry.len(), |h| registry.handle_in_use(h))
    }

    /// Reserve `1 + extra` stream ids and return the first
    pub(crate) fn next_stream_id(&self, extra: u32) -> Result<StreamId> {
        let registry = &self.st.registry;
        self.shared.ctx.ids().next_stream_id(extra, registry.stream_count(), |s| {
            registry.stream_in_use(s)
        })
    }

    /// Register an item under a fresh handle
    pub(crate) fn insert(&mut self, item: Item, stream_id: Option<StreamId>) -> Result<(Handle, ItemId)> {
        let handle = self.next_handle()?;
        let id = match stream_id {
            Some(stream_id) => self.st.registry.register_with_stream(handle, stream_id, item),
            None => self.st.registry.register(handle, item),
        };
        Counters::bump(&self.shared.counters.items_opened);
        Ok((handle, id))
    }

    /// Register an item that will only ever see a synthetic terminal status
    pub(crate) fn register_deferred(&mut self, item: Item, status: DeferredStatus) -> Result<Handle> {
        let kind = item.kind.name();
        let (handle, id) = self.insert(item, None)?;
        tracing::debug!(
            handle = %handle,
            kind,
            reason = %status.state.text,
            "Item registered with deferred status"
        );
        self.defer(id, status);
        Ok(handle)
    }

    /// Give an item a synthetic terminal status, delivered after the
    /// configured delay
    ///
    /// Ignored if one is already pending. From here on the item never
    /// touches the wire.
    pub(crate) fn defer(&mut self, id: ItemId, status: DeferredStatus) -> bool {
        let deadline = Instant::now() + self.config().deferred_status_delay;
        let st = &mut *self.st;
        let Some(item) = st.registry.get_mut(id) else {
            return false;
        };
        if item.deferred.is_some() {
            return false;
        }
        if let ItemKind::ProviderSingle(p) = &mut item.kind {
            p.timer_armed = false;
        }
        item.deferred = Some(status);
        st.scheduler.cancel(id, TimerKind::RequestTimeout);
        st.scheduler.schedule(id, TimerKind::ClosedStatus, deadline)
    }

    pub(crate) fn lookup(&self, handle: Handle) -> Result<ItemId> {
        self.st.registry.lookup_by_handle(handle).ok_or_else(|| {
            Error::invalid_usage(
                ErrorCode::InvalidHandle,
                format!("Attempt to use invalid Handle {handle}"),
            )
        })
    }

    pub(crate) fn item(&self, id: ItemId) -> Result<&Item> {
        self.st
            .registry
            .get(id)
            .ok_or_else(|| Error::invalid_usage(ErrorCode::InternalError, "Item is no longer registered"))
    }

    pub(crate) fn tunnel_mut(&mut self, id: ItemId) -> Option<&mut TunnelItem> {
        match self.st.registry.get_mut(id).map(|item| &mut item.kind) {
            Some(ItemKind::Tunnel(tunnel)) => Some(tunnel),
            _ => None,
        }
    }

    /// Transport channel for requests, if the channel is up
    pub(crate) fn channel_for(&self, channel: Option<ChannelId>) -> Result<Arc<dyn ReactorChannel>> {
        channel
            .and_then(|c| self.st.channels.active_channel(c))
            .cloned()
            .ok_or_else(|| Error::invalid_usage(ErrorCode::NoActiveChannel, "No active channel"))
    }

    /// Outbound path of an item
    pub(crate) fn wire_target(&self, id: ItemId) -> Result<Wire> {
        let item = self.item(id)?;
        if !matches!(item.kind, ItemKind::Sub(_)) {
            return self.channel_for(item.channel()).map(Wire::Channel);
        }

        let parent = item.parent.and_then(|p| self.st.registry.get(p));
        match parent.map(|p| &p.kind) {
            Some(ItemKind::Tunnel(tunnel)) => match &tunnel.stream {
                Some(stream) => Ok(Wire::Tunnel {
                    stream: Arc::clone(stream),
                    max_msg_size: tunnel.request.class_of_service.max_msg_size as usize,
                }),
                None => Err(tunnel_not_open()),
            },
            _ => Err(Error::invalid_usage(
                ErrorCode::InvalidHandle,
                "Parent tunnel stream is no longer registered",
            )),
        }
    }

    /// Queue a message for the item's client
    pub(crate) fn notify(&mut self, id: ItemId, mut msg: Msg) {
        let st = &*self.st;
        let Some(item) = st.registry.get(id) else {
            return;
        };
        let Some(handle) = item.handle else {
            return;
        };

        if msg.service_name.is_none() {
            msg.service_name = item.service_name().map(str::to_string);
        }
        let parent_handle = item
            .parent
            .and_then(|p| st.registry.get(p))
            .and_then(Item::handle);
        let channel = item.channel().and_then(|c| st.channels.info(c));

        self.out.push(Notification {
            client: Arc::clone(&item.client),
            msg,
            ctx: EventContext {
                handle,
                closure: item.closure.clone(),
                parent_handle,
                channel,
            },
        });
    }

    /// Queue a routed inbound message
    pub(crate) fn deliver(&mut self, id: ItemId, msg: Msg) {
        Counters::bump(&self.shared.counters.messages_routed);
        self.notify(id, msg);
    }

    pub(crate) fn dropped(&self) {
        Counters::bump(&self.shared.counters.messages_dropped);
    }

    /// Arm the request timer of a provider item
    pub(crate) fn arm_request_timer(&mut self, id: ItemId) {
        let timeout = self.config().request_timeout;
        if timeout.is_zero() {
            return;
        }
        let st = &mut *self.st;
        let Some(ItemKind::ProviderSingle(p)) = st.registry.get_mut(id).map(|i| &mut i.kind) else {
            return;
        };
        p.timer_armed = true;
        st.scheduler.cancel(id, TimerKind::RequestTimeout);
        st.scheduler
            .schedule(id, TimerKind::RequestTimeout, Instant::now() + timeout);
    }

    pub(crate) fn reissue(&mut self, mut req: ReqMsg, handle: Handle) -> Result<()> {
        let id = self.lookup(handle)?;
        let item = self.item(id)?;
        item.check_modify()?;
        if item.deferred.is_some() {
            tracing::debug!(handle = %handle, "Reissue on closing item ignored");
            return Ok(());
        }

        let service_id = item.directory.as_ref().map(|d| d.service_id);
        let stream_id = match &item.kind {
            ItemKind::Single(single) => {
                req.inherit_key(&single.request);
                item.stream_id
            }
            ItemKind::Sub(sub) => {
                req.inherit_key(&sub.request);
                Some(sub.sub_stream_id)
            }
            ItemKind::ProviderSingle(p) => {
                p.validate_reissue(&mut req)?;
                item.stream_id
            }
            // rejected by check_modify
            ItemKind::Batch(_) | ItemKind::Tunnel(_) => return Ok(()),
        };
        let Some(stream_id) = stream_id else {
            return Err(Error::invalid_usage(
                ErrorCode::InvalidOperation,
                "Item has no open stream to reissue on",
            ));
        };

        let msg = req.to_wire(stream_id, service_id);
        self.wire_target(id)?.send(self.codec(), &msg, Some(handle))?;

        let rearm = match self.st.registry.get_mut(id).map(|i| &mut i.kind) {
            Some(ItemKind::Single(single)) => {
                single.request = req;
                false
            }
            Some(ItemKind::Sub(sub)) => {
                sub.request = req;
                false
            }
            Some(ItemKind::ProviderSingle(p)) => {
                p.apply_reissue(&req);
                true
            }
            _ => false,
        };
        if rearm {
            self.arm_request_timer(id);
        }
        Ok(())
    }

    pub(crate) fn submit(&mut self, mut msg: Msg, handle: Handle) -> Result<()> {
        let id = self.lookup(handle)?;
        let item = self.item(id)?;
        item.check_submit(msg.class, self.shared.ctx.role())?;
        if item.deferred.is_some() {
            return Err(Error::invalid_usage(
                ErrorCode::InvalidOperation,
                "Invalid attempt to submit on a closing stream",
            ));
        }

        msg.stream_id = match &item.kind {
            ItemKind::Sub(sub) => sub.sub_stream_id,
            _ => item.stream_id.ok_or_else(|| {
                Error::invalid_usage(ErrorCode::InvalidOperation, "Item has no open stream")
            })?,
        };
        self.wire_target(id)?.send(self.codec(), &msg, Some(handle))
    }

    pub(crate) fn unregister(&mut self, handle: Handle) -> Result<()> {
        let Some(id) = self.st.registry.lookup_by_handle(handle) else {
            tracing::debug!(handle = %handle, "Unregister of unknown handle ignored");
            return Ok(());
        };
        self.item(id)?.check_close()?;
        self.close_item(id);
        Ok(())
    }

    /// Send a close for an item, then remove it whatever the send outcome
    pub(crate) fn close_item(&mut self, id: ItemId) {
        if let Err(err) = self.send_close(id) {
            tracing::warn!(error = %err, "Failed to send close, removing item anyway");
        }
        self.remove_item(id);
    }

    /// Close envelope for an item's stream
    pub(crate) fn send_close(&self, id: ItemId) -> Result<()> {
        let Some(item) = self.st.registry.get(id) else {
            return Ok(());
        };
        if item.deferred.is_some() {
            return Ok(());
        }

        match &item.kind {
            ItemKind::Batch(_) => Ok(()),
            ItemKind::Tunnel(TunnelItem {
                stream: Some(stream),
                ..
            }) => stream
                .close()
                .map_err(|err| Error::submit_failed(item.handle, &err)),
            ItemKind::Sub(sub) => match self.wire_target(id) {
                Ok(wire) => wire.send(
                    self.codec(),
                    &Msg::close(sub.sub_stream_id, item.domain_type),
                    item.handle,
                ),
                // the tunnel is going away with its sub-streams
                Err(_) => Ok(()),
            },
            _ => {
                let Some(stream_id) = item.stream_id else {
                    return Ok(());
                };
                self.channel_for(item.channel())?
                    .submit(&Msg::close(stream_id, item.domain_type))
                    .map_err(|err| Error::submit_failed(item.handle, &err))
            }
        }
    }

    /// Remove an item and everything that hangs off it
    ///
    /// A tunnel takes its sub-streams with it, a sub-stream gives its id back
    /// to the tunnel, and a batch member may take the drained batch along.
    /// Removing an item twice is a no-op.
    pub(crate) fn remove_item(&mut self, id: ItemId) {
        let subs = match self.st.registry.get(id).map(|item| &item.kind) {
            Some(ItemKind::Tunnel(tunnel)) => tunnel.subs.live(),
            _ => Vec::new(),
        };
        for sub in subs {
            self.remove_item(sub);
        }

        let st = &mut *self.st;
        st.scheduler.cancel_all(id);
        let Some(item) = st.registry.remove(id) else {
            return;
        };
        st.watchlist.remove(id);
        Counters::bump(&self.shared.counters.items_removed);
        tracing::trace!(kind = item.kind.name(), "Removed item");

        match (item.kind, item.parent) {
            (ItemKind::Sub(sub), Some(parent)) => {
                if let Some(tunnel) = self.tunnel_mut(parent) {
                    tunnel.subs.release(sub.sub_stream_id);
                }
            }
            (ItemKind::Single(_), Some(batch)) => self.member_removed(batch),
            _ => {}
        }
    }

    fn member_removed(&mut self, batch_id: ItemId) {
        let drained = match self.st.registry.get_mut(batch_id).map(|item| &mut item.kind) {
            Some(ItemKind::Batch(batch)) => batch.member_removed(),
            _ => false,
        };
        if drained {
            tracing::debug!("Last batch member removed, removing batch");
            self.remove_item(batch_id);
        }
    }

    pub(crate) fn process_timeouts(&mut self, now: Instant) -> usize {
        let due = self.st.scheduler.pop_due(now);
        let fired = due.len();
        for (id, kind) in due {
            match kind {
                TimerKind::ClosedStatus => self.fire_deferred(id),
                TimerKind::RequestTimeout => self.fire_request_timeout(id),
            }
        }
        fired
    }

    /// Deliver an item's synthetic status, then remove it
    fn fire_deferred(&mut self, id: ItemId) {
        let Some(item) = self.st.registry.get_mut(id) else {
            return;
        };
        let Some(status) = item.deferred.take() else {
            return;
        };

        let mut msg = Msg::status(item.stream_id.unwrap_or(0), item.domain_type, status.state);
        msg.key = item.status_key();
        self.notify(id, msg);
        Counters::bump(&self.shared.counters.deferred_delivered);
        self.remove_item(id);
    }

    /// A provider request went unanswered: close it on the wire and report
    /// the close to the application right away
    fn fire_request_timeout(&mut self, id: ItemId) {
        let Some(item) = self.st.registry.get_mut(id) else {
            return;
        };
        let ItemKind::ProviderSingle(p) = &mut item.kind else {
            return;
        };
        if !p.timer_armed {
            return;
        }
        p.timer_armed = false;
        tracing::warn!(handle = ?item.handle, stream_id = ?item.stream_id, "Request timed out");

        if let Err(err) = self.send_close(id) {
            tracing::warn!(error = %err, "Failed to send close for timed out request");
        }

        let Ok(item) = self.item(id) else {
            return;
        };
        let state = DeferredStatus::closed_recover("request is timeout").state;
        let mut msg = Msg::status(item.stream_id.unwrap_or(0), item.domain_type, state);
        msg.key = item.status_key();
        self.notify(id, msg);
        self.remove_item(id);
    }

    pub(crate) fn on_channel_event(
        &mut self,
        id: ChannelId,
        kind: ChannelEventKind,
        channel: &Arc<dyn ReactorChannel>,
        error: Option<&TransportError>,
    ) -> CallbackReturn {
        let selector = self.shared.io.selector.as_ref();
        let (ret, fan_out) = self.st.channels.on_event(id, kind, channel, error, selector);

        if let Some(event) = fan_out {
            if matches!(event, Connectivity::DownReconnecting | Connectivity::Down) {
                self.channel_lost(id);
            }
            if let Some(info) = self.st.channels.info(id) {
                self.events.push((info, event));
            }
        }
        ret
    }

    /// Close every item served by a lost channel with a recoverable status
    fn channel_lost(&mut self, channel: ChannelId) {
        if self.shared.ctx.role() == Role::NiProvider {
            self.publishing_channel_lost(channel);
            return;
        }

        let affected = if self.shared.ctx.is_provider() {
            self.st.watchlist.items_on_channel(&self.st.registry, channel)
        } else {
            // sub-streams first so they report before their tunnel takes them down
            let mut ids: Vec<(bool, ItemId)> = self
                .st
                .registry
                .iter()
                .filter(|(_, item)| {
                    item.deferred.is_none()
                        && item.channel() == Some(channel)
                        && !matches!(item.kind, ItemKind::Batch(_))
                })
                .map(|(id, item)| (!matches!(item.kind, ItemKind::Sub(_)), id))
                .collect();
            ids.sort_by_key(|(not_sub, _)| *not_sub);
            ids.into_iter().map(|(_, id)| id).collect()
        };

        if !affected.is_empty() {
            tracing::info!(channel = %channel, items = affected.len(), "Closing items on lost channel");
        }
        self.close_recoverable(affected, "channel down");
    }

    /// Publishing streams keep their handle and stream id across a reconnect
    /// unless configured otherwise; removal is silent
    fn publishing_channel_lost(&mut self, channel: ChannelId) {
        if !self.config().remove_items_on_disconnect {
            tracing::debug!(channel = %channel, "Keeping publishing streams across disconnect");
            return;
        }

        let ids: Vec<ItemId> = self
            .st
            .registry
            .iter()
            .filter(|(_, item)| item.channel() == Some(channel))
            .map(|(id, _)| id)
            .collect();
        tracing::info!(channel = %channel, items = ids.len(), "Removing publishing streams on disconnect");
        for id in ids {
            self.remove_item(id);
        }
    }

    pub(crate) fn service_deleted(&mut self, channel: Option<ChannelId>, service_id: u16) {
        let ids = self
            .st
            .watchlist
            .items_for_service(&self.st.registry, channel, service_id);
        tracing::debug!(service_id, items = ids.len(), "Service deleted");
        self.close_recoverable(ids, "service is deleted");
    }

    pub(crate) fn login_closed(&mut self, channel: ChannelId) {
        let ids = self.st.watchlist.items_on_channel(&self.st.registry, channel);
        tracing::debug!(channel = %channel, items = ids.len(), "Login stream closed");
        self.close_recoverable(ids, "channel is closed");
    }

    /// Schedule a recoverable close for each item and drop it from the watch list
    fn close_recoverable(&mut self, ids: Vec<ItemId>, text: &str) {
        for id in ids {
            self.defer(id, DeferredStatus::closed_recover(text));
            self.st.watchlist.remove(id);
        }
    }

    pub(crate) fn shutdown(&mut self) {
        for id in self.st.registry.ids() {
            self.remove_item(id);
        }
        let selector = self.shared.io.selector.as_ref();
        self.st.channels.close_all(selector);
        tracing::info!(instance = %self.shared.ctx.instance_name(), "Engine uninitialized");
    }
}

pub(super) fn tunnel_not_open() -> Error {
    Error::invalid_usage(ErrorCode::InvalidOperation, "Tunnel stream is not open yet")
}

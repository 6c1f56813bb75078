//! Open paths for every item kind

use std::sync::Arc;

use super::ops::tunnel_not_open;
use super::Locked;
use crate::error::{Error, ErrorCode, Result};
use crate::item::{
    BatchItem, Closure, Directory, Item, ItemClient, ItemKind, ProviderSingleItem, SingleItem,
    SubItem, TunnelItem,
};
use crate::msg::{ReqMsg, TunnelStreamRequest};
use crate::registry::{Handle, ItemId, StreamId};
use crate::session::{DeferredStatus, Role};

impl Locked<'_> {
    pub(crate) fn register_client(
        &mut self,
        req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
        parent: Option<Handle>,
    ) -> Result<Handle> {
        if let Some(parent) = parent {
            return self.open_sub(req, client, closure, parent);
        }

        if self.shared.ctx.role() == Role::InteractiveProvider {
            if req.is_batch() {
                return Err(Error::invalid_usage(
                    ErrorCode::InvalidArgument,
                    "Batch requests are not supported for provider originated requests",
                ));
            }
            return self.open_provider(req, client, closure);
        }

        if req.is_batch() {
            self.open_batch(req, client, closure)
        } else {
            self.open_single(req, client, closure)
        }
    }

    /// Look the named service up in the directory
    fn resolve_service(
        &self,
        service_name: Option<&str>,
        service_id: Option<u16>,
    ) -> std::result::Result<Directory, DeferredStatus> {
        let store = self.shared.io.directory.as_ref();
        match (service_name, service_id) {
            (Some(name), _) => store.resolve_by_name(name).ok_or_else(|| {
                DeferredStatus::closed(format!("Service name of '{name}' is not found."))
            }),
            (None, Some(id)) => store.resolve_by_id(id).ok_or_else(|| {
                DeferredStatus::closed(format!("Service id of '{id}' is not found."))
            }),
            (None, None) => Err(DeferredStatus::closed(
                "Passed in request message does not identify any service.",
            )),
        }
    }

    /// Resolve a service and check that its channel can carry requests
    fn resolve(
        &self,
        service_name: Option<&str>,
        service_id: Option<u16>,
    ) -> std::result::Result<Directory, DeferredStatus> {
        let directory = self.resolve_service(service_name, service_id)?;
        if self.st.channels.active_channel(directory.channel).is_none() {
            return Err(DeferredStatus::closed_recover(format!(
                "No active channel for service '{}'",
                directory.service_name
            )));
        }
        Ok(directory)
    }

    fn open_single(&mut self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        let domain_type = req.domain_type;
        let resolved = self.resolve(req.service_name.as_deref(), req.service_id);
        let mut item = Item::new(ItemKind::Single(SingleItem::new(req)), domain_type, client, closure);

        match resolved {
            Ok(directory) => {
                item.directory = Some(directory);
                self.open_on_wire(item)
            }
            Err(status) => self.register_deferred(item, status),
        }
    }

    /// Allocate a stream id for a resolved single item, register it and
    /// send its request
    ///
    /// A submit failure leaves the item registered.
    fn open_on_wire(&mut self, item: Item) -> Result<Handle> {
        let stream_id = self.next_stream_id(0)?;
        let (handle, id) = self.insert(item, Some(stream_id))?;
        self.send_request(id, handle, stream_id)?;

        tracing::trace!(handle = %handle, stream_id, "Opened item");
        Ok(handle)
    }

    fn send_request(&self, id: ItemId, handle: Handle, stream_id: StreamId) -> Result<()> {
        let item = self.item(id)?;
        let msg = match &item.kind {
            ItemKind::Single(single) => single
                .request
                .to_wire(stream_id, item.directory.as_ref().map(|d| d.service_id)),
            ItemKind::Sub(sub) => sub.request.to_wire(stream_id, None),
            ItemKind::ProviderSingle(p) => p.request.to_wire(stream_id, None),
            ItemKind::Batch(batch) => batch
                .request
                .to_wire(stream_id, item.directory.as_ref().map(|d| d.service_id)),
            ItemKind::Tunnel(_) => return Ok(()),
        };
        self.wire_target(id)?.send(self.codec(), &msg, Some(handle))
    }

    /// Open a batch: one request on the batch stream, members on the ids
    /// right after it
    fn open_batch(&mut self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        let domain_type = req.domain_type;
        let directory = match self.resolve(req.service_name.as_deref(), req.service_id) {
            Ok(directory) => directory,
            Err(status) => {
                let item = Item::new(ItemKind::Batch(BatchItem::new(req)), domain_type, client, closure);
                return self.register_deferred(item, status);
            }
        };

        let extra = u32::try_from(req.batch.len()).unwrap_or(u32::MAX);
        if self.shared.ctx.ids().must_split_batch(extra) {
            return self.split_batch(req, directory, client, closure);
        }

        let first = self.next_stream_id(extra)?;
        let mut batch = Item::new(
            ItemKind::Batch(BatchItem::new(req.clone())),
            domain_type,
            Arc::clone(&client),
            closure.clone(),
        );
        batch.directory = Some(directory.clone());
        let (handle, batch_id) = self.insert(batch, Some(first))?;

        for (offset, name) in (1..).zip(req.batch.iter()) {
            let mut member = Item::new(
                ItemKind::Single(SingleItem::batch_member(&req, name)),
                domain_type,
                Arc::clone(&client),
                closure.clone(),
            );
            member.directory = Some(directory.clone());
            member.parent = Some(batch_id);

            match self.insert(member, Some(first + offset)) {
                Ok((_, member_id)) => {
                    if let Some(ItemKind::Batch(batch)) =
                        self.st.registry.get_mut(batch_id).map(|item| &mut item.kind)
                    {
                        batch.add_member(member_id);
                    }
                }
                Err(err) => {
                    self.discard_batch(batch_id);
                    return Err(err);
                }
            }
        }

        self.send_request(batch_id, handle, first)?;
        tracing::debug!(
            handle = %handle,
            stream_id = first,
            items = req.batch.len(),
            "Opened batch"
        );
        Ok(handle)
    }

    /// Stream ids would wrap inside the batch block: open every name as its
    /// own item and close the batch handle
    fn split_batch(
        &mut self,
        req: ReqMsg,
        directory: Directory,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        tracing::debug!(
            items = req.batch.len(),
            "Stream ids near wraparound, opening batch items individually"
        );

        for name in &req.batch {
            let mut member = Item::new(
                ItemKind::Single(SingleItem::batch_member(&req, name)),
                req.domain_type,
                Arc::clone(&client),
                closure.clone(),
            );
            member.directory = Some(directory.clone());
            self.open_on_wire(member)?;
        }

        let domain_type = req.domain_type;
        let mut batch = Item::new(ItemKind::Batch(BatchItem::new(req)), domain_type, client, closure);
        batch.directory = Some(directory);
        self.register_deferred(batch, DeferredStatus::batch_closed())
    }

    /// Undo a batch whose members could not all be registered
    fn discard_batch(&mut self, batch_id: ItemId) {
        let members = match self.st.registry.get(batch_id).map(|item| &item.kind) {
            Some(ItemKind::Batch(batch)) => batch.members.clone(),
            _ => Vec::new(),
        };
        for member in members {
            self.remove_item(member);
        }
        self.remove_item(batch_id);
    }

    /// Register a publishing stream; nothing is sent until the application
    /// submits a refresh
    pub(crate) fn open_publish(
        &mut self,
        req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        let domain_type = req.domain_type;
        let resolved = self.resolve(req.service_name.as_deref(), req.service_id);
        let mut item = Item::new(ItemKind::Single(SingleItem::new(req)), domain_type, client, closure);

        match resolved {
            Ok(directory) => {
                item.directory = Some(directory);
                let stream_id = self.next_stream_id(0)?;
                let (handle, _) = self.insert(item, Some(stream_id))?;
                tracing::trace!(handle = %handle, stream_id, "Opened publishing stream");
                Ok(handle)
            }
            Err(status) => self.register_deferred(item, status),
        }
    }

    pub(crate) fn open_tunnel(
        &mut self,
        req: TunnelStreamRequest,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        let domain_type = req.domain_type;
        let resolved = self.resolve(req.service_name.as_deref(), req.service_id);
        let mut item = Item::new(
            ItemKind::Tunnel(TunnelItem::new(req.clone())),
            domain_type,
            client,
            closure,
        );

        let directory = match resolved {
            Ok(directory) => directory,
            Err(status) => return self.register_deferred(item, status),
        };
        let channel = self.channel_for(Some(directory.channel))?;
        item.directory = Some(directory);

        let stream_id = self.next_stream_id(0)?;
        let (handle, _) = self.insert(item, Some(stream_id))?;
        channel
            .open_tunnel_stream(stream_id, &req)
            .map_err(|err| Error::submit_failed(Some(handle), &err))?;

        tracing::debug!(handle = %handle, stream_id, name = %req.name, "Opening tunnel stream");
        Ok(handle)
    }

    /// Open a sub-stream inside the tunnel identified by `parent`
    fn open_sub(
        &mut self,
        req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
        parent: Handle,
    ) -> Result<Handle> {
        let domain_type = req.domain_type;
        let parent_id = self.st.registry.lookup_by_handle(parent);
        let tunnel_open = parent_id
            .and_then(|p| self.st.registry.get(p))
            .and_then(|p| match &p.kind {
                ItemKind::Tunnel(tunnel) => Some(tunnel.is_open()),
                _ => None,
            });

        let parent_id = match (parent_id, tunnel_open) {
            (Some(parent_id), Some(true)) => parent_id,
            (_, Some(false)) => return Err(tunnel_not_open()),
            _ => {
                let item = Item::new(ItemKind::Single(SingleItem::new(req)), domain_type, client, closure);
                return self.register_deferred(
                    item,
                    DeferredStatus::closed(format!(
                        "Parent handle {parent} does not identify a tunnel stream"
                    )),
                );
            }
        };

        let Some(tunnel) = self.tunnel_mut(parent_id) else {
            return Err(tunnel_not_open());
        };
        let sub_stream_id = tunnel.subs.allocate(req.stream_id)?;
        let directory = self
            .st
            .registry
            .get(parent_id)
            .and_then(|p| p.directory.clone());

        let mut item = Item::new(
            ItemKind::Sub(SubItem::new(req, sub_stream_id)),
            domain_type,
            client,
            closure,
        );
        item.parent = Some(parent_id);
        item.directory = directory;

        let (handle, id) = match self.insert(item, None) {
            Ok(registered) => registered,
            Err(err) => {
                if let Some(tunnel) = self.tunnel_mut(parent_id) {
                    tunnel.subs.unreserve(sub_stream_id);
                }
                return Err(err);
            }
        };
        if let Some(tunnel) = self.tunnel_mut(parent_id) {
            tunnel.subs.insert(sub_stream_id, id);
        }
        self.send_request(id, handle, sub_stream_id)?;

        tracing::trace!(handle = %handle, sub_stream_id, parent = %parent, "Opened sub-stream");
        Ok(handle)
    }

    /// Send a request to a client channel (interactive provider)
    fn open_provider(
        &mut self,
        mut req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        let domain_type = req.domain_type;
        let Some(channel) = req.channel else {
            let item = Item::new(ItemKind::Single(SingleItem::new(req)), domain_type, client, closure);
            return self.register_deferred(
                item,
                DeferredStatus::closed("Passed in request message does not specify a client channel."),
            );
        };

        let directory = match (&req.service_name, req.service_id) {
            (None, None) => None,
            (name, id) => match self.resolve_service(name.as_deref(), id) {
                Ok(directory) => Some(Directory { channel, ..directory }),
                Err(status) => {
                    let item = Item::new(ItemKind::Single(SingleItem::new(req)), domain_type, client, closure);
                    return self.register_deferred(item, status);
                }
            },
        };
        if let Some(directory) = &directory {
            req.service_id.get_or_insert(directory.service_id);
        }

        let mut item = Item::new(
            ItemKind::ProviderSingle(ProviderSingleItem::new(req, channel)),
            domain_type,
            client,
            closure,
        );
        item.directory = directory;
        if self.st.channels.active_channel(channel).is_none() {
            return self.register_deferred(item, DeferredStatus::closed_recover("No active channel"));
        }

        let stream_id = self.next_stream_id(0)?;
        let (handle, id) = self.insert(item, Some(stream_id))?;
        self.st.watchlist.add(id);
        self.send_request(id, handle, stream_id)?;
        self.arm_request_timer(id);

        tracing::trace!(handle = %handle, stream_id, channel = %channel, "Sent provider request");
        Ok(handle)
    }
}

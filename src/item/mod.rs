//! Item variants
//!
//! An [`Item`] is one logical stream. The fields every variant shares live on
//! `Item`; the variant-specific state lives in [`ItemKind`]. Operations that
//! differ by variant dispatch on the kind in one place each (`check_modify`,
//! `check_submit`, `check_close` here; open and removal in the engine).

pub mod client;
pub mod provider;
pub mod single;
pub mod tunnel;

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorCode, Result};
use crate::msg::{MsgClass, MsgKey};
use crate::registry::{Handle, ItemId, StreamId};
use crate::session::deferred::DeferredStatus;
use crate::session::{ChannelId, Role};

pub use client::{ChannelInfo, Closure, EventContext, ItemClient};
pub(crate) use client::Notification;
pub use provider::ProviderSingleItem;
pub use single::{BatchItem, SingleItem};
pub use tunnel::{SubItem, SubStreamTable, TunnelItem, FIRST_SUB_STREAM_ID};

/// Resolved binding of a service to the channel serving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub service_name: String,
    pub service_id: u16,
    pub channel: ChannelId,
}

impl Directory {
    pub fn new(service_name: impl Into<String>, service_id: u16, channel: ChannelId) -> Self {
        Self {
            service_name: service_name.into(),
            service_id,
            channel,
        }
    }
}

/// Variant-specific item state
#[derive(Debug)]
pub enum ItemKind {
    Single(SingleItem),
    Batch(BatchItem),
    Tunnel(TunnelItem),
    Sub(SubItem),
    ProviderSingle(ProviderSingleItem),
}

impl ItemKind {
    /// Short variant name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Single(_) => "single",
            ItemKind::Batch(_) => "batch",
            ItemKind::Tunnel(_) => "tunnel",
            ItemKind::Sub(_) => "sub",
            ItemKind::ProviderSingle(_) => "provider",
        }
    }
}

/// One logical stream
pub struct Item {
    /// Key in the handle map, cleared on removal
    pub(crate) handle: Option<Handle>,
    /// Key in the stream id map, cleared on removal
    pub(crate) stream_id: Option<StreamId>,
    pub(crate) domain_type: u8,
    /// Owning batch or tunnel
    pub(crate) parent: Option<ItemId>,
    pub(crate) closure: Closure,
    pub(crate) client: Arc<dyn ItemClient>,
    pub(crate) directory: Option<Directory>,
    /// Pending synthetic terminal status; an item with one never touches the wire
    pub(crate) deferred: Option<DeferredStatus>,
    pub(crate) kind: ItemKind,
}

impl Item {
    pub(crate) fn new(
        kind: ItemKind,
        domain_type: u8,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Self {
        Self {
            handle: None,
            stream_id: None,
            domain_type,
            parent: None,
            closure,
            client,
            directory: None,
            deferred: None,
            kind,
        }
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn stream_id(&self) -> Option<StreamId> {
        self.stream_id
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// Channel this item is bound to
    pub fn channel(&self) -> Option<ChannelId> {
        match &self.kind {
            ItemKind::ProviderSingle(p) => Some(p.channel),
            _ => self.directory.as_ref().map(|d| d.channel),
        }
    }

    /// Service name to stamp on notifications
    pub fn service_name(&self) -> Option<&str> {
        self.directory.as_ref().map(|d| d.service_name.as_str())
    }

    /// Key reported on synthesized statuses
    pub(crate) fn status_key(&self) -> Option<MsgKey> {
        match &self.kind {
            ItemKind::Single(s) => Some(s.request.key()),
            ItemKind::Batch(_) => None,
            ItemKind::Tunnel(t) => Some(t.request.key()),
            ItemKind::Sub(s) => Some(s.request.key()),
            ItemKind::ProviderSingle(p) => Some(p.key.clone()),
        }
    }

    /// Whether a reissue is allowed on this kind of item
    pub(crate) fn check_modify(&self) -> Result<()> {
        match self.kind {
            ItemKind::Batch(_) => Err(Error::invalid_usage(
                ErrorCode::InvalidOperation,
                "Invalid attempt to modify batch stream",
            )),
            ItemKind::Tunnel(_) => Err(Error::invalid_usage(
                ErrorCode::InvalidOperation,
                "Invalid attempt to modify tunnel stream",
            )),
            ItemKind::Single(_) | ItemKind::Sub(_) | ItemKind::ProviderSingle(_) => Ok(()),
        }
    }

    /// Whether a message of `class` may be submitted on this item
    pub(crate) fn check_submit(&self, class: MsgClass, role: Role) -> Result<()> {
        let allowed = match self.kind {
            // consumers talk upstream with posts and generics only
            ItemKind::Single(_) if role == Role::Consumer => {
                matches!(class, MsgClass::Generic | MsgClass::Post)
            }
            ItemKind::Single(_) => matches!(
                class,
                MsgClass::Refresh | MsgClass::Update | MsgClass::Status | MsgClass::Generic
            ),
            ItemKind::Sub(_) => matches!(class, MsgClass::Generic | MsgClass::Post),
            ItemKind::ProviderSingle(_) => class == MsgClass::Generic,
            ItemKind::Batch(_) | ItemKind::Tunnel(_) => false,
        };

        if allowed {
            return Ok(());
        }
        Err(Error::invalid_usage(
            ErrorCode::InvalidOperation,
            format!(
                "Invalid attempt to submit {:?}Msg on {} stream",
                class,
                self.kind.name()
            ),
        ))
    }

    /// Whether the application may close this item directly
    pub(crate) fn check_close(&self) -> Result<()> {
        match self.kind {
            ItemKind::Batch(_) => Err(Error::invalid_usage(
                ErrorCode::InvalidOperation,
                "Invalid attempt to close batch stream",
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("handle", &self.handle)
            .field("stream_id", &self.stream_id)
            .field("domain_type", &self.domain_type)
            .field("parent", &self.parent)
            .field("directory", &self.directory)
            .field("deferred", &self.deferred.is_some())
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::msg::{ReqMsg, TunnelStreamRequest};
    use crate::test_support::RecordingClient;

    fn item(kind: ItemKind) -> Item {
        Item::new(kind, 6, Arc::new(RecordingClient::default()), None)
    }

    #[test]
    fn test_batch_rejects_modify_submit_close() {
        let batch = item(ItemKind::Batch(BatchItem::new(ReqMsg::new().batch(["A", "B"]))));

        let err = batch.check_modify().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidOperation));
        assert_err!(batch.check_submit(MsgClass::Post, Role::Consumer));
        assert_err!(batch.check_submit(MsgClass::Generic, Role::Consumer));
        assert_err!(batch.check_close());
    }

    #[test]
    fn test_tunnel_rejects_modify_and_post() {
        let tunnel = item(ItemKind::Tunnel(TunnelItem::new(TunnelStreamRequest::new("tunnel"))));

        assert_err!(tunnel.check_modify());
        let err = tunnel.check_submit(MsgClass::Post, Role::Consumer).unwrap_err();
        assert!(err.to_string().contains("PostMsg on tunnel stream"));
        assert_ok!(tunnel.check_close());
    }

    #[test]
    fn test_provider_item_submits_generic_only() {
        let provider = item(ItemKind::ProviderSingle(ProviderSingleItem::new(
            ReqMsg::new().name("IBM.N").service_id(1),
            ChannelId::new(0),
        )));

        assert_ok!(provider.check_submit(MsgClass::Generic, Role::InteractiveProvider));
        assert_err!(provider.check_submit(MsgClass::Post, Role::InteractiveProvider));
        assert_ok!(provider.check_modify());
    }

    #[test]
    fn test_consumer_single_submits_post_and_generic() {
        let single = item(ItemKind::Single(SingleItem::new(ReqMsg::new().name("IBM.N"))));

        assert_ok!(single.check_submit(MsgClass::Post, Role::Consumer));
        assert_ok!(single.check_submit(MsgClass::Generic, Role::Consumer));
        let err = single.check_submit(MsgClass::Refresh, Role::Consumer).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidOperation));
        assert_err!(single.check_submit(MsgClass::Update, Role::Consumer));
        assert_err!(single.check_submit(MsgClass::Status, Role::Consumer));
        assert_ok!(single.check_modify());
    }

    #[test]
    fn test_publishing_stream_submits() {
        let single = item(ItemKind::Single(SingleItem::new(ReqMsg::new().name("IBM.N"))));

        assert_ok!(single.check_submit(MsgClass::Refresh, Role::NiProvider));
        assert_ok!(single.check_submit(MsgClass::Update, Role::NiProvider));
        assert_ok!(single.check_submit(MsgClass::Status, Role::NiProvider));
        assert_ok!(single.check_submit(MsgClass::Generic, Role::NiProvider));
        assert_err!(single.check_submit(MsgClass::Post, Role::NiProvider));
        assert_err!(single.check_submit(MsgClass::Request, Role::NiProvider));
    }
}

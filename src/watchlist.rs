//! Provider item watch list
//!
//! Tracks every provider-originated item so that channel loss, login close,
//! and service deletion can be fanned out to the right items, and validates
//! responses before the application sees them.

use std::collections::BTreeSet;

use crate::item::{ItemKind, ProviderSingleItem};
use crate::msg::{Msg, MsgClass, MsgKey};
use crate::registry::{ItemId, ItemRegistry};
use crate::session::ChannelId;

/// Outcome of checking a response against its request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCheck {
    Deliver,
    /// First refresh does not answer the request that was sent
    Mismatch,
}

/// Set of live provider items
#[derive(Debug, Default)]
pub struct ItemWatchList {
    items: BTreeSet<ItemId>,
}

impl ItemWatchList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ItemId) {
        self.items.insert(id);
    }

    pub fn remove(&mut self, id: ItemId) -> bool {
        self.items.remove(&id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn select(
        &self,
        registry: &ItemRegistry,
        filter: impl Fn(&ProviderSingleItem) -> bool,
    ) -> Vec<ItemId> {
        self.items
            .iter()
            .copied()
            .filter(|&id| match registry.get(id).map(|item| &item.kind) {
                Some(ItemKind::ProviderSingle(p)) => filter(p),
                _ => false,
            })
            .collect()
    }

    /// Items sent on a channel
    pub fn items_on_channel(&self, registry: &ItemRegistry, channel: ChannelId) -> Vec<ItemId> {
        self.select(registry, |p| p.channel == channel)
    }

    /// Items requested with `service_id`, optionally only on one channel
    ///
    /// Items opened without any service are left alone.
    pub fn items_for_service(
        &self,
        registry: &ItemRegistry,
        channel: Option<ChannelId>,
        service_id: u16,
    ) -> Vec<ItemId> {
        self.select(registry, |p| {
            p.has_service()
                && p.service_id() == Some(service_id)
                && channel.map_or(true, |c| p.channel == c)
        })
    }
}

/// Validate a response for a provider item and fill in its key
///
/// The first refresh must match the stored domain type and key. Refresh and
/// status messages without a key get the stored one.
pub fn check_response(item: &mut ProviderSingleItem, domain_type: u8, msg: &mut Msg) -> ResponseCheck {
    if msg.class == MsgClass::Refresh && !item.received_initial {
        item.received_initial = true;
        if msg.domain_type != domain_type {
            return ResponseCheck::Mismatch;
        }
        if let Some(key) = &msg.key {
            if !keys_match(key, &item.key) {
                return ResponseCheck::Mismatch;
            }
        }
    }

    if matches!(msg.class, MsgClass::Refresh | MsgClass::Status) && msg.key.is_none() {
        msg.key = Some(item.key.clone());
    }
    ResponseCheck::Deliver
}

/// Keys match when every attribute present on both sides is equal
fn keys_match(received: &MsgKey, requested: &MsgKey) -> bool {
    fn same<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    same(&received.name, &requested.name)
        && same(&received.name_type, &requested.name_type)
        && same(&received.service_id, &requested.service_id)
        && same(&received.filter, &requested.filter)
        && same(&received.identifier, &requested.identifier)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::item::Item;
    use crate::msg::{domain, ReqMsg, State};
    use crate::registry::Handle;
    use crate::test_support::RecordingClient;

    fn provider_item(req: ReqMsg, channel: usize) -> Item {
        Item::new(
            ItemKind::ProviderSingle(ProviderSingleItem::new(req, ChannelId::new(channel))),
            domain::DICTIONARY,
            Arc::new(RecordingClient::default()),
            None,
        )
    }

    #[test]
    fn test_fan_out_selection() {
        let mut registry = ItemRegistry::default();
        let mut watchlist = ItemWatchList::new();

        let a = registry.register(Handle::new(1), provider_item(ReqMsg::new().name("A").service_id(1), 0));
        let b = registry.register(Handle::new(2), provider_item(ReqMsg::new().name("B").service_id(2), 0));
        let c = registry.register(Handle::new(3), provider_item(ReqMsg::new().name("C").service_id(1), 1));
        let d = registry.register(Handle::new(4), provider_item(ReqMsg::new().name("D"), 1));
        for id in [a, b, c, d] {
            watchlist.add(id);
        }

        assert_eq!(watchlist.items_on_channel(&registry, ChannelId::new(0)), vec![a, b]);
        assert_eq!(watchlist.items_for_service(&registry, None, 1), vec![a, c]);
        assert_eq!(
            watchlist.items_for_service(&registry, Some(ChannelId::new(1)), 1),
            vec![c]
        );

        registry.remove(a);
        assert_eq!(watchlist.items_on_channel(&registry, ChannelId::new(0)), vec![b]);
    }

    #[test]
    fn test_keyless_response_gets_stored_key() {
        let mut item = ProviderSingleItem::new(ReqMsg::new().name("RWFFld").service_id(1), ChannelId::new(0));
        let mut refresh = Msg::refresh(-1, domain::DICTIONARY, State::open_ok());

        assert_eq!(check_response(&mut item, domain::DICTIONARY, &mut refresh), ResponseCheck::Deliver);
        assert_eq!(refresh.key.as_ref().and_then(|k| k.name.as_deref()), Some("RWFFld"));
        assert!(item.received_initial);
    }

    #[test]
    fn test_initial_mismatch() {
        let mut item = ProviderSingleItem::new(ReqMsg::new().name("RWFFld").service_id(1), ChannelId::new(0));
        let mut refresh = Msg::refresh(-1, domain::DICTIONARY, State::open_ok())
            .with_key(MsgKey::with_name("RWFEnum"));
        assert_eq!(check_response(&mut item, domain::DICTIONARY, &mut refresh), ResponseCheck::Mismatch);

        let mut item = ProviderSingleItem::new(ReqMsg::new().name("RWFFld"), ChannelId::new(0));
        let mut refresh = Msg::refresh(-1, domain::MARKET_PRICE, State::open_ok());
        assert_eq!(check_response(&mut item, domain::DICTIONARY, &mut refresh), ResponseCheck::Mismatch);
    }

    #[test]
    fn test_only_first_refresh_validated() {
        let mut item = ProviderSingleItem::new(ReqMsg::new().name("RWFFld"), ChannelId::new(0));
        let mut first = Msg::refresh(-1, domain::DICTIONARY, State::open_ok());
        check_response(&mut item, domain::DICTIONARY, &mut first);

        let mut second = Msg::refresh(-1, domain::DICTIONARY, State::open_ok())
            .with_key(MsgKey::with_name("other"));
        assert_eq!(check_response(&mut item, domain::DICTIONARY, &mut second), ResponseCheck::Deliver);
    }
}

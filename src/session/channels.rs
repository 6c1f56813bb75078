//! Channel set and reactor initialization

use std::fmt;
use std::sync::Arc;

use slab::Slab;

use super::config::{ChannelConfig, SessionConfig};
use super::state::{CallbackReturn, ChannelEventKind, ChannelSession, Connectivity};
use crate::error::{Error, ErrorCode, Result, TransportError};
use crate::item::ChannelInfo;
use crate::transport::{ConnectOptions, ConnectionInfo, Reactor, ReactorChannel, Selector};

/// Token identifying a channel session; round-tripped through the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(usize);

impl ChannelId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every channel of a session
#[derive(Debug, Default)]
pub struct ChannelSet {
    sessions: Slab<ChannelSession>,
    /// First Ready of the session already seen
    initial_ready: bool,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every configured channel and issue one connect call
    ///
    /// Unsupported connection types are all reported in one error before
    /// anything is registered. If the connect call fails, every slot
    /// registered here is removed again.
    pub fn initialize_reactor(
        &mut self,
        config: &SessionConfig,
        reactor: &dyn Reactor,
    ) -> Result<Vec<ChannelId>> {
        if config.channels.is_empty() {
            return Err(Error::invalid_usage(
                ErrorCode::InvalidArgument,
                "No channel configured",
            ));
        }

        let unsupported: Vec<String> = config
            .channels
            .iter()
            .filter(|c| !c.connection_type.is_supported())
            .map(|c| format!("{} for {}", c.connection_type, c.name))
            .collect();
        if !unsupported.is_empty() {
            let text = format!(
                "Unsupported connection type. Passed in type is {}",
                unsupported.join(", ")
            );
            tracing::error!(instance = %config.instance_name, "{}", text);
            return Err(Error::invalid_usage(ErrorCode::UnsupportedChannelType, text));
        }

        let mut connections = Vec::with_capacity(config.channels.len());
        for channel_config in &config.channels {
            let entry = self.sessions.vacant_entry();
            let id = ChannelId(entry.key());
            entry.insert(ChannelSession::new(id, channel_config.clone()));
            connections.push(ConnectionInfo {
                channel: id,
                config: channel_config.clone(),
            });
        }

        let options = ConnectOptions {
            connections,
            reconnect_attempt_limit: config.reconnect_attempt_limit,
            reconnect_min_delay: config.reconnect_min_delay,
            reconnect_max_delay: config.reconnect_max_delay,
        };

        let ids: Vec<ChannelId> = options.connections.iter().map(|c| c.channel).collect();
        if let Err(source) = reactor.connect(&options, config.role) {
            return Err(self.rollback(&ids, source));
        }

        tracing::info!(
            instance = %config.instance_name,
            channels = ids.len(),
            "Connecting channels"
        );
        Ok(ids)
    }

    /// Track a channel accepted from a client
    ///
    /// Events for it arrive through the same path as connected channels.
    pub fn accept(&mut self, config: ChannelConfig) -> ChannelId {
        let entry = self.sessions.vacant_entry();
        let id = ChannelId(entry.key());
        tracing::debug!(channel = %config.name, id = %id, "Accepted client channel");
        entry.insert(ChannelSession::new(id, config));
        id
    }

    fn rollback(&mut self, ids: &[ChannelId], source: TransportError) -> Error {
        let names: Vec<String> = ids
            .iter()
            .filter_map(|id| self.sessions.try_remove(id.0))
            .map(|session| session.name().to_string())
            .collect();
        let channels = names.join(", ");

        tracing::error!(channels = %channels, error = %source, "Failed to add channel(s) to reactor");
        Error::ConnectFailed { channels, source }
    }

    /// Apply a transport event to a channel
    pub(crate) fn on_event(
        &mut self,
        id: ChannelId,
        kind: ChannelEventKind,
        channel: &Arc<dyn ReactorChannel>,
        error: Option<&TransportError>,
        selector: &dyn Selector,
    ) -> (CallbackReturn, Option<Connectivity>) {
        let Some(session) = self.sessions.get_mut(id.0) else {
            tracing::error!(channel = %id, "Received event for unknown channel");
            return (CallbackReturn::Failure, None);
        };

        let (ret, fan_out) = session.handle_event(kind, channel, error, selector);
        if fan_out == Some(Connectivity::Ready) && !self.initial_ready {
            self.initial_ready = true;
            return (ret, None);
        }
        (ret, fan_out)
    }

    /// Whether any channel has reached Ready
    pub fn initial_ready(&self) -> bool {
        self.initial_ready
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelSession> {
        self.sessions.get(id.0)
    }

    /// Channel usable for requests
    pub fn active_channel(&self, id: ChannelId) -> Option<&Arc<dyn ReactorChannel>> {
        self.sessions
            .get(id.0)
            .filter(|s| s.is_active())
            .and_then(ChannelSession::channel)
    }

    pub fn info(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.sessions.get(id.0).map(|s| ChannelInfo {
            id,
            name: s.name().to_string(),
        })
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.sessions.iter().map(|(key, _)| ChannelId(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Release every channel
    pub(crate) fn close_all(&mut self, selector: &dyn Selector) {
        for (_, session) in self.sessions.iter_mut() {
            session.close(selector);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::config::ConnectionType;
    use crate::session::state::ChannelState;
    use crate::test_support::{MockChannel, MockReactor, MockSelector};

    fn two_channels() -> SessionConfig {
        SessionConfig::consumer("Consumer_1")
            .channel(ChannelConfig::new("Channel_1"))
            .channel(ChannelConfig::new("Channel_2").connection_type(ConnectionType::Encrypted))
    }

    #[test]
    fn test_initialize_registers_every_channel() {
        let reactor = MockReactor::default();
        let mut set = ChannelSet::new();

        let ids = set.initialize_reactor(&two_channels(), &reactor).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(ids[1]).unwrap().name(), "Channel_2");
        assert_eq!(set.get(ids[0]).unwrap().state(), ChannelState::Initializing);

        let options = reactor.last_options().unwrap();
        assert_eq!(options.connections.len(), 2);
        assert_eq!(options.reconnect_attempt_limit, -1);
    }

    #[test]
    fn test_unsupported_types_aggregated() {
        let reactor = MockReactor::default();
        let mut set = ChannelSet::new();
        let config = two_channels()
            .channel(ChannelConfig::new("Channel_3").connection_type(ConnectionType::WebSocket))
            .channel(ChannelConfig::new("Channel_4").connection_type(ConnectionType::ReliableMcast));

        let err = set.initialize_reactor(&config, &reactor).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UnsupportedChannelType));
        let text = err.to_string();
        assert!(text.contains("RSSL_WEBSOCKET for Channel_3"));
        assert!(text.contains("RSSL_RELIABLE_MCAST for Channel_4"));

        assert!(set.is_empty());
        assert!(reactor.last_options().is_none());
    }

    #[test]
    fn test_connect_failure_rolls_back() {
        let reactor = MockReactor::default();
        reactor.fail_connect(TransportError::new(-1, "connection refused"));
        let mut set = ChannelSet::new();

        let err = set.initialize_reactor(&two_channels(), &reactor).unwrap_err();
        match err {
            Error::ConnectFailed { channels, source } => {
                assert_eq!(channels, "Channel_1, Channel_2");
                assert_eq!(source.text, "connection refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(set.is_empty());
    }

    #[test]
    fn test_first_ready_not_forwarded() {
        let reactor = MockReactor::default();
        let selector = MockSelector::default();
        let mut set = ChannelSet::new();
        let ids = set.initialize_reactor(&two_channels(), &reactor).unwrap();
        let channel: Arc<dyn ReactorChannel> = Arc::new(MockChannel::new(3));

        set.on_event(ids[0], ChannelEventKind::Up, &channel, None, &selector);
        let (_, fan_out) = set.on_event(ids[0], ChannelEventKind::Ready, &channel, None, &selector);
        assert!(fan_out.is_none());
        assert!(set.initial_ready());
        assert!(set.get(ids[0]).is_some_and(|s| s.is_active()));

        let (_, fan_out) = set.on_event(ids[0], ChannelEventKind::Ready, &channel, None, &selector);
        assert_eq!(fan_out, Some(Connectivity::Ready));
    }

    #[test]
    fn test_accepted_channels_get_fresh_ids() {
        let mut set = ChannelSet::new();
        let a = set.accept(ChannelConfig::new("client_1"));
        let b = set.accept(ChannelConfig::new("client_2"));

        assert_ne!(a, b);
        assert_eq!(set.info(b).unwrap().name, "client_2");
        assert!(set.active_channel(a).is_none());
    }

    #[test]
    fn test_event_for_unknown_channel() {
        let selector = MockSelector::default();
        let mut set = ChannelSet::new();
        let channel: Arc<dyn ReactorChannel> = Arc::new(MockChannel::new(3));

        let (ret, _) = set.on_event(ChannelId::new(9), ChannelEventKind::Up, &channel, None, &selector);
        assert_eq!(ret, CallbackReturn::Failure);
    }
}

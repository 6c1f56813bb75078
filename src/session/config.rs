//! Session and channel configuration

use std::fmt;
use std::time::Duration;

/// Which side of the protocol the session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    NiProvider,
    InteractiveProvider,
}

/// Transport flavour of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Socket,
    Http,
    Encrypted,
    WebSocket,
    ReliableMcast,
    Unidirectional,
}

impl ConnectionType {
    /// Whether the engine can drive this transport
    pub fn is_supported(self) -> bool {
        matches!(
            self,
            ConnectionType::Socket | ConnectionType::Http | ConnectionType::Encrypted
        )
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionType::Socket => "RSSL_SOCKET",
            ConnectionType::Http => "RSSL_HTTP",
            ConnectionType::Encrypted => "RSSL_ENCRYPTED",
            ConnectionType::WebSocket => "RSSL_WEBSOCKET",
            ConnectionType::ReliableMcast => "RSSL_RELIABLE_MCAST",
            ConnectionType::Unidirectional => "RSSL_UNIDIR_SHMEM",
        };
        f.write_str(name)
    }
}

/// Configuration of one physical channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Name used in logs and errors
    pub name: String,

    pub connection_type: ConnectionType,

    pub host: String,

    pub port: u16,

    /// OS send buffer size (0 = leave as is)
    pub sys_send_buf_size: u32,

    /// OS receive buffer size (0 = leave as is)
    pub sys_recv_buf_size: u32,

    /// Compression threshold, applied only when set
    pub compression_threshold: Option<u32>,

    /// Output high-water mark (0 = unset)
    pub high_water_mark: u32,

    /// Time allowed for channel initialization
    pub init_timeout: Duration,

    pub guaranteed_output_buffers: u32,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "Channel_1".to_string(),
            connection_type: ConnectionType::Socket,
            host: "localhost".to_string(),
            port: 14002,
            sys_send_buf_size: 0,
            sys_recv_buf_size: 0,
            compression_threshold: None,
            high_water_mark: 0,
            init_timeout: Duration::from_secs(5),
            guaranteed_output_buffers: 100,
            tcp_nodelay: true,
        }
    }
}

impl ChannelConfig {
    /// Create a socket channel config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set OS send and receive buffer sizes
    pub fn sys_buffers(mut self, send: u32, recv: u32) -> Self {
        self.sys_send_buf_size = send;
        self.sys_recv_buf_size = recv;
        self
    }

    pub fn compression_threshold(mut self, threshold: u32) -> Self {
        self.compression_threshold = Some(threshold);
        self
    }

    pub fn high_water_mark(mut self, mark: u32) -> Self {
        self.high_water_mark = mark;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

/// Configuration of an engine session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub role: Role,

    /// Name used in logs
    pub instance_name: String,

    pub channels: Vec<ChannelConfig>,

    /// Reconnect attempts before giving up (-1 = forever)
    pub reconnect_attempt_limit: i32,

    pub reconnect_min_delay: Duration,

    pub reconnect_max_delay: Duration,

    /// Delay before a synthetic closed status is delivered
    pub deferred_status_delay: Duration,

    /// Time a provider-originated request may wait for its response
    /// (zero disables the timer)
    pub request_timeout: Duration,

    /// Tick of the background timeout task
    pub timeout_poll_interval: Duration,

    /// Expected number of concurrent items, used to pre-size maps
    pub item_count_hint: usize,

    /// Drop non-interactive publishing streams when their channel goes down
    /// (otherwise they survive the reconnect)
    pub remove_items_on_disconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role: Role::Consumer,
            instance_name: "Consumer_1".to_string(),
            channels: Vec::new(),
            reconnect_attempt_limit: -1,
            reconnect_min_delay: Duration::from_millis(1000),
            reconnect_max_delay: Duration::from_millis(5000),
            deferred_status_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(15),
            timeout_poll_interval: Duration::from_millis(10),
            item_count_hint: 1024,
            remove_items_on_disconnect: false,
        }
    }
}

impl SessionConfig {
    pub fn consumer(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            ..Default::default()
        }
    }

    pub fn ni_provider(instance_name: impl Into<String>) -> Self {
        Self {
            role: Role::NiProvider,
            instance_name: instance_name.into(),
            ..Default::default()
        }
    }

    pub fn interactive_provider(instance_name: impl Into<String>) -> Self {
        Self {
            role: Role::InteractiveProvider,
            instance_name: instance_name.into(),
            ..Default::default()
        }
    }

    /// Add a channel
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn reconnect(mut self, limit: i32, min_delay: Duration, max_delay: Duration) -> Self {
        self.reconnect_attempt_limit = limit;
        self.reconnect_min_delay = min_delay;
        self.reconnect_max_delay = max_delay.max(min_delay);
        self
    }

    pub fn deferred_status_delay(mut self, delay: Duration) -> Self {
        self.deferred_status_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn timeout_poll_interval(mut self, interval: Duration) -> Self {
        self.timeout_poll_interval = interval;
        self
    }

    pub fn item_count_hint(mut self, hint: usize) -> Self {
        self.item_count_hint = if hint == 0 { 1024 } else { hint };
        self
    }

    pub fn remove_items_on_disconnect(mut self, enabled: bool) -> Self {
        self.remove_items_on_disconnect = enabled;
        self
    }
}

//! Collaborator interfaces
//!
//! The engine never touches sockets, bytes on the wire, or the service
//! directory itself. It drives these traits, and tests drive it through
//! in-memory implementations of them.

use std::time::Duration;

use bytes::BytesMut;

use crate::error::{CodecError, TransportError};
use crate::item::Directory;
use crate::msg::{Msg, TunnelStreamRequest};
use crate::registry::StreamId;
use crate::session::config::{ChannelConfig, Role};
use crate::session::ChannelId;

/// OS-level descriptor of a channel
pub type Descriptor = i64;

/// Per-channel option set through [`ReactorChannel::ioctl`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCode {
    SystemWriteBuffers,
    SystemReadBuffers,
    CompressionThreshold,
    HighWaterMark,
}

/// One endpoint of a connect call
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Token handed back unchanged on every channel event
    pub channel: ChannelId,
    pub config: ChannelConfig,
}

/// Arguments of [`Reactor::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connections: Vec<ConnectionInfo>,
    /// -1 retries forever
    pub reconnect_attempt_limit: i32,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
}

/// Transport reactor owning the physical connections
pub trait Reactor: Send + Sync {
    /// Start connecting every endpoint; events arrive later through
    /// `ItemEngine::on_channel_event`
    fn connect(&self, options: &ConnectOptions, role: Role) -> Result<(), TransportError>;
}

/// One physical channel as seen by the engine
pub trait ReactorChannel: Send + Sync {
    /// Current descriptor
    fn descriptor(&self) -> Descriptor;

    /// Descriptor before the most recent change
    fn old_descriptor(&self) -> Descriptor;

    /// Protocol version negotiated on the channel
    fn version(&self) -> (u8, u8);

    fn ioctl(&self, code: IoctlCode, value: u32) -> Result<(), TransportError>;

    /// Encode and send an envelope
    fn submit(&self, msg: &Msg) -> Result<(), TransportError>;

    /// Ask the peer to open a tunnel stream; the result arrives through
    /// `ItemEngine::on_tunnel_status`
    fn open_tunnel_stream(
        &self,
        stream_id: StreamId,
        request: &TunnelStreamRequest,
    ) -> Result<(), TransportError>;

    /// Release the channel
    fn close(&self) -> Result<(), TransportError>;
}

/// An open tunnel stream
pub trait TunnelStream: Send + Sync {
    /// Buffer with at least `size` bytes of capacity
    fn get_buffer(&self, size: usize) -> Result<BytesMut, TransportError>;

    /// Give back a buffer that will not be submitted
    fn release_buffer(&self, buffer: BytesMut);

    /// Send an encoded sub-stream message
    fn submit(&self, buffer: BytesMut, container_type: u8) -> Result<(), TransportError>;

    fn close(&self) -> Result<(), TransportError>;
}

/// Readiness selector the dispatch loop waits on
pub trait Selector: Send + Sync {
    fn register(&self, descriptor: Descriptor) -> Result<(), TransportError>;

    fn deregister(&self, descriptor: Descriptor);
}

/// Envelope codec
pub trait Codec: Send + Sync {
    fn decode(&self, raw: &[u8], major: u8, minor: u8) -> Result<Msg, CodecError>;

    /// Encode into `buffer`, failing with [`CodecError::BufferTooSmall`]
    /// instead of growing it past its capacity
    fn encode(&self, msg: &Msg, buffer: &mut BytesMut) -> Result<(), CodecError>;
}

/// Service name and id resolution
pub trait DirectoryStore: Send + Sync {
    fn resolve_by_name(&self, name: &str) -> Option<Directory>;

    fn resolve_by_id(&self, id: u16) -> Option<Directory>;
}

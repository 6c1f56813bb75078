//! In-memory collaborators for unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::error::{CodecError, TransportError};
use crate::item::{Directory, EventContext, ItemClient};
use crate::msg::{DataState, Msg, MsgClass, MsgKey, State, StreamState, TunnelStreamRequest};
use crate::registry::StreamId;
use crate::session::{ChannelId, Role};
use crate::transport::{
    Codec, ConnectOptions, Descriptor, DirectoryStore, IoctlCode, Reactor, ReactorChannel,
    Selector, TunnelStream,
};

/// Route engine logs to the test harness; `RUST_LOG` picks the level
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client that records everything it is handed
#[derive(Default)]
pub(crate) struct RecordingClient {
    events: Mutex<Vec<(Msg, EventContext)>>,
}

impl RecordingClient {
    pub(crate) fn events(&self) -> Vec<(Msg, EventContext)> {
        self.events.lock().clone()
    }

    pub(crate) fn msgs(&self) -> Vec<Msg> {
        self.events.lock().iter().map(|(msg, _)| msg.clone()).collect()
    }

    pub(crate) fn statuses(&self) -> Vec<Msg> {
        self.msgs()
            .into_iter()
            .filter(|msg| msg.class == MsgClass::Status)
            .collect()
    }

    pub(crate) fn count(&self) -> usize {
        self.events.lock().len()
    }
}

impl ItemClient for RecordingClient {
    fn on_all_msg(&self, msg: &Msg, ctx: &EventContext) {
        self.events.lock().push((msg.clone(), ctx.clone()));
    }
}

/// Transport channel that records what it is asked to do
pub(crate) struct MockChannel {
    descriptor: AtomicI64,
    old_descriptor: AtomicI64,
    ioctls: Mutex<Vec<(IoctlCode, u32)>>,
    failing_ioctl: Mutex<Option<IoctlCode>>,
    submitted: Mutex<Vec<Msg>>,
    fail_submit: AtomicBool,
    tunnel_opens: Mutex<Vec<StreamId>>,
    closed: AtomicBool,
}

impl MockChannel {
    pub(crate) fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor: AtomicI64::new(descriptor),
            old_descriptor: AtomicI64::new(descriptor),
            ioctls: Mutex::new(Vec::new()),
            failing_ioctl: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            fail_submit: AtomicBool::new(false),
            tunnel_opens: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn ioctls(&self) -> Vec<(IoctlCode, u32)> {
        self.ioctls.lock().clone()
    }

    pub(crate) fn fail_ioctl(&self, code: IoctlCode) {
        *self.failing_ioctl.lock() = Some(code);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn set_descriptor(&self, descriptor: Descriptor) {
        let old = self.descriptor.swap(descriptor, Ordering::SeqCst);
        self.old_descriptor.store(old, Ordering::SeqCst);
    }

    pub(crate) fn submitted(&self) -> Vec<Msg> {
        self.submitted.lock().clone()
    }

    pub(crate) fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn tunnel_opens(&self) -> Vec<StreamId> {
        self.tunnel_opens.lock().clone()
    }
}

impl ReactorChannel for MockChannel {
    fn descriptor(&self) -> Descriptor {
        self.descriptor.load(Ordering::SeqCst)
    }

    fn old_descriptor(&self) -> Descriptor {
        self.old_descriptor.load(Ordering::SeqCst)
    }

    fn version(&self) -> (u8, u8) {
        (14, 1)
    }

    fn ioctl(&self, code: IoctlCode, value: u32) -> Result<(), TransportError> {
        if *self.failing_ioctl.lock() == Some(code) {
            return Err(TransportError::new(-1, format!("ioctl {code:?} failed")));
        }
        self.ioctls.lock().push((code, value));
        Ok(())
    }

    fn submit(&self, msg: &Msg) -> Result<(), TransportError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(TransportError::new(-4, "no buffers").at("MockChannel::submit"));
        }
        self.submitted.lock().push(msg.clone());
        Ok(())
    }

    fn open_tunnel_stream(
        &self,
        stream_id: StreamId,
        _request: &TunnelStreamRequest,
    ) -> Result<(), TransportError> {
        self.tunnel_opens.lock().push(stream_id);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Selector that tracks registered descriptors
#[derive(Default)]
pub(crate) struct MockSelector {
    registered: Mutex<HashSet<Descriptor>>,
    failing: Mutex<HashSet<Descriptor>>,
}

impl MockSelector {
    pub(crate) fn is_registered(&self, descriptor: Descriptor) -> bool {
        self.registered.lock().contains(&descriptor)
    }

    pub(crate) fn fail_register(&self, descriptor: Descriptor) {
        self.failing.lock().insert(descriptor);
    }
}

impl Selector for MockSelector {
    fn register(&self, descriptor: Descriptor) -> Result<(), TransportError> {
        if self.failing.lock().contains(&descriptor) {
            return Err(TransportError::new(-1, "register failed"));
        }
        self.registered.lock().insert(descriptor);
        Ok(())
    }

    fn deregister(&self, descriptor: Descriptor) {
        self.registered.lock().remove(&descriptor);
    }
}

/// Reactor that remembers the last connect call
#[derive(Default)]
pub(crate) struct MockReactor {
    last: Mutex<Option<ConnectOptions>>,
    failure: Mutex<Option<TransportError>>,
}

impl MockReactor {
    pub(crate) fn last_options(&self) -> Option<ConnectOptions> {
        self.last.lock().clone()
    }

    pub(crate) fn fail_connect(&self, err: TransportError) {
        *self.failure.lock() = Some(err);
    }
}

impl Reactor for MockReactor {
    fn connect(&self, options: &ConnectOptions, _role: Role) -> Result<(), TransportError> {
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        *self.last.lock() = Some(options.clone());
        Ok(())
    }
}

/// Tunnel stream that records buffer traffic
#[derive(Default)]
pub(crate) struct MockTunnel {
    requested: Mutex<Vec<usize>>,
    released: AtomicUsize,
    submitted: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
}

impl MockTunnel {
    pub(crate) fn requested_sizes(&self) -> Vec<usize> {
        self.requested.lock().clone()
    }

    pub(crate) fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<Bytes> {
        self.submitted.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TunnelStream for MockTunnel {
    fn get_buffer(&self, size: usize) -> Result<BytesMut, TransportError> {
        self.requested.lock().push(size);
        Ok(BytesMut::with_capacity(size))
    }

    fn release_buffer(&self, _buffer: BytesMut) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn submit(&self, buffer: BytesMut, _container_type: u8) -> Result<(), TransportError> {
        self.submitted.lock().push(buffer.freeze());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Compact binary codec
///
/// Layout: class, stream id, domain, stream state, optional name, payload.
/// Encoding never grows the target past its capacity.
#[derive(Default)]
pub(crate) struct MockCodec;

fn class_code(class: MsgClass) -> u8 {
    match class {
        MsgClass::Request => 1,
        MsgClass::Refresh => 2,
        MsgClass::Status => 3,
        MsgClass::Update => 4,
        MsgClass::Close => 5,
        MsgClass::Ack => 6,
        MsgClass::Generic => 7,
        MsgClass::Post => 8,
    }
}

fn class_from(code: u8) -> Result<MsgClass, CodecError> {
    Ok(match code {
        1 => MsgClass::Request,
        2 => MsgClass::Refresh,
        3 => MsgClass::Status,
        4 => MsgClass::Update,
        5 => MsgClass::Close,
        6 => MsgClass::Ack,
        7 => MsgClass::Generic,
        8 => MsgClass::Post,
        other => return Err(CodecError::Malformed(format!("unknown class {other}"))),
    })
}

fn state_code(state: Option<StreamState>) -> u8 {
    match state {
        None | Some(StreamState::Unspecified) => 0,
        Some(StreamState::Open) => 1,
        Some(StreamState::NonStreaming) => 2,
        Some(StreamState::ClosedRecover) => 3,
        Some(StreamState::Closed) => 4,
        Some(StreamState::Redirected) => 5,
    }
}

fn state_from(code: u8) -> Option<StreamState> {
    match code {
        1 => Some(StreamState::Open),
        2 => Some(StreamState::NonStreaming),
        3 => Some(StreamState::ClosedRecover),
        4 => Some(StreamState::Closed),
        5 => Some(StreamState::Redirected),
        _ => None,
    }
}

impl MockCodec {
    /// Encode into a fresh, unbounded buffer
    pub(crate) fn to_bytes(msg: &Msg) -> Bytes {
        let name_len = msg.key.as_ref().and_then(|k| k.name.as_ref()).map_or(0, String::len);
        let mut buffer = BytesMut::with_capacity(16 + name_len + msg.payload.len());
        // capacity is sized for the message
        let _ = MockCodec.encode(msg, &mut buffer);
        buffer.freeze()
    }
}

impl Codec for MockCodec {
    fn decode(&self, raw: &[u8], _major: u8, _minor: u8) -> Result<Msg, CodecError> {
        let mut buf = raw;
        if buf.remaining() < 9 {
            return Err(CodecError::Malformed("short header".into()));
        }
        let class = class_from(buf.get_u8())?;
        let stream_id = buf.get_i32();
        let domain_type = buf.get_u8();
        let stream_state = state_from(buf.get_u8());
        let name_len = buf.get_u16() as usize;
        if buf.remaining() < name_len + 4 {
            return Err(CodecError::Malformed("short name".into()));
        }
        let name = (name_len > 0)
            .then(|| String::from_utf8_lossy(&buf[..name_len]).into_owned());
        buf.advance(name_len);
        let payload_len = buf.get_u32() as usize;
        if buf.remaining() < payload_len {
            return Err(CodecError::Malformed("short payload".into()));
        }

        let mut msg = Msg::new(class, stream_id, domain_type);
        msg.state = stream_state.map(|s| State::new(s, DataState::Ok, ""));
        msg.key = name.map(MsgKey::with_name);
        msg.complete = class == MsgClass::Refresh;
        msg.payload = Bytes::copy_from_slice(&buf[..payload_len]);
        Ok(msg)
    }

    fn encode(&self, msg: &Msg, buffer: &mut BytesMut) -> Result<(), CodecError> {
        let name = msg
            .key
            .as_ref()
            .and_then(|k| k.name.as_deref())
            .unwrap_or_default();
        let needed = 1 + 4 + 1 + 1 + 2 + name.len() + 4 + msg.payload.len();
        if buffer.capacity() - buffer.len() < needed {
            return Err(CodecError::BufferTooSmall);
        }

        buffer.put_u8(class_code(msg.class));
        buffer.put_i32(msg.stream_id);
        buffer.put_u8(msg.domain_type);
        buffer.put_u8(state_code(msg.stream_state()));
        buffer.put_u16(name.len() as u16);
        buffer.put_slice(name.as_bytes());
        buffer.put_u32(msg.payload.len() as u32);
        buffer.put_slice(&msg.payload);
        Ok(())
    }
}

/// Fixed service directory
#[derive(Default)]
pub(crate) struct MockDirectory {
    services: Mutex<Vec<Directory>>,
}

impl MockDirectory {
    pub(crate) fn add(&self, name: &str, id: u16, channel: ChannelId) {
        self.services.lock().push(Directory::new(name, id, channel));
    }
}

impl DirectoryStore for MockDirectory {
    fn resolve_by_name(&self, name: &str) -> Option<Directory> {
        self.services
            .lock()
            .iter()
            .find(|d| d.service_name == name)
            .cloned()
    }

    fn resolve_by_id(&self, id: u16) -> Option<Directory> {
        self.services
            .lock()
            .iter()
            .find(|d| d.service_id == id)
            .cloned()
    }
}

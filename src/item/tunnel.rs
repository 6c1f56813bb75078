//! Tunnel streams and their sub-streams
//!
//! A tunnel carries a nested protocol with its own stream id space. Sub-stream
//! ids start at [`FIRST_SUB_STREAM_ID`], are reclaimed onto a LIFO free list
//! and never wrap.

use std::sync::Arc;

use crate::error::{CodecError, Error, ErrorCode, Result};
use crate::msg::{container, Msg, ReqMsg, TunnelStreamRequest};
use crate::registry::{Handle, ItemId, StreamId};
use crate::transport::{Codec, TunnelStream};

/// Lowest sub-stream id; smaller ids are reserved inside the tunnel
pub const FIRST_SUB_STREAM_ID: StreamId = 5;

/// Size of the first buffer asked for when encoding into a tunnel
pub const INITIAL_TUNNEL_BUFFER: usize = 256;

/// Encode `msg` into a tunnel buffer and submit it
///
/// A buffer the codec overflows is released and one of twice the size is
/// requested, until the size passes `max_msg_size`.
pub(crate) fn submit_encoded(
    codec: &dyn Codec,
    stream: &dyn TunnelStream,
    msg: &Msg,
    max_msg_size: usize,
    handle: Option<Handle>,
) -> Result<()> {
    let mut size = INITIAL_TUNNEL_BUFFER;
    loop {
        let mut buffer = stream
            .get_buffer(size)
            .map_err(|err| Error::submit_failed(handle, &err))?;

        match codec.encode(msg, &mut buffer) {
            Ok(()) => {
                return stream
                    .submit(buffer, container::MSG)
                    .map_err(|err| Error::submit_failed(handle, &err));
            }
            Err(CodecError::BufferTooSmall) => {
                stream.release_buffer(buffer);
                if size >= max_msg_size {
                    tracing::error!(size, max_msg_size, "Message does not fit in a tunnel buffer");
                    return Err(CodecError::BufferTooSmall.into());
                }
                size *= 2;
            }
            Err(err) => {
                stream.release_buffer(buffer);
                return Err(err.into());
            }
        }
    }
}

/// Slot table of a tunnel's sub-streams
#[derive(Debug, Clone)]
pub struct SubStreamTable {
    /// Indexed by `sub_stream_id - FIRST_SUB_STREAM_ID`
    slots: Vec<Option<ItemId>>,
    /// Reclaimed ids, most recent last
    free: Vec<StreamId>,
    next: StreamId,
}

impl Default for SubStreamTable {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            next: FIRST_SUB_STREAM_ID,
        }
    }
}

impl SubStreamTable {
    fn index(id: StreamId) -> Option<usize> {
        (id >= FIRST_SUB_STREAM_ID).then(|| (id - FIRST_SUB_STREAM_ID) as usize)
    }

    fn occupied(&self, id: StreamId) -> bool {
        Self::index(id)
            .and_then(|i| self.slots.get(i))
            .is_some_and(Option::is_some)
    }

    /// Pick a sub-stream id
    ///
    /// `requested == 0` takes the most recently freed id, else the next
    /// unissued one. An explicit id must be at least [`FIRST_SUB_STREAM_ID`]
    /// and not held by a live sub-item.
    pub fn allocate(&mut self, requested: StreamId) -> Result<StreamId> {
        if requested == 0 {
            while let Some(id) = self.free.pop() {
                if !self.occupied(id) {
                    return Ok(id);
                }
            }
            loop {
                let id = self.next;
                self.next += 1;
                if !self.occupied(id) {
                    return Ok(id);
                }
            }
        }

        if requested < FIRST_SUB_STREAM_ID {
            return Err(Error::invalid_usage(
                ErrorCode::InvalidArgument,
                format!(
                    "Invalid sub stream id {requested}: ids below {FIRST_SUB_STREAM_ID} are reserved"
                ),
            ));
        }
        if self.occupied(requested) {
            return Err(Error::invalid_usage(
                ErrorCode::InvalidArgument,
                format!("Sub stream id {requested} is already in use"),
            ));
        }
        self.free.retain(|&id| id != requested);
        Ok(requested)
    }

    /// Bind an allocated id to its item
    pub fn insert(&mut self, id: StreamId, item: ItemId) {
        if let Some(index) = Self::index(id) {
            if index >= self.slots.len() {
                self.slots.resize(index + 1, None);
            }
            self.slots[index] = Some(item);
        }
    }

    /// Item bound to a sub-stream id
    pub fn get(&self, id: StreamId) -> Option<ItemId> {
        Self::index(id).and_then(|i| self.slots.get(i).copied().flatten())
    }

    /// Free a sub-stream id and return the item that held it
    pub fn release(&mut self, id: StreamId) -> Option<ItemId> {
        let item = Self::index(id).and_then(|i| self.slots.get_mut(i)?.take());
        if item.is_some() {
            self.free.push(id);
        }
        item
    }

    /// Return an allocated id that was never bound
    pub fn unreserve(&mut self, id: StreamId) {
        if !self.occupied(id) && Self::index(id).is_some() {
            self.free.push(id);
        }
    }

    /// Every live sub-item
    pub fn live(&self) -> Vec<ItemId> {
        self.slots.iter().flatten().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stream carrying a nested sub-protocol
pub struct TunnelItem {
    pub(crate) request: TunnelStreamRequest,
    /// Set once the transport reports the tunnel open
    pub(crate) stream: Option<Arc<dyn TunnelStream>>,
    pub(crate) subs: SubStreamTable,
}

impl TunnelItem {
    pub fn new(request: TunnelStreamRequest) -> Self {
        Self {
            request,
            stream: None,
            subs: SubStreamTable::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn request(&self) -> &TunnelStreamRequest {
        &self.request
    }
}

impl std::fmt::Debug for TunnelItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelItem")
            .field("name", &self.request.name)
            .field("open", &self.is_open())
            .field("subs", &self.subs.len())
            .finish()
    }
}

/// Stream nested inside a tunnel
#[derive(Debug, Clone)]
pub struct SubItem {
    pub(crate) request: ReqMsg,
    /// Id in the tunnel's private space
    pub(crate) sub_stream_id: StreamId,
}

impl SubItem {
    pub fn new(request: ReqMsg, sub_stream_id: StreamId) -> Self {
        Self {
            request,
            sub_stream_id,
        }
    }

    pub fn sub_stream_id(&self) -> StreamId {
        self.sub_stream_id
    }
}

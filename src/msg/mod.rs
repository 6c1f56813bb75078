//! Message envelopes
//!
//! The codec hands the engine decoded envelopes ([`Msg`]) and the engine hands
//! the transport envelopes to encode. Field-level payload encoding is not our
//! concern; the payload travels as opaque [`Bytes`].

pub mod request;

use bytes::Bytes;

use crate::registry::StreamId;

pub use request::{ClassOfService, ReqMsg, TunnelStreamRequest};

/// Well-known domain types
pub mod domain {
    pub const LOGIN: u8 = 1;
    pub const SOURCE: u8 = 4;
    pub const DICTIONARY: u8 = 5;
    pub const MARKET_PRICE: u8 = 6;
    pub const MARKET_BY_ORDER: u8 = 7;
    pub const MARKET_BY_PRICE: u8 = 8;
    pub const SYMBOL_LIST: u8 = 10;
    pub const SYSTEM: u8 = 127;
}

/// Container types used by the engine itself
pub mod container {
    pub const NO_DATA: u8 = 128;
    pub const FIELD_LIST: u8 = 132;
    pub const MSG: u8 = 141;
}

/// Reserved stream ids (consumer side)
pub const LOGIN_STREAM_ID: StreamId = 1;
pub const DIRECTORY_STREAM_ID: StreamId = 2;
pub const DICTIONARY_STREAM_ID: StreamId = 3;

/// Message class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgClass {
    Request,
    Refresh,
    Status,
    Update,
    Close,
    Ack,
    Generic,
    Post,
}

/// Stream state carried by refresh and status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Unspecified,
    Open,
    NonStreaming,
    ClosedRecover,
    Closed,
    Redirected,
}

impl StreamState {
    /// Whether a stream in this state is finished
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::ClosedRecover | StreamState::Closed | StreamState::Redirected
        )
    }
}

/// Data state carried by refresh and status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataState {
    #[default]
    NoChange,
    Ok,
    Suspect,
}

/// Stream and data state plus status code and text
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: u8,
    pub text: String,
}

impl State {
    pub fn new(stream_state: StreamState, data_state: DataState, text: impl Into<String>) -> Self {
        Self {
            stream_state,
            data_state,
            code: 0,
            text: text.into(),
        }
    }

    pub fn open_ok() -> Self {
        Self::new(StreamState::Open, DataState::Ok, "")
    }
}

/// Message key identifying the item a stream carries
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MsgKey {
    pub name: Option<String>,
    pub name_type: Option<u8>,
    pub service_id: Option<u16>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
}

impl MsgKey {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn service_id(mut self, id: u16) -> Self {
        self.service_id = Some(id);
        self
    }
}

/// Decoded message envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub class: MsgClass,
    pub stream_id: StreamId,
    pub domain_type: u8,
    pub container_type: u8,
    pub state: Option<State>,
    pub key: Option<MsgKey>,
    /// Resolved service name, stamped by the engine before delivery
    pub service_name: Option<String>,
    pub private_stream: bool,
    /// Refresh completes the initial image
    pub complete: bool,
    /// Request wants a streaming subscription
    pub streaming: bool,
    /// Item names of a batch request
    pub batch: Vec<String>,
    pub payload: Bytes,
}

impl Msg {
    /// Create an empty envelope of the given class
    pub fn new(class: MsgClass, stream_id: StreamId, domain_type: u8) -> Self {
        Self {
            class,
            stream_id,
            domain_type,
            container_type: container::NO_DATA,
            state: None,
            key: None,
            service_name: None,
            private_stream: false,
            complete: false,
            streaming: false,
            batch: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Close envelope for a stream
    pub fn close(stream_id: StreamId, domain_type: u8) -> Self {
        Self::new(MsgClass::Close, stream_id, domain_type)
    }

    /// Status envelope with a state
    pub fn status(stream_id: StreamId, domain_type: u8, state: State) -> Self {
        let mut msg = Self::new(MsgClass::Status, stream_id, domain_type);
        msg.state = Some(state);
        msg
    }

    /// Refresh envelope with a state
    pub fn refresh(stream_id: StreamId, domain_type: u8, state: State) -> Self {
        let mut msg = Self::new(MsgClass::Refresh, stream_id, domain_type);
        msg.state = Some(state);
        msg.complete = true;
        msg
    }

    /// Update envelope
    pub fn update(stream_id: StreamId, domain_type: u8, payload: Bytes) -> Self {
        let mut msg = Self::new(MsgClass::Update, stream_id, domain_type);
        msg.container_type = container::FIELD_LIST;
        msg.payload = payload;
        msg
    }

    pub fn with_key(mut self, key: MsgKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Stream state, if the message carries one
    pub fn stream_state(&self) -> Option<StreamState> {
        self.state.as_ref().map(|s| s.stream_state)
    }

    /// Whether this message ends the stream it arrives on
    pub fn is_terminal(&self) -> bool {
        match self.class {
            MsgClass::Refresh => match self.stream_state() {
                Some(StreamState::NonStreaming) => self.complete,
                Some(state) => state.is_terminal(),
                None => false,
            },
            MsgClass::Status => self.stream_state().is_some_and(StreamState::is_terminal),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(StreamState::Closed.is_terminal());
        assert!(StreamState::ClosedRecover.is_terminal());
        assert!(StreamState::Redirected.is_terminal());
        assert!(!StreamState::Open.is_terminal());
        assert!(!StreamState::NonStreaming.is_terminal());
    }

    #[test]
    fn test_non_streaming_refresh_ends_on_complete() {
        let mut refresh = Msg::refresh(
            5,
            domain::MARKET_PRICE,
            State::new(StreamState::NonStreaming, DataState::Ok, ""),
        );
        refresh.complete = false;
        assert!(!refresh.is_terminal());

        refresh.complete = true;
        assert!(refresh.is_terminal());
    }

    #[test]
    fn test_update_never_terminal() {
        let update = Msg::update(5, domain::MARKET_PRICE, Bytes::from_static(b"\x01"));
        assert!(!update.is_terminal());
        assert_eq!(update.container_type, container::FIELD_LIST);
    }
}

//! Application-level requests
//!
//! A [`ReqMsg`] is what the application hands to `register_client`. The engine
//! turns it into one or more wire request envelopes once the service is
//! resolved and a stream id has been allocated.

use std::time::Duration;

use bytes::Bytes;

use super::{domain, Msg, MsgClass, MsgKey};
use crate::registry::StreamId;
use crate::session::ChannelId;

/// Item request built by the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReqMsg {
    pub domain_type: u8,
    pub name: Option<String>,
    pub name_type: Option<u8>,
    pub service_name: Option<String>,
    pub service_id: Option<u16>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
    /// Item names for a batch request
    pub batch: Vec<String>,
    pub streaming: bool,
    pub private_stream: bool,
    /// Explicit stream id, honoured only for tunnel sub-streams (0 = allocate)
    pub stream_id: StreamId,
    /// Target channel for provider-originated requests
    pub channel: Option<ChannelId>,
    pub payload: Bytes,
}

impl Default for ReqMsg {
    fn default() -> Self {
        Self {
            domain_type: domain::MARKET_PRICE,
            name: None,
            name_type: None,
            service_name: None,
            service_id: None,
            filter: None,
            identifier: None,
            batch: Vec::new(),
            streaming: true,
            private_stream: false,
            stream_id: 0,
            channel: None,
            payload: Bytes::new(),
        }
    }
}

impl ReqMsg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain_type(mut self, domain_type: u8) -> Self {
        self.domain_type = domain_type;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn service_id(mut self, id: u16) -> Self {
        self.service_id = Some(id);
        self
    }

    pub fn filter(mut self, filter: u32) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Turn this into a batch request for the given item names
    pub fn batch<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.batch = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn non_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    pub fn private_stream(mut self) -> Self {
        self.private_stream = true;
        self
    }

    /// Request a specific sub-stream id inside a tunnel
    pub fn stream_id(mut self, id: StreamId) -> Self {
        self.stream_id = id;
        self
    }

    pub fn channel(mut self, channel: ChannelId) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn is_batch(&self) -> bool {
        !self.batch.is_empty()
    }

    /// Message key described by this request
    pub fn key(&self) -> MsgKey {
        MsgKey {
            name: self.name.clone(),
            name_type: self.name_type,
            service_id: self.service_id,
            filter: self.filter,
            identifier: self.identifier,
        }
    }

    /// Take the item identity from `original` wherever this request omits it
    pub(crate) fn inherit_key(&mut self, original: &ReqMsg) {
        if self.name.is_none() {
            self.name.clone_from(&original.name);
        }
        if self.name_type.is_none() {
            self.name_type = original.name_type;
        }
        if self.service_name.is_none() {
            self.service_name.clone_from(&original.service_name);
        }
        if self.service_id.is_none() {
            self.service_id = original.service_id;
        }
    }

    /// Wire request on `stream_id`, addressed to `service_id`
    pub(crate) fn to_wire(&self, stream_id: StreamId, service_id: Option<u16>) -> Msg {
        let mut msg = Msg::new(MsgClass::Request, stream_id, self.domain_type);
        let mut key = self.key();
        if service_id.is_some() {
            key.service_id = service_id;
        }
        msg.key = Some(key);
        msg.streaming = self.streaming;
        msg.private_stream = self.private_stream;
        msg.batch = self.batch.clone();
        msg.payload = self.payload.clone();
        msg
    }
}

/// Class of service negotiated for a tunnel stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassOfService {
    pub max_msg_size: u32,
    pub recv_window_size: i32,
    pub flow_control: bool,
    pub persist_locally: bool,
}

impl Default for ClassOfService {
    fn default() -> Self {
        Self {
            max_msg_size: 6144,
            recv_window_size: -1,
            flow_control: true,
            persist_locally: false,
        }
    }
}

/// Request to open a tunnel stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStreamRequest {
    pub name: String,
    pub domain_type: u8,
    pub service_name: Option<String>,
    pub service_id: Option<u16>,
    pub response_timeout: Duration,
    pub guaranteed_output_buffers: u32,
    pub class_of_service: ClassOfService,
}

impl Default for TunnelStreamRequest {
    fn default() -> Self {
        Self {
            name: String::new(),
            domain_type: domain::SYSTEM,
            service_name: None,
            service_id: None,
            response_timeout: Duration::from_secs(60),
            guaranteed_output_buffers: 50,
            class_of_service: ClassOfService::default(),
        }
    }
}

impl TunnelStreamRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn service_id(mut self, id: u16) -> Self {
        self.service_id = Some(id);
        self
    }

    pub fn domain_type(mut self, domain_type: u8) -> Self {
        self.domain_type = domain_type;
        self
    }

    pub fn class_of_service(mut self, cos: ClassOfService) -> Self {
        self.class_of_service = cos;
        self
    }

    /// Key used in synthesized statuses for this tunnel
    pub(crate) fn key(&self) -> MsgKey {
        MsgKey {
            name: (!self.name.is_empty()).then(|| self.name.clone()),
            service_id: self.service_id,
            ..Default::default()
        }
    }
}

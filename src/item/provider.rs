//! Interactive-provider items

use crate::error::{Error, ErrorCode, Result};
use crate::msg::{MsgKey, ReqMsg};
use crate::session::ChannelId;

/// Provider side of a provider-originated request
#[derive(Debug, Clone)]
pub struct ProviderSingleItem {
    pub(crate) request: ReqMsg,
    /// Key of the original request, replayed onto keyless responses
    pub(crate) key: MsgKey,
    /// Client channel the request was sent to
    pub(crate) channel: ChannelId,
    /// First refresh already validated
    pub(crate) received_initial: bool,
    /// Request timer currently armed
    pub(crate) timer_armed: bool,
}

impl ProviderSingleItem {
    pub fn new(request: ReqMsg, channel: ChannelId) -> Self {
        Self {
            key: request.key(),
            request,
            channel,
            received_initial: false,
            timer_armed: false,
        }
    }

    pub fn key(&self) -> &MsgKey {
        &self.key
    }

    /// Whether the request named a service at all
    pub fn has_service(&self) -> bool {
        self.request.service_name.is_some() || self.request.service_id.is_some()
    }

    pub fn service_id(&self) -> Option<u16> {
        self.key.service_id
    }

    /// Check a reissue against the stored request and fill in what it omits
    pub(crate) fn validate_reissue(&self, req: &mut ReqMsg) -> Result<()> {
        match (&req.service_name, &self.request.service_name) {
            (Some(new), Some(old)) if new != old => {
                return Err(mismatch(format!("Service name of '{new}'")));
            }
            (None, Some(old)) => req.service_name = Some(old.clone()),
            _ => {}
        }

        match (req.service_id, self.key.service_id) {
            (Some(new), Some(old)) if new != old => {
                return Err(mismatch(format!("Service id of '{new}'")));
            }
            (None, Some(old)) => req.service_id = Some(old),
            _ => {}
        }

        match (&req.name, &self.key.name) {
            (Some(new), Some(old)) if new != old => {
                return Err(mismatch(format!("Name of '{new}'")));
            }
            (None, Some(old)) => req.name = Some(old.clone()),
            _ => {}
        }

        Ok(())
    }

    /// Adopt a validated reissue as the stored request
    pub(crate) fn apply_reissue(&mut self, req: &ReqMsg) {
        self.request = req.clone();
        self.key = req.key();
    }
}

fn mismatch(what: String) -> Error {
    Error::invalid_usage(
        ErrorCode::InvalidArgument,
        format!("{what} does not match existing request."),
    )
}

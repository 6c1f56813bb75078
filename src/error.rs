//! Error types
//!
//! Every failure the engine reports synchronously goes through [`Error`].
//! Failures that cannot be reported at the call site (unknown service,
//! dead channel) are delivered later as a status message on the handle.

use std::fmt;

use crate::registry::Handle;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies an [`Error::InvalidUsage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// A request field has an unacceptable value
    InvalidArgument,
    /// The operation is not allowed on this kind of stream
    InvalidOperation,
    /// The handle does not name a live stream
    InvalidHandle,
    /// The channel configuration names a transport type we cannot drive
    UnsupportedChannelType,
    /// No channel is available to carry the request
    NoActiveChannel,
    /// Internal invariant violated
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::InvalidOperation => "InvalidOperation",
            ErrorCode::InvalidHandle => "InvalidHandle",
            ErrorCode::UnsupportedChannelType => "UnsupportedChannelType",
            ErrorCode::NoActiveChannel => "NoActiveChannel",
            ErrorCode::InternalError => "InternalError",
        };
        f.write_str(name)
    }
}

/// Structured error returned by transport calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportError {
    /// Transport return code
    pub code: i32,
    /// Transport error id
    pub id: i32,
    /// OS-level error number, if any
    pub sys_error: i32,
    /// Where in the transport the error was raised
    pub location: String,
    /// Human readable text
    pub text: String,
}

impl TransportError {
    /// Create an error with a code and text
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            ..Default::default()
        }
    }

    /// Set the location
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error Id {} Internal sysError {} Error Location {} Error Text {}",
            self.id, self.sys_error, self.location, self.text
        )
    }
}

impl std::error::Error for TransportError {}

/// Error raised by a [`Codec`](crate::transport::Codec)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The target buffer cannot hold the encoded message
    #[error("buffer too small")]
    BufferTooSmall,
    /// The input could not be decoded
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Crate error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller error; no wire traffic took place
    #[error("{code}: {text}")]
    InvalidUsage { code: ErrorCode, text: String },

    /// The transport refused a submit. If `handle` is set, the item is still
    /// registered and may be retried or closed.
    #[error("Failed to submit on stream (handle {handle:?}). Reason: {code}. Error text: {text}")]
    SubmitFailed {
        handle: Option<Handle>,
        code: i32,
        text: String,
    },

    /// The reactor refused the connection set
    #[error("Failed to add channel(s) {channels} to reactor: {source}")]
    ConnectFailed {
        channels: String,
        #[source]
        source: TransportError,
    },

    /// Every stream id is in use
    #[error("Unable to obtain next available stream id for item request")]
    StreamIdsExhausted,

    /// Every handle is in use
    #[error("Unable to obtain next available handle")]
    HandlesExhausted,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl Error {
    pub(crate) fn invalid_usage(code: ErrorCode, text: impl Into<String>) -> Self {
        Error::InvalidUsage {
            code,
            text: text.into(),
        }
    }

    pub(crate) fn submit_failed(handle: Option<Handle>, err: &TransportError) -> Self {
        Error::SubmitFailed {
            handle,
            code: err.code,
            text: err.text.clone(),
        }
    }

    /// The [`ErrorCode`] for invalid-usage errors
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::InvalidUsage { code, .. } => Some(*code),
            _ => None,
        }
    }
}

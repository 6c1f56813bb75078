//! Channel session state machine
//!
//! Tracks one physical channel from the first transport event to release.
//!
//! ```text
//! Initializing -> Opened -> Up -> Ready -> DownReconnecting -> Up -> ...
//!                                      \-> Down (channel released)
//! ```

use std::sync::Arc;

use super::channels::ChannelId;
use super::config::ChannelConfig;
use crate::error::TransportError;
use crate::transport::{Descriptor, IoctlCode, ReactorChannel, Selector};

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Connect issued, no event yet
    Initializing,
    /// Accepted by the transport, no data flows
    Opened,
    /// Physical channel established and negotiated
    Up,
    /// Login and directory exchange complete
    Ready,
    /// Lost; the transport is reconnecting
    DownReconnecting,
    /// Lost for good; channel released
    Down,
    Closed,
}

impl ChannelState {
    /// Whether requests can be sent on the channel
    pub fn is_active(self) -> bool {
        matches!(self, ChannelState::Up | ChannelState::Ready)
    }
}

/// Event reported by the transport for a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEventKind {
    Opened,
    Up,
    /// Descriptor replaced, e.g. after a tunnelling handshake phase
    FdChange,
    Ready,
    DownReconnecting,
    Down,
    Warning,
    /// Event code the engine does not know
    Unknown(i32),
}

/// Result handed back to the transport from an event callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackReturn {
    Success,
    Failure,
}

/// Connectivity change that dependent subsystems react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Ready,
    DownReconnecting,
    Down,
}

/// One physical connection
pub struct ChannelSession {
    id: ChannelId,
    config: ChannelConfig,
    state: ChannelState,
    channel: Option<Arc<dyn ReactorChannel>>,
    /// Descriptor registered with the selector
    descriptor: Option<Descriptor>,
}

impl ChannelSession {
    pub(crate) fn new(id: ChannelId, config: ChannelConfig) -> Self {
        Self {
            id,
            config,
            state: ChannelState::Initializing,
            channel: None,
            descriptor: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active() && self.channel.is_some()
    }

    /// Transport channel, while one is held
    pub fn channel(&self) -> Option<&Arc<dyn ReactorChannel>> {
        self.channel.as_ref()
    }

    /// Apply a transport event
    ///
    /// Returns the code to hand back to the transport and, for connectivity
    /// changes, what dependent subsystems must be told.
    pub(crate) fn handle_event(
        &mut self,
        kind: ChannelEventKind,
        channel: &Arc<dyn ReactorChannel>,
        error: Option<&TransportError>,
        selector: &dyn Selector,
    ) -> (CallbackReturn, Option<Connectivity>) {
        match kind {
            ChannelEventKind::Opened => {
                tracing::trace!(channel = %self.config.name, "Received ChannelOpened event");
                self.state = ChannelState::Opened;
                (CallbackReturn::Success, None)
            }
            ChannelEventKind::Up => (self.on_up(channel, selector), None),
            ChannelEventKind::FdChange => (self.on_fd_change(channel, selector), None),
            ChannelEventKind::Ready => {
                tracing::info!(channel = %self.config.name, "Received ChannelReady event");
                self.channel = Some(Arc::clone(channel));
                self.state = ChannelState::Ready;
                (CallbackReturn::Success, Some(Connectivity::Ready))
            }
            ChannelEventKind::DownReconnecting => {
                self.deregister(selector);
                tracing::warn!(
                    channel = %self.config.name,
                    error = %error.map(ToString::to_string).unwrap_or_default(),
                    "Received ChannelDownReconnecting event"
                );
                self.state = ChannelState::DownReconnecting;
                (CallbackReturn::Success, Some(Connectivity::DownReconnecting))
            }
            ChannelEventKind::Down => {
                self.deregister(selector);
                tracing::error!(
                    channel = %self.config.name,
                    error = %error.map(ToString::to_string).unwrap_or_default(),
                    "Received ChannelDown event"
                );
                self.state = ChannelState::Down;
                self.release();
                (CallbackReturn::Success, Some(Connectivity::Down))
            }
            ChannelEventKind::Warning => {
                tracing::warn!(
                    channel = %self.config.name,
                    error = %error.map(ToString::to_string).unwrap_or_default(),
                    "Received ChannelWarning event"
                );
                (CallbackReturn::Success, None)
            }
            ChannelEventKind::Unknown(code) => {
                tracing::error!(channel = %self.config.name, code, "Received unknown channel event type");
                (CallbackReturn::Failure, None)
            }
        }
    }

    fn on_up(&mut self, channel: &Arc<dyn ReactorChannel>, selector: &dyn Selector) -> CallbackReturn {
        let fd = channel.descriptor();
        if let Err(err) = selector.register(fd) {
            tracing::error!(
                channel = %self.config.name,
                error = %err,
                "Failed to register selector on ChannelUp"
            );
            return CallbackReturn::Failure;
        }
        self.descriptor = Some(fd);
        self.channel = Some(Arc::clone(channel));

        if self.config.sys_send_buf_size > 0 {
            if let Err(err) = channel.ioctl(IoctlCode::SystemWriteBuffers, self.config.sys_send_buf_size) {
                return self.fail_negotiation("system send buffer size", &err, selector);
            }
        }
        if self.config.sys_recv_buf_size > 0 {
            if let Err(err) = channel.ioctl(IoctlCode::SystemReadBuffers, self.config.sys_recv_buf_size) {
                return self.fail_negotiation("system receive buffer size", &err, selector);
            }
        }
        if let Some(threshold) = self.config.compression_threshold {
            if let Err(err) = channel.ioctl(IoctlCode::CompressionThreshold, threshold) {
                return self.fail_negotiation("compression threshold", &err, selector);
            }
        }

        self.state = ChannelState::Up;

        if self.config.high_water_mark > 0 {
            if let Err(err) = channel.ioctl(IoctlCode::HighWaterMark, self.config.high_water_mark) {
                return self.fail_negotiation("high water mark", &err, selector);
            }
            tracing::info!(
                channel = %self.config.name,
                high_water_mark = self.config.high_water_mark,
                "High water mark set"
            );
        }

        tracing::info!(channel = %self.config.name, "Received ChannelUp event");
        CallbackReturn::Success
    }

    /// Close the channel and leave reconnection to the transport
    fn fail_negotiation(
        &mut self,
        option: &str,
        err: &TransportError,
        selector: &dyn Selector,
    ) -> CallbackReturn {
        tracing::error!(
            channel = %self.config.name,
            option,
            error = %err,
            "Failed to set channel option, closing channel"
        );
        self.deregister(selector);
        self.release();
        CallbackReturn::Success
    }

    fn on_fd_change(&mut self, channel: &Arc<dyn ReactorChannel>, selector: &dyn Selector) -> CallbackReturn {
        tracing::trace!(channel = %self.config.name, "Received FD change event");

        let old = self.descriptor.take().unwrap_or_else(|| channel.old_descriptor());
        selector.deregister(old);

        let fd = channel.descriptor();
        if let Err(err) = selector.register(fd) {
            tracing::error!(
                channel = %self.config.name,
                error = %err,
                "Failed to register selector on FD change"
            );
            return CallbackReturn::Failure;
        }
        self.descriptor = Some(fd);
        CallbackReturn::Success
    }

    fn deregister(&mut self, selector: &dyn Selector) {
        if let Some(fd) = self.descriptor.take() {
            selector.deregister(fd);
        }
    }

    fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(err) = channel.close() {
                tracing::warn!(channel = %self.config.name, error = %err, "Failed to close channel");
            }
        }
    }

    /// Release the channel at engine shutdown
    pub(crate) fn close(&mut self, selector: &dyn Selector) {
        self.deregister(selector);
        self.release();
        self.state = ChannelState::Closed;
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("state", &self.state)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

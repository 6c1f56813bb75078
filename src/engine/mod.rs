//! Item engine
//!
//! The application-facing API. Every entry point takes the user lock, does
//! its registry work, collects the notifications it produced, releases the
//! lock, and only then calls into the application. Callbacks may therefore
//! call straight back into the engine (for example `unregister` from
//! `on_status`).
//!
//! # Architecture
//!
//! ```text
//!   application threads            transport / dispatch thread
//!   register_client()              on_channel_event()  on_message()
//!   reissue() submit()             on_tunnel_status()  process_timeouts()
//!   unregister()                          │
//!          │                              │
//!          └──────────────┬───────────────┘
//!                         ▼
//!              Mutex<EngineState>   (user lock)
//!        ┌──────────────────────────────────────┐
//!        │ registry   ItemRegistry              │
//!        │ channels   ChannelSet                │
//!        │ scheduler  DeferredStatusScheduler   │
//!        │ watchlist  ItemWatchList             │
//!        └──────────────────┬───────────────────┘
//!                           │ Vec<Notification>
//!                           ▼
//!                lock released, ItemClient callbacks
//! ```

mod open;
mod ops;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::error::{Result, TransportError};
use crate::item::{ChannelInfo, Closure, ItemClient, Notification};
use crate::msg::{Msg, ReqMsg, State, TunnelStreamRequest};
use crate::registry::{Handle, ItemRegistry, StreamId};
use crate::session::{
    CallbackReturn, ChannelConfig, ChannelEventKind, ChannelId, ChannelSet, ChannelState,
    Connectivity, DeferredStatusScheduler, SessionConfig, SessionContext,
};
use crate::stats::{Counters, EngineStats};
use crate::transport::{Codec, DirectoryStore, Reactor, ReactorChannel, Selector, TunnelStream};
use crate::watchlist::ItemWatchList;

/// External collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub reactor: Arc<dyn Reactor>,
    pub codec: Arc<dyn Codec>,
    pub directory: Arc<dyn DirectoryStore>,
    pub selector: Arc<dyn Selector>,
}

/// Subsystem told about connectivity changes after the first Ready
pub trait ConnectionListener: Send + Sync {
    fn on_connectivity(&self, channel: &ChannelInfo, event: Connectivity);
}

/// Lock-free part of the engine
pub(crate) struct Shared {
    pub(crate) ctx: SessionContext,
    pub(crate) io: Collaborators,
    pub(crate) counters: Counters,
}

/// Everything guarded by the user lock
pub(crate) struct EngineState {
    pub(crate) registry: ItemRegistry,
    pub(crate) channels: ChannelSet,
    pub(crate) scheduler: DeferredStatusScheduler,
    pub(crate) watchlist: ItemWatchList,
}

/// The user lock plus what was produced while holding it
pub(crate) struct Locked<'a> {
    pub(crate) shared: &'a Shared,
    pub(crate) st: MutexGuard<'a, EngineState>,
    pub(crate) out: Vec<Notification>,
    pub(crate) events: Vec<(ChannelInfo, Connectivity)>,
}

/// Stream multiplexing engine for one session
pub struct ItemEngine {
    shared: Shared,
    state: Mutex<EngineState>,
    listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl ItemEngine {
    /// Create an engine; no connection is made until [`initialize`](Self::initialize)
    pub fn new(config: SessionConfig, io: Collaborators) -> Self {
        let capacity = config.item_count_hint;
        Self {
            shared: Shared {
                ctx: SessionContext::new(config),
                io,
                counters: Counters::default(),
            },
            state: Mutex::new(EngineState {
                registry: ItemRegistry::with_capacity(capacity),
                channels: ChannelSet::new(),
                scheduler: DeferredStatusScheduler::new(),
                watchlist: ItemWatchList::new(),
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn lock(&self) -> Locked<'_> {
        Locked {
            shared: &self.shared,
            st: self.state.lock(),
            out: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Release the lock, then deliver what was collected under it
    fn finish(&self, locked: Locked<'_>) {
        let Locked { st, out, events, .. } = locked;
        drop(st);

        for notification in out {
            notification.deliver();
        }
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for (channel, event) in &events {
            for listener in &listeners {
                listener.on_connectivity(channel, *event);
            }
        }
    }

    /// Run `f` under the user lock and deliver its notifications afterwards
    fn with_lock<T>(&self, f: impl FnOnce(&mut Locked<'_>) -> T) -> T {
        let mut locked = self.lock();
        let result = f(&mut locked);
        self.finish(locked);
        result
    }

    pub fn context(&self) -> &SessionContext {
        &self.shared.ctx
    }

    /// Register every configured channel with the reactor and connect
    pub fn initialize(&self) -> Result<Vec<ChannelId>> {
        let ctx = &self.shared.ctx;
        let ids = self.with_lock(|l| {
            l.st
                .channels
                .initialize_reactor(ctx.config(), self.shared.io.reactor.as_ref())
        })?;

        tracing::info!(
            instance = %ctx.instance_name(),
            role = ?ctx.role(),
            channels = ids.len(),
            "Engine initialized"
        );
        Ok(ids)
    }

    /// Track a channel accepted from a client (interactive provider)
    pub fn accept_channel(&self, config: ChannelConfig) -> ChannelId {
        self.with_lock(|l| l.st.channels.accept(config))
    }

    /// Open a stream for `req`
    ///
    /// With `parent` set the request opens a sub-stream of that tunnel.
    /// Requests that cannot be routed still return a handle; the handle then
    /// gets exactly one closed status after the configured delay.
    pub fn register_client(
        &self,
        req: ReqMsg,
        client: Arc<dyn ItemClient>,
        closure: Closure,
        parent: Option<Handle>,
    ) -> Result<Handle> {
        self.with_lock(|l| l.register_client(req, client, closure, parent))
    }

    /// Open a publishing stream (non-interactive provider); no request is sent
    pub fn open_publish(&self, req: ReqMsg, client: Arc<dyn ItemClient>, closure: Closure) -> Result<Handle> {
        self.with_lock(|l| l.open_publish(req, client, closure))
    }

    /// Open a tunnel stream
    pub fn register_tunnel(
        &self,
        req: TunnelStreamRequest,
        client: Arc<dyn ItemClient>,
        closure: Closure,
    ) -> Result<Handle> {
        self.with_lock(|l| l.open_tunnel(req, client, closure))
    }

    /// Re-submit a request on an existing stream
    pub fn reissue(&self, req: ReqMsg, handle: Handle) -> Result<()> {
        self.with_lock(|l| l.reissue(req, handle))
    }

    /// Send a message on an existing stream
    pub fn submit(&self, msg: Msg, handle: Handle) -> Result<()> {
        self.with_lock(|l| l.submit(msg, handle))
    }

    /// Close a stream and free its handle
    ///
    /// Unknown handles are ignored.
    pub fn unregister(&self, handle: Handle) -> Result<()> {
        self.with_lock(|l| l.unregister(handle))
    }

    /// Transport callback for channel events
    pub fn on_channel_event(
        &self,
        id: ChannelId,
        kind: ChannelEventKind,
        channel: &Arc<dyn ReactorChannel>,
        error: Option<&TransportError>,
    ) -> CallbackReturn {
        self.with_lock(|l| l.on_channel_event(id, kind, channel, error))
    }

    /// Transport callback for an encoded inbound message
    pub fn on_message(&self, id: ChannelId, raw: &[u8]) -> CallbackReturn {
        self.with_lock(|l| l.on_raw(id, raw))
    }

    /// Route a decoded inbound message
    pub fn on_msg(&self, id: ChannelId, msg: Msg) {
        self.with_lock(|l| l.route(id, msg))
    }

    /// Transport callback for tunnel stream state
    ///
    /// `stream` accompanies the status that opens the tunnel.
    pub fn on_tunnel_status(
        &self,
        tunnel_stream_id: StreamId,
        state: State,
        stream: Option<Arc<dyn TunnelStream>>,
    ) {
        self.with_lock(|l| l.on_tunnel_status(tunnel_stream_id, state, stream))
    }

    /// Transport callback for an encoded message inside a tunnel
    pub fn on_tunnel_message(&self, tunnel_stream_id: StreamId, raw: &[u8]) -> CallbackReturn {
        self.with_lock(|l| l.on_tunnel_raw(tunnel_stream_id, raw))
    }

    /// Fire every timer due at `now`; returns how many fired
    pub fn process_timeouts(&self, now: Instant) -> usize {
        self.with_lock(|l| l.process_timeouts(now))
    }

    /// Earliest pending timer
    pub fn next_timeout(&self) -> Option<Instant> {
        self.state.lock().scheduler.next_deadline()
    }

    /// Spawn a task that polls timers on the configured interval
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_timeout_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let interval = engine.shared.ctx.config().timeout_poll_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                engine.process_timeouts(Instant::now());
            }
        })
    }

    /// A service went away; close provider items requested on it
    pub fn service_deleted(&self, channel: Option<ChannelId>, service_id: u16) {
        self.with_lock(|l| l.service_deleted(channel, service_id))
    }

    /// A client's login stream closed; close provider items on its channel
    pub fn login_closed(&self, channel: ChannelId) {
        self.with_lock(|l| l.login_closed(channel))
    }

    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.write().push(listener);
    }

    /// Close every item silently and release every channel
    pub fn uninitialize(&self) {
        self.with_lock(|l| l.shutdown())
    }

    pub fn stats(&self) -> EngineStats {
        let live = self.state.lock().registry.len();
        self.shared.counters.snapshot(
            self.shared.ctx.ids().wrap_count(),
            live,
            self.shared.ctx.uptime(),
        )
    }

    /// Whether a handle names a live item
    pub fn is_registered(&self, handle: Handle) -> bool {
        self.state.lock().registry.lookup_by_handle(handle).is_some()
    }

    /// Wire stream id of a handle, if bound
    pub fn stream_id(&self, handle: Handle) -> Option<StreamId> {
        let st = self.state.lock();
        let id = st.registry.lookup_by_handle(handle)?;
        st.registry.get(id)?.stream_id()
    }

    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.state.lock().channels.get(id).map(|s| s.state())
    }

    /// Number of live items
    pub fn item_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Number of live provider items on the watch list
    pub fn watched_count(&self) -> usize {
        self.state.lock().watchlist.len()
    }
}

//! Consumer talking to an in-process provider
//!
//! The "transport" here is an mpsc channel: every request the engine submits
//! is answered by a task that plays the provider, and its replies are fed
//! back through the engine's inbound callback.
//!
//! Run with: cargo run --example loopback_consumer

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use itemstream::error::CodecError;
use itemstream::item::Directory;
use itemstream::msg::{MsgClass, State};
use itemstream::session::{ChannelEventKind, ChannelId, Role};
use itemstream::transport::{
    Codec, ConnectOptions, Descriptor, DirectoryStore, IoctlCode, Reactor, ReactorChannel,
    Selector,
};
use itemstream::{
    ChannelConfig, Collaborators, Consumer, EventContext, ItemClient, Msg, ReqMsg, SessionConfig,
    StreamId, TransportError, TunnelStreamRequest,
};

struct LoopbackReactor;

impl Reactor for LoopbackReactor {
    fn connect(&self, options: &ConnectOptions, role: Role) -> Result<(), TransportError> {
        tracing::info!(channels = options.connections.len(), ?role, "Connecting");
        Ok(())
    }
}

/// Channel whose outbound messages land in an mpsc queue
struct LoopbackChannel {
    outbound: mpsc::UnboundedSender<Msg>,
}

impl ReactorChannel for LoopbackChannel {
    fn descriptor(&self) -> Descriptor {
        3
    }

    fn old_descriptor(&self) -> Descriptor {
        3
    }

    fn version(&self) -> (u8, u8) {
        (14, 1)
    }

    fn ioctl(&self, _code: IoctlCode, _value: u32) -> Result<(), TransportError> {
        Ok(())
    }

    fn submit(&self, msg: &Msg) -> Result<(), TransportError> {
        self.outbound
            .send(msg.clone())
            .map_err(|_| TransportError::new(-1, "provider gone"))
    }

    fn open_tunnel_stream(&self, _stream_id: StreamId, _request: &TunnelStreamRequest) -> Result<(), TransportError> {
        Err(TransportError::new(-1, "tunnel streams not supported by the loopback provider"))
    }

    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct NoopSelector;

impl Selector for NoopSelector {
    fn register(&self, _descriptor: Descriptor) -> Result<(), TransportError> {
        Ok(())
    }

    fn deregister(&self, _descriptor: Descriptor) {}
}

/// Messages travel decoded on the loopback, so only the payload is encoded
struct PayloadCodec;

impl Codec for PayloadCodec {
    fn decode(&self, _raw: &[u8], _major: u8, _minor: u8) -> Result<Msg, CodecError> {
        Err(CodecError::Malformed("loopback carries decoded messages".into()))
    }

    fn encode(&self, msg: &Msg, buffer: &mut BytesMut) -> Result<(), CodecError> {
        if buffer.capacity() - buffer.len() < msg.payload.len() {
            return Err(CodecError::BufferTooSmall);
        }
        buffer.put_slice(&msg.payload);
        Ok(())
    }
}

struct OneService;

impl DirectoryStore for OneService {
    fn resolve_by_name(&self, name: &str) -> Option<Directory> {
        (name == "DIRECT_FEED").then(|| Directory::new(name, 1, ChannelId::new(0)))
    }

    fn resolve_by_id(&self, id: u16) -> Option<Directory> {
        (id == 1).then(|| Directory::new("DIRECT_FEED", 1, ChannelId::new(0)))
    }
}

struct PrintClient;

impl ItemClient for PrintClient {
    fn on_refresh(&self, msg: &Msg, ctx: &EventContext) {
        let name = msg.key.as_ref().and_then(|k| k.name.as_deref()).unwrap_or("-");
        println!("[{}] refresh {name} from {:?}", ctx.handle, msg.service_name);
    }

    fn on_update(&self, msg: &Msg, ctx: &EventContext) {
        println!("[{}] update {:?}", ctx.handle, msg.payload);
    }

    fn on_status(&self, msg: &Msg, ctx: &EventContext) {
        let state = msg.state.clone().unwrap_or_default();
        println!("[{}] status {:?} {}", ctx.handle, state.stream_state, state.text);
    }
}

/// Answer each request with a refresh and a few updates
async fn provider(mut requests: mpsc::UnboundedReceiver<Msg>, replies: mpsc::UnboundedSender<Msg>) {
    while let Some(msg) = requests.recv().await {
        match msg.class {
            MsgClass::Request => {
                let mut refresh = Msg::refresh(msg.stream_id, msg.domain_type, State::open_ok());
                refresh.key = msg.key.clone();
                let _ = replies.send(refresh);
                for tick in 0..3u8 {
                    let update = Msg::update(msg.stream_id, msg.domain_type, Bytes::from(vec![tick]));
                    let _ = replies.send(update);
                }
            }
            MsgClass::Close => tracing::info!(stream_id = msg.stream_id, "Provider saw close"),
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> itemstream::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let io = Collaborators {
        reactor: Arc::new(LoopbackReactor),
        codec: Arc::new(PayloadCodec),
        directory: Arc::new(OneService),
        selector: Arc::new(NoopSelector),
    };
    let config = SessionConfig::consumer("Consumer_1").channel(ChannelConfig::new("Channel_1"));
    let (consumer, mut events) = Consumer::new(config, io)?;
    let ids = consumer.connect()?;
    let engine = Arc::clone(consumer.engine());
    let timers = engine.spawn_timeout_task();

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    tokio::spawn(provider(request_rx, reply_tx));

    let channel: Arc<dyn ReactorChannel> = Arc::new(LoopbackChannel { outbound: request_tx });
    engine.on_channel_event(ids[0], ChannelEventKind::Up, &channel, None);
    engine.on_channel_event(ids[0], ChannelEventKind::Ready, &channel, None);

    let client: Arc<dyn ItemClient> = Arc::new(PrintClient);
    let ibm = consumer.subscribe(
        ReqMsg::new().name("IBM.N").service_name("DIRECT_FEED"),
        Arc::clone(&client),
        None,
    )?;
    consumer.subscribe(
        ReqMsg::new().service_name("DIRECT_FEED").batch(["TRI.N", "MSFT.O"]),
        Arc::clone(&client),
        None,
    )?;
    // No such service: the handle gets a closed status shortly
    consumer.subscribe(
        ReqMsg::new().name("VOD.L").service_name("LSE"),
        Arc::clone(&client),
        None,
    )?;

    let deadline = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            Some(reply) = reply_rx.recv() => engine.on_msg(ids[0], reply),
            Some(event) = events.recv() => println!("connectivity: {event:?}"),
            _ = &mut deadline => break,
        }
    }

    consumer.unsubscribe(ibm)?;
    println!("stats: {:?}", engine.stats());
    timers.abort();
    Ok(())
}

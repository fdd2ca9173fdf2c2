//! The Elko protocol client.
//!
//! One [`HabiBot`] owns one TCP connection and one controlled avatar. The
//! client decodes the inbound frame stream, feeds every message through
//! the session scan, and dispatches it to registered listeners; outbound
//! commands go through the serialized dispatcher. Handles are cheap to
//! clone and share one underlying session.

use crate::dispatch::{self, DEFAULT_SEND_DELAY, PendingCommand, PendingSend};
use crate::frame::FrameDecoder;
use crate::message::{Message, OP_CORPORATE, OP_DISCORPORATE, OP_ENTERCONTEXT};
use crate::session::{ME, Session};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Pause between connection attempts after a failed reconnect. The first
/// attempt after a drop is immediate.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Errors from connection establishment.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Event categories a listener can register for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Stream connection established.
    Connected,
    /// Stream ended.
    Disconnected,
    /// A creation message marked as our own avatar was seen.
    EnteredRegion,
    /// Catch-all: every successfully decoded message.
    Msg,
    /// Messages carrying one specific operation name.
    Op(String),
}

impl EventKind {
    /// Category for one operation name.
    #[must_use]
    pub fn op(name: impl Into<String>) -> Self {
        Self::Op(name.into())
    }
}

/// Error type listeners may return; it is logged and the remaining
/// listeners for the firing still run.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Arc<dyn Fn(&HabiBot, &Message) -> Result<(), HandlerError> + Send + Sync>;

/// Shared state behind every [`HabiBot`] handle.
pub(crate) struct ClientInner {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) connected: AtomicBool,
    pub(crate) writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reconnect: AtomicBool,
    shutdown: AtomicBool,
    pub(crate) recovering: AtomicBool,
    session: Mutex<Session>,
    handlers: Mutex<HashMap<EventKind, Vec<Handler>>>,
    default_context: Mutex<Option<String>>,
    queue: mpsc::UnboundedSender<PendingCommand>,
}

impl ClientInner {
    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Handler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn default_context(&self) -> Option<String> {
        self.default_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// A persistent client for one Elko server connection.
#[derive(Clone)]
pub struct HabiBot {
    inner: Arc<ClientInner>,
}

impl HabiBot {
    /// Create a client for the given server.
    ///
    /// Spawns the outbound dispatcher, so this must be called from within
    /// a tokio runtime. No connection is made until [`HabiBot::connect`].
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            host: host.into(),
            port,
            connected: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(None),
            reconnect: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            session: Mutex::new(Session::new()),
            handlers: Mutex::new(HashMap::new()),
            default_context: Mutex::new(None),
            queue,
        });
        tokio::spawn(dispatch::run(Arc::clone(&inner), rx));
        Self { inner }
    }

    /// The configured server host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// The configured server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Whether the stream connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Turn automatic reconnection on or off (on by default).
    pub fn set_reconnect(&self, reconnect: bool) {
        self.inner.reconnect.store(reconnect, Ordering::SeqCst);
    }

    /// Remember a context to enter when [`HabiBot::enter_context`] is
    /// called without an explicit one.
    pub fn set_default_context(&self, context: impl Into<String>) {
        *self
            .inner
            .default_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(context.into());
    }

    /// Register a listener for an event category.
    ///
    /// Registration is additive only. Listeners for a fired category run
    /// synchronously, in registration order; a listener returning an error
    /// is logged and does not stop its siblings.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&HabiBot, &Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner
            .handlers()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Establish the stream connection and start reading from it.
    ///
    /// Returns once the connection is up (and `connected` listeners have
    /// run); inbound messages are processed on a background task from then
    /// on. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        let read = self.establish().await?;
        let bot = self.clone();
        tokio::spawn(async move { bot.read_loop(read).await });
        Ok(())
    }

    /// Tear the connection down without reconnecting.
    pub async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        // Dropping the write half closes the stream; the read task sees
        // EOF and runs the disconnect path.
        *self.inner.writer.lock().await = None;
    }

    /// Submit a command with the default pacing delay.
    ///
    /// The command is enqueued immediately; the returned future resolves
    /// once its wire write is acknowledged, or rejects if the connection
    /// is not established when it comes up for dispatch.
    pub fn send(&self, msg: Message) -> PendingSend {
        self.send_with_delay(msg, DEFAULT_SEND_DELAY)
    }

    /// Submit a command with an explicit pre-write delay.
    pub fn send_with_delay(&self, msg: Message, delay: Duration) -> PendingSend {
        let (done, rx) = oneshot::channel();
        let command = PendingCommand { msg, delay, done };
        // A failed enqueue drops the oneshot sender, which resolves the
        // returned future with QueueClosed.
        let _ = self.inner.queue.send(command);
        PendingSend::new(rx)
    }

    /// Enter a context, explicit argument winning over the configured one.
    pub fn enter_context(&self, context: Option<&str>) -> PendingSend {
        let context = context
            .map(str::to_string)
            .or_else(|| self.inner.default_context());
        let mut msg = Message::command(OP_ENTERCONTEXT, "session");
        match context {
            Some(context) => msg = msg.with("context", context),
            None => warn!("entercontext with no context configured"),
        }
        self.send(msg)
    }

    /// Restore the avatar to full presence.
    pub fn corporate(&self) -> PendingSend {
        self.send(Message::command(OP_CORPORATE, ME))
    }

    /// Reduce the avatar to its ghost form.
    pub fn discorporate(&self) -> PendingSend {
        self.send(Message::command(OP_DISCORPORATE, ME))
    }

    /// Resolve an alias to a full reference, echoing unknown input back.
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        self.inner.session().resolve(name)
    }

    /// Full reference for an alias, if the name table knows it.
    #[must_use]
    pub fn known_ref(&self, alias: &str) -> Option<String> {
        self.inner.session().lookup(alias).map(str::to_string)
    }

    /// Most recent creation message recorded for a full reference.
    #[must_use]
    pub fn history(&self, reference: &str) -> Option<Message> {
        self.inner.session().history(reference).cloned()
    }

    /// The controlled avatar's object payload, once known.
    #[must_use]
    pub fn avatar(&self) -> Option<Value> {
        self.inner.session().avatar().cloned()
    }

    /// The avatar's numeric object id.
    #[must_use]
    pub fn avatar_noid(&self) -> Option<i64> {
        self.inner.session().avatar_noid()
    }

    /// Object payload by numeric object id.
    #[must_use]
    pub fn object_by_noid(&self, noid: i64) -> Option<Value> {
        self.inner.session().object_by_noid(noid).cloned()
    }

    /// First modifier of the object at a numeric object id.
    #[must_use]
    pub fn mod_by_noid(&self, noid: i64) -> Option<Value> {
        self.inner.session().mod_by_noid(noid).cloned()
    }

    /// Whether the avatar is currently in its reduced ghost presence.
    #[must_use]
    pub fn is_ghosted(&self) -> bool {
        self.inner.session().is_ghosted()
    }

    /// Process one already-decoded frame as if it had arrived on the
    /// stream. Replay and test seam; normal operation feeds frames from
    /// the connection read task.
    pub fn ingest(&self, frame: &str) {
        self.handle_frame(frame);
    }

    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    async fn establish(&self) -> Result<OwnedReadHalf, ConnectError> {
        let stream = TcpStream::connect((self.inner.host.as_str(), self.inner.port))
            .await
            .map_err(|source| ConnectError::Connect {
                host: self.inner.host.clone(),
                port: self.inner.port,
                source,
            })?;
        let (read, write) = stream.into_split();
        *self.inner.writer.lock().await = Some(write);
        self.inner.connected.store(true, Ordering::SeqCst);
        info!("connected to server @{}:{}", self.inner.host, self.inner.port);
        self.fire(&EventKind::Connected, &Message::new());
        Ok(read)
    }

    async fn read_loop(&self, mut read: OwnedReadHalf) {
        loop {
            self.pump(&mut read).await;
            self.mark_disconnected().await;
            if self.inner.shutdown.load(Ordering::SeqCst)
                || !self.inner.reconnect.load(Ordering::SeqCst)
            {
                break;
            }
            match self.reestablish().await {
                Some(next) => read = next,
                None => break,
            }
        }
    }

    /// Read until the stream ends, feeding frames through the scan.
    async fn pump(&self, read: &mut OwnedReadHalf) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            match read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    for frame in decoder.push(&buf[..n]) {
                        self.handle_frame(&frame);
                    }
                }
                Err(e) => {
                    warn!("read error on {}:{}: {e}", self.inner.host, self.inner.port);
                    break;
                }
            }
        }
        // The stream may have ended mid-frame; recover what we can.
        if let Some(frame) = decoder.flush() {
            self.handle_frame(&frame);
        }
    }

    async fn mark_disconnected(&self) {
        *self.inner.writer.lock().await = None;
        self.inner.connected.store(false, Ordering::SeqCst);
        info!(
            "disconnected from server @{}:{}",
            self.inner.host, self.inner.port
        );
        self.fire(&EventKind::Disconnected, &Message::new());
    }

    /// Reconnect until it sticks or the client is shut down. The first
    /// attempt is immediate.
    async fn reestablish(&self) -> Option<OwnedReadHalf> {
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            match self.establish().await {
                Ok(read) => return Some(read),
                Err(e) => {
                    warn!("reconnect failed: {e}");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        debug!(
            "<-{}:{}: {}",
            self.inner.host,
            self.inner.port,
            frame.trim_end()
        );
        let mut msg = match Message::parse(frame) {
            Ok(msg) => msg,
            Err(e) => {
                // Malformed frames are dropped as empty records; the
                // connection stays up.
                warn!("unable to parse frame {frame:?}: {e}");
                return;
            }
        };

        let outcome = self.inner.session().scan(&mut msg);

        if outcome.entered_region {
            self.fire(&EventKind::EnteredRegion, &msg);
        }
        if let Some(op) = msg.op().map(str::to_string) {
            self.fire(&EventKind::Op(op), &msg);
        }
        self.fire(&EventKind::Msg, &msg);
    }

    /// Run every listener for a category, in registration order.
    fn fire(&self, kind: &EventKind, msg: &Message) {
        // Snapshot under the lock so a listener may register listeners.
        let listeners: Vec<Handler> = self
            .inner
            .handlers()
            .get(kind)
            .cloned()
            .unwrap_or_default();
        if listeners.is_empty() {
            return;
        }
        debug!("running {} listeners for {kind:?}", listeners.len());
        for listener in listeners {
            if let Err(e) = listener(self, msg) {
                warn!("listener for {kind:?} failed: {e}");
            }
        }
    }
}

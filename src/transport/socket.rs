//! WebSocket transport
//!
//! Keeps one persistent connection to the edge. While the connection is down,
//! outbound messages are queued in memory and flushed in order once it comes
//! back. Unexpected closes trigger reconnects with exponential backoff.

use crate::config::SocketConfig;
use crate::error::{EdgeError, Result};
use crate::listeners::Subscription;
use crate::messages::{InboundMessage, OutboundMessage};
use crate::state::{ConnectionState, StateHandler};
use crate::transport::{backoff_delay, ErrorHandler, MessageHandler, Observers, Transport};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

/// Who asked for a connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Caller,
    /// Scheduled retry, valid only within the given session
    Retry(u64),
}

/// Messages waiting for the connection
#[derive(Default)]
struct Outbox {
    pending: VecDeque<OutboundMessage>,

    // Set while a flush runs; sends keep queueing behind it
    draining: bool,
}

/// Internal transport state
struct SocketInner {
    config: SocketConfig,

    // Owns the connection state and the session number that disconnect() bumps
    observers: Observers,

    outbox: Mutex<Outbox>,

    // Write half of the live connection
    writer: Mutex<Option<WsWriter>>,
    reader: Mutex<Option<JoinHandle<()>>>,

    // Pending reconnect, cleared once its delay has elapsed
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    attempts: AtomicU32,
    reconnect_armed: AtomicBool,
}

/// WebSocket transport with reconnect and an outbound queue
///
/// Cheaply cloneable; clones share the same connection.
#[derive(Clone)]
pub struct SocketTransport {
    inner: Arc<SocketInner>,
}

impl SocketTransport {
    pub fn new(config: SocketConfig) -> Self {
        let reconnect_armed = AtomicBool::new(config.auto_reconnect);
        Self {
            inner: Arc::new(SocketInner {
                config,
                observers: Observers::new(),
                outbox: Mutex::new(Outbox::default()),
                writer: Mutex::new(None),
                reader: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                attempts: AtomicU32::new(0),
                reconnect_armed,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    /// Messages waiting for a connection
    pub fn queued_len(&self) -> usize {
        self.inner.outbox.lock().pending.len()
    }

    /// Reconnect attempts made during the current outage
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Delay that will precede reconnect attempt `attempt` (0-indexed)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            self.inner.config.reconnect_delay,
            attempt,
            self.inner.config.max_reconnect_delay,
        )
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn connect(&self) -> Result<()> {
        let state = self.inner.observers.state.get();
        if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return Ok(());
        }

        // An explicit connect re-arms recovery and supersedes a pending retry
        self.inner
            .reconnect_armed
            .store(self.inner.config.auto_reconnect, Ordering::SeqCst);
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }

        self.inner.open(Origin::Caller).await
    }

    fn disconnect(&self) {
        let inner = &self.inner;
        inner.reconnect_armed.store(false, Ordering::SeqCst);

        // Stale timers, readers and handshakes can no longer move the state
        let changed = inner
            .observers
            .state
            .end_session(ConnectionState::Disconnected);

        if let Some(timer) = inner.reconnect_timer.lock().take() {
            debug!("Cancelled pending reconnect");
            timer.abort();
        }
        if let Some(reader) = inner.reader.lock().take() {
            reader.abort();
        }
        if let Some(writer) = inner.writer.lock().take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(close_writer(writer));
            }
        }

        inner.outbox.lock().draining = false;
        inner.attempts.store(0, Ordering::SeqCst);
        if changed {
            info!(url = %inner.config.url, "Disconnected");
        }
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let writer = {
            let mut outbox = self.inner.outbox.lock();
            let live = if !outbox.draining
                && self.inner.observers.state.get() == ConnectionState::Connected
            {
                self.inner.writer.lock().clone()
            } else {
                None
            };

            match live {
                Some(writer) => writer,
                None => {
                    outbox.pending.push_back(message);
                    debug!(queued = outbox.pending.len(), "Queued message until connected");
                    return Ok(());
                }
            }
        };

        if let Err(e) = write_frame(&writer, &message).await {
            self.inner.observers.emit_error(&e);
            return Err(e);
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.inner.observers.on_message(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> Subscription {
        self.inner.observers.state.subscribe(handler)
    }

    fn on_error(&self, handler: ErrorHandler) -> Subscription {
        self.inner.observers.on_error(handler)
    }

    fn state(&self) -> ConnectionState {
        self.inner.observers.state.get()
    }
}

impl SocketInner {
    async fn open(self: &Arc<Self>, origin: Origin) -> Result<()> {
        let state = &self.observers.state;
        let session = match origin {
            Origin::Caller => state.set_if(
                &[
                    ConnectionState::Disconnected,
                    ConnectionState::Error,
                    ConnectionState::Reconnecting,
                ],
                ConnectionState::Connecting,
            ),
            Origin::Retry(session) => state
                .set_if_in_session(
                    session,
                    &[ConnectionState::Reconnecting],
                    ConnectionState::Connecting,
                )
                .then_some(session),
        };
        let Some(session) = session else {
            return Ok(());
        };

        debug!(url = %self.config.url, ?origin, "Connecting");

        let handshake = timeout(
            self.config.connect_timeout,
            connect_async(self.config.url.as_str()),
        )
        .await;

        let ws = match handshake {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                return Err(self.handshake_failed(
                    EdgeError::Connection(e.to_string()),
                    origin,
                    session,
                ))
            }
            Err(_) => return Err(self.handshake_failed(EdgeError::Timeout, origin, session)),
        };

        let (sink, stream) = ws.split();
        let writer: WsWriter = Arc::new(tokio::sync::Mutex::new(sink));
        *self.writer.lock() = Some(writer.clone());
        self.outbox.lock().draining = true;
        self.attempts.store(0, Ordering::SeqCst);

        if !state.set_if_in_session(
            session,
            &[ConnectionState::Connecting],
            ConnectionState::Connected,
        ) {
            debug!("Dropping connection opened after disconnect");
            {
                let mut current = self.writer.lock();
                if current.as_ref().is_some_and(|w| Arc::ptr_eq(w, &writer)) {
                    current.take();
                }
            }
            close_writer(writer).await;
            return Err(EdgeError::Connection(
                "Disconnected during handshake".into(),
            ));
        }
        info!(url = %self.config.url, "Connected");

        let reader = tokio::spawn(read_loop(self.clone(), stream, session));
        if let Some(stale) = self.reader.lock().replace(reader) {
            stale.abort();
        }

        self.flush(session, &writer).await;
        Ok(())
    }

    /// Report a failed handshake and settle the state machine
    fn handshake_failed(self: &Arc<Self>, error: EdgeError, origin: Origin, session: u64) -> EdgeError {
        if self.observers.state.session() != session {
            return error;
        }

        warn!(url = %self.config.url, error = %error, ?origin, "Handshake failed");
        self.observers.emit_error(&error);

        match origin {
            Origin::Caller => {
                self.observers.state.set_if_in_session(
                    session,
                    &[ConnectionState::Connecting],
                    ConnectionState::Error,
                );
            }
            Origin::Retry(_) => self.handle_unexpected_close(session),
        }
        error
    }

    /// Whether `writer` still belongs to the live connection of `session`
    fn is_live(&self, session: u64, writer: &WsWriter) -> bool {
        self.observers.state.session() == session
            && self
                .writer
                .lock()
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, writer))
    }

    /// Send everything queued while disconnected, oldest first
    ///
    /// Sends issued meanwhile keep queueing, so the loop runs until the outbox
    /// is empty and only then lets them write directly.
    async fn flush(&self, session: u64, writer: &WsWriter) {
        loop {
            let batch: Vec<OutboundMessage> = {
                let mut outbox = self.outbox.lock();
                if !self.is_live(session, writer) {
                    return;
                }
                if outbox.pending.is_empty() {
                    outbox.draining = false;
                    return;
                }
                outbox.pending.drain(..).collect()
            };

            debug!(count = batch.len(), "Flushing queued messages");
            let mut batch = batch.into_iter();
            while let Some(message) = batch.next() {
                if !self.is_live(session, writer) {
                    // Connection went away; keep the rest for the next one
                    let mut outbox = self.outbox.lock();
                    let rest: Vec<OutboundMessage> =
                        std::iter::once(message).chain(batch).collect();
                    for message in rest.into_iter().rev() {
                        outbox.pending.push_front(message);
                    }
                    return;
                }
                if let Err(e) = write_frame(writer, &message).await {
                    warn!(error = %e, id = ?message.id, "Dropping queued message");
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match InboundMessage::parse(text) {
            Ok(message) => self.observers.emit_message(&message),
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.observers
                    .emit_error(&EdgeError::MalformedMessage(e.to_string()));
            }
        }
    }

    fn handle_unexpected_close(self: &Arc<Self>, session: u64) {
        let state = &self.observers.state;
        if state.session() != session {
            return;
        }
        self.writer.lock().take();

        let attempts = self.attempts.load(Ordering::SeqCst);
        let limit = self.config.max_reconnect_attempts;
        let armed = self.reconnect_armed.load(Ordering::SeqCst);

        if armed && (limit == 0 || attempts < limit) {
            let delay = backoff_delay(
                self.config.reconnect_delay,
                attempts,
                self.config.max_reconnect_delay,
            );
            if state.set_in_session(session, ConnectionState::Reconnecting) {
                info!(attempt = attempts + 1, ?delay, "Reconnect scheduled");
                self.schedule_reconnect(delay, session);
            }
        } else {
            if armed {
                warn!(attempts, "Reconnect attempts exhausted");
            }
            state.set_in_session(session, ConnectionState::Disconnected);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration, session: u64) {
        let inner = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Past this point the attempt is guarded by its session only
            inner.reconnect_timer.lock().take();
            if inner.observers.state.session() != session
                || !inner.reconnect_armed.load(Ordering::SeqCst)
            {
                return;
            }

            inner.attempts.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = inner.open(Origin::Retry(session)).await {
                debug!(error = %e, "Reconnect attempt failed");
            }
        });

        if let Some(stale) = self.reconnect_timer.lock().replace(timer) {
            stale.abort();
        }
    }
}

async fn write_frame(writer: &WsWriter, message: &OutboundMessage) -> Result<()> {
    let text = serde_json::to_string(message)?;
    let mut sink = writer.lock().await;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| EdgeError::Send(e.to_string()))
}

async fn close_writer(writer: WsWriter) {
    let mut sink = writer.lock().await;
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close handshake failed");
    }
}

/// Read frames until the connection ends, then hand over to reconnect logic
async fn read_loop(inner: Arc<SocketInner>, mut stream: SplitStream<WsStream>, session: u64) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => inner.handle_frame(text.as_str()),
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => inner.handle_frame(text),
                Err(e) => {
                    warn!(error = %e, "Dropping non-UTF-8 binary frame");
                    inner
                        .observers
                        .emit_error(&EdgeError::MalformedMessage(e.to_string()));
                }
            },
            Some(Ok(Message::Close(frame))) => {
                break format!("closed by peer: {:?}", frame.map(|f| f.code));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let error = EdgeError::Connection(e.to_string());
                if inner.observers.state.session() == session {
                    inner.observers.emit_error(&error);
                }
                break error.to_string();
            }
            None => break "stream ended".to_string(),
        }
    };

    if inner.observers.state.session() != session {
        return;
    }
    warn!(url = %inner.config.url, reason = %reason, "Connection lost");

    // This task is finishing; forget its handle before reconnect logic runs
    inner.reader.lock().take();
    inner.handle_unexpected_close(session);
}

//! Shared helpers for integration tests

#![allow(dead_code)]

use edgelink::{
    ConnectionState, EdgeError, ErrorHandler, InboundMessage, MessageHandler, OutboundMessage,
    Result, StateHandler, Subscription, Transport,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Route test logs through `RUST_LOG` when set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Object payload from a `json!` literal
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

struct Registry<H> {
    entries: Arc<Mutex<Vec<(u64, H)>>>,
    next_id: AtomicU64,
}

impl<H: Clone + Send + 'static> Registry<H> {
    fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn add(&self, handler: H) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().push((id, handler));
        let entries = self.entries.clone();
        Subscription::new(move || entries.lock().retain(|(entry_id, _)| *entry_id != id))
    }

    fn snapshot(&self) -> Vec<H> {
        self.entries.lock().iter().map(|(_, h)| h.clone()).collect()
    }
}

/// In-memory transport that records what the client sends
///
/// Queues while not connected and flushes in order on connect, so client
/// behavior can be checked without a network.
pub struct RecordingTransport {
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<OutboundMessage>>,
    queue: Mutex<Vec<OutboundMessage>>,
    messages: Registry<MessageHandler>,
    states: Registry<StateHandler>,
    errors: Registry<ErrorHandler>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Disconnected),
            sent: Mutex::new(Vec::new()),
            queue: Mutex::new(Vec::new()),
            messages: Registry::new(),
            states: Registry::new(),
            errors: Registry::new(),
        })
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Simulate a frame arriving from the edge
    pub fn push_inbound(&self, kind: &str, data: Value) {
        let message = InboundMessage::new(kind, object(data));
        for handler in self.messages.snapshot() {
            handler(&message);
        }
    }

    /// Simulate a transport failure
    pub fn fail(&self, error: EdgeError) {
        for handler in self.errors.snapshot() {
            handler(&error);
        }
    }

    /// Simulate the connection dropping
    pub fn drop_connection(&self) {
        self.set_state(ConnectionState::Reconnecting);
    }

    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        for handler in self.states.snapshot() {
            handler(next);
        }
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self) -> Result<()> {
        if *self.state.lock() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);
        self.set_state(ConnectionState::Connected);

        let pending: Vec<OutboundMessage> = self.queue.lock().drain(..).collect();
        self.sent.lock().extend(pending);
        Ok(())
    }

    fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if *self.state.lock() == ConnectionState::Connected {
            self.sent.lock().push(message);
        } else {
            self.queue.lock().push(message);
        }
        Ok(())
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.messages.add(handler)
    }

    fn on_state_change(&self, handler: StateHandler) -> Subscription {
        self.states.add(handler)
    }

    fn on_error(&self, handler: ErrorHandler) -> Subscription {
        self.errors.add(handler)
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

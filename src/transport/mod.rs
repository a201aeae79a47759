//! Delivery transports
//!
//! A transport moves [`OutboundMessage`]s to the edge and, where the wire
//! allows it, hands [`InboundMessage`]s back. The client only talks to the
//! [`Transport`] trait, so the WebSocket and HTTP variants are
//! interchangeable.

mod http;
mod socket;

pub use http::HttpTransport;
pub use socket::SocketTransport;

use crate::error::{EdgeError, Result};
use crate::listeners::{invoke_guarded, ListenerSet, Subscription};
use crate::messages::{InboundMessage, OutboundMessage};
use crate::state::{ConnectionState, StateCell, StateHandler};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Handler for inbound messages
pub type MessageHandler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Handler for transport errors
pub type ErrorHandler = Arc<dyn Fn(&EdgeError) + Send + Sync>;

/// Capability set every transport provides
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection. A no-op while connecting or connected.
    async fn connect(&self) -> Result<()>;

    /// Close the connection and stop any automatic recovery
    fn disconnect(&self);

    /// Deliver a message, or defer it where the transport supports that
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Observe inbound messages
    fn on_message(&self, handler: MessageHandler) -> Subscription;

    /// Observe state transitions
    fn on_state_change(&self, handler: StateHandler) -> Subscription;

    /// Observe errors, including ones also returned to a caller
    fn on_error(&self, handler: ErrorHandler) -> Subscription;

    /// Current connection state
    fn state(&self) -> ConnectionState;
}

/// Delay before attempt `attempt` (0-indexed): `base * 2^attempt`, saturating
pub fn backoff_delay(base: Duration, attempt: u32, cap: Option<Duration>) -> Duration {
    let delay = 2u32
        .checked_pow(attempt)
        .map_or(Duration::MAX, |factor| base.saturating_mul(factor));

    match cap {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// Observer registries owned by one transport instance
pub(crate) struct Observers {
    pub state: StateCell,
    messages: ListenerSet<dyn Fn(&InboundMessage) + Send + Sync>,
    errors: ListenerSet<dyn Fn(&EdgeError) + Send + Sync>,
}

impl Observers {
    pub fn new() -> Self {
        Self {
            state: StateCell::new(),
            messages: ListenerSet::new(),
            errors: ListenerSet::new(),
        }
    }

    pub fn on_message(&self, handler: MessageHandler) -> Subscription {
        self.messages.add(handler)
    }

    pub fn on_error(&self, handler: ErrorHandler) -> Subscription {
        self.errors.add(handler)
    }

    pub fn emit_message(&self, message: &InboundMessage) {
        for handler in self.messages.snapshot() {
            invoke_guarded("message", || handler(message));
        }
    }

    pub fn emit_error(&self, error: &EdgeError) {
        for handler in self.errors.snapshot() {
            invoke_guarded("error", || handler(error));
        }
    }
}

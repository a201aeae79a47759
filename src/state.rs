//! Connection state shared by every transport

use crate::listeners::{invoke_guarded, ListenerSet, Subscription};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Connection state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected; the initial and post-`disconnect()` state
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and delivering
    Connected,
    /// Waiting for a scheduled reconnect after an unexpected close
    Reconnecting,
    /// The last caller-initiated connect failed
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// Parse the lowercase wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(ConnectionState::Disconnected),
            "connecting" => Some(ConnectionState::Connecting),
            "connected" => Some(ConnectionState::Connected),
            "reconnecting" => Some(ConnectionState::Reconnecting),
            "error" => Some(ConnectionState::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler for state changes
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Current state plus the observers that hear about changes to it
///
/// Every transition also carries a session number. `end_session` bumps it, so
/// work started under an older session can no longer move the state.
pub(crate) struct StateCell {
    current: Mutex<Current>,
    observers: ListenerSet<dyn Fn(ConnectionState) + Send + Sync>,

    // Held from the state write through notification so observers see
    // transitions in the order they were applied
    ordering: ReentrantMutex<()>,
}

#[derive(Debug, Clone, Copy)]
struct Current {
    state: ConnectionState,
    session: u64,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Current {
                state: ConnectionState::Disconnected,
                session: 0,
            }),
            observers: ListenerSet::new(),
            ordering: ReentrantMutex::new(()),
        }
    }

    pub fn get(&self) -> ConnectionState {
        self.current.lock().state
    }

    /// Session the current state belongs to
    pub fn session(&self) -> u64 {
        self.current.lock().session
    }

    /// Move to `next`, notifying observers. Returns false for a no-op.
    pub fn set(&self, next: ConnectionState) -> bool {
        self.transition(None, None, next).is_some()
    }

    /// Move to `next` only when the current state is one of `from`.
    /// Returns the session the transition happened in.
    pub fn set_if(&self, from: &[ConnectionState], next: ConnectionState) -> Option<u64> {
        self.transition(None, Some(from), next)
    }

    /// Move to `next` only while `session` is still current
    pub fn set_in_session(&self, session: u64, next: ConnectionState) -> bool {
        self.transition(Some(session), None, next).is_some()
    }

    /// Like [`StateCell::set_if`], also requiring `session` to be current
    pub fn set_if_in_session(
        &self,
        session: u64,
        from: &[ConnectionState],
        next: ConnectionState,
    ) -> bool {
        self.transition(Some(session), Some(from), next).is_some()
    }

    /// Start a new session and move to `next` in one step
    pub fn end_session(&self, next: ConnectionState) -> bool {
        let _ordering = self.ordering.lock();
        let changed = {
            let mut current = self.current.lock();
            current.session += 1;
            let changed = current.state != next;
            if changed {
                debug!(from = %current.state, to = %next, session = current.session, "State transition");
                current.state = next;
            }
            changed
        };

        if changed {
            self.notify(next);
        }
        changed
    }

    fn transition(
        &self,
        session: Option<u64>,
        from: Option<&[ConnectionState]>,
        next: ConnectionState,
    ) -> Option<u64> {
        let _ordering = self.ordering.lock();
        let session = {
            let mut current = self.current.lock();
            if session.is_some_and(|s| s != current.session)
                || from.is_some_and(|from| !from.contains(&current.state))
                || current.state == next
            {
                return None;
            }
            debug!(from = %current.state, to = %next, "State transition");
            current.state = next;
            current.session
        };

        self.notify(next);
        Some(session)
    }

    fn notify(&self, state: ConnectionState) {
        for observer in self.observers.snapshot() {
            invoke_guarded("state_change", || observer(state));
        }
    }

    pub fn subscribe(&self, handler: StateHandler) -> Subscription {
        self.observers.add(handler)
    }
}

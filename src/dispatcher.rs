//! Routes inbound messages to handlers registered per message type

use crate::listeners::{invoke_guarded, Subscription};
use crate::messages::InboundMessage;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Handler for a dispatched event; receives the message `data` only
pub type EventHandler = Arc<dyn Fn(&Map<String, Value>) + Send + Sync>;

type HandlerMap = Mutex<HashMap<String, Vec<(Uuid, EventHandler)>>>;

/// Event-type to handler-set router
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Arc<HandlerMap>,
    debug: bool,
}

impl EventDispatcher {
    pub fn new(debug: bool) -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            debug,
        }
    }

    /// Register `handler` for messages of `event_type`
    pub fn subscribe(&self, event_type: &str, handler: EventHandler) -> Subscription {
        let id = Uuid::new_v4();
        self.insert(event_type, id, handler);
        self.remover(event_type, id)
    }

    /// Register `handler` to run for the next message of `event_type` only
    pub fn subscribe_once(&self, event_type: &str, handler: EventHandler) -> Subscription {
        let id = Uuid::new_v4();
        let fired = Arc::new(AtomicBool::new(false));
        let handlers = Arc::downgrade(&self.handlers);
        let key = event_type.to_string();

        let wrapper: EventHandler = Arc::new(move |data: &Map<String, Value>| {
            if fired.swap(true, Ordering::SeqCst) {
                return;
            }
            remove_handler(&handlers, &key, id);
            handler(data);
        });

        self.insert(event_type, id, wrapper);
        self.remover(event_type, id)
    }

    /// Remove every handler for `event_type`
    pub fn unsubscribe_all(&self, event_type: &str) {
        self.handlers.lock().remove(event_type);
    }

    /// Remove every handler for every type
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    pub fn has_handlers(&self, event_type: &str) -> bool {
        self.handlers.lock().contains_key(event_type)
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .lock()
            .get(event_type)
            .map_or(0, |handlers| handlers.len())
    }

    /// Types that currently have at least one handler
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.lock().keys().cloned().collect();
        types.sort();
        types
    }

    /// Deliver `message.data` to every handler registered for `message.kind`
    pub fn dispatch(&self, message: &InboundMessage) {
        let handlers: Vec<EventHandler> = match self.handlers.lock().get(&message.kind) {
            Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
            None => Vec::new(),
        };

        if handlers.is_empty() {
            if self.debug {
                debug!(event_type = %message.kind, "No handlers for message");
            }
            return;
        }

        for handler in handlers {
            invoke_guarded("event", || handler(&message.data));
        }
    }

    fn insert(&self, event_type: &str, id: Uuid, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(event_type.to_string())
            .or_default()
            .push((id, handler));
    }

    fn remover(&self, event_type: &str, id: Uuid) -> Subscription {
        let handlers = Arc::downgrade(&self.handlers);
        let key = event_type.to_string();
        Subscription::new(move || remove_handler(&handlers, &key, id))
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Drop one handler, and the type entry with it once empty
fn remove_handler(handlers: &Weak<HandlerMap>, event_type: &str, id: Uuid) {
    let Some(handlers) = handlers.upgrade() else {
        return;
    };
    let mut handlers = handlers.lock();
    if let Some(set) = handlers.get_mut(event_type) {
        set.retain(|(entry_id, _)| *entry_id != id);
        if set.is_empty() {
            handlers.remove(event_type);
        }
    }
}

//! Edge client: one transport plus an event dispatcher

use crate::config::ClientConfig;
use crate::dispatcher::{EventDispatcher, EventHandler};
use crate::error::{EdgeError, Result};
use crate::listeners::Subscription;
use crate::messages::{InboundMessage, OutboundMessage};
use crate::state::ConnectionState;
use crate::transport::Transport;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reserved event type carrying `{"state": "<state>"}` on every transition
pub const CONNECTION_STATE_EVENT: &str = "connection_state_changed";

/// Reserved event type carrying `{"kind": "...", "message": "..."}` per error
pub const TRANSPORT_ERROR_EVENT: &str = "transport_error";

fn is_reserved(event_type: &str) -> bool {
    event_type == CONNECTION_STATE_EVENT || event_type == TRANSPORT_ERROR_EVENT
}

/// Payload of a [`TRANSPORT_ERROR_EVENT`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: String,
    pub message: String,
}

impl From<&EdgeError> for ErrorEvent {
    fn from(error: &EdgeError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    debug: bool,

    // Observers registered on the transport, released by destroy()
    transport_subscriptions: Mutex<Vec<Subscription>>,
}

/// Event client
///
/// Sends caller events through the configured transport and routes inbound
/// messages, state changes and transport errors to handlers registered by
/// type. This struct is cheaply cloneable as it uses an internal Arc.
#[derive(Clone)]
pub struct EdgeClient {
    inner: Arc<ClientInner>,
}

impl EdgeClient {
    /// Create a client; connects in the background unless disabled
    pub fn new(config: ClientConfig) -> Self {
        let dispatcher = EventDispatcher::new(config.debug);
        let subscriptions = wire_transport(config.transport.as_ref(), &dispatcher);

        let client = Self {
            inner: Arc::new(ClientInner {
                transport: config.transport,
                dispatcher,
                debug: config.debug,
                transport_subscriptions: Mutex::new(subscriptions),
            }),
        };

        if config.auto_connect {
            client.spawn_connect();
        }
        client
    }

    fn spawn_connect(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No Tokio runtime available, skipping auto-connect");
            return;
        };

        let transport = self.inner.transport.clone();
        runtime.spawn(async move {
            if let Err(e) = transport.connect().await {
                warn!(error = %e, "Auto-connect failed");
            }
        });
    }

    /// Connect the underlying transport
    pub async fn connect(&self) -> Result<()> {
        self.inner.transport.connect().await
    }

    /// Disconnect the underlying transport
    pub fn disconnect(&self) {
        self.inner.transport.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Send an event; `data` must serialize to a JSON object
    pub async fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let data = match serde_json::to_value(data)? {
            Value::Object(map) => map,
            other => {
                return Err(EdgeError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    json_type(&other)
                )))
            }
        };

        if let Some(name) = data.get("event").and_then(Value::as_str) {
            if is_reserved(name) {
                warn!(event = name, "Event name collides with a reserved event type");
            }
        }

        let message = OutboundMessage::event(data);
        if self.inner.debug {
            debug!(id = ?message.id, "Sending event");
        }
        self.inner.transport.send(message).await
    }

    /// Send `properties` with an `"event": name` field added
    pub async fn send_event<T: Serialize + ?Sized>(&self, name: &str, properties: &T) -> Result<()> {
        let mut data = match serde_json::to_value(properties)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EdgeError::InvalidPayload(format!(
                    "expected JSON object properties, got {}",
                    json_type(&other)
                )))
            }
        };
        data.insert("event".to_string(), Value::String(name.to_string()));
        self.send(&data).await
    }

    /// Handle every message of `event_type`
    pub fn on<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Map<String, Value>) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.inner.dispatcher.subscribe(event_type, handler)
    }

    /// Handle the next message of `event_type` only
    pub fn once<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Map<String, Value>) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.inner.dispatcher.subscribe_once(event_type, handler)
    }

    /// Remove every handler for `event_type`
    pub fn off(&self, event_type: &str) {
        self.inner.dispatcher.unsubscribe_all(event_type);
    }

    /// Observe connection state changes
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on(CONNECTION_STATE_EVENT, move |data| {
            if let Some(state) = data
                .get("state")
                .and_then(Value::as_str)
                .and_then(ConnectionState::parse)
            {
                handler(state);
            }
        })
    }

    /// Observe transport errors
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.on(TRANSPORT_ERROR_EVENT, move |data| {
            match serde_json::from_value::<ErrorEvent>(Value::Object(data.clone())) {
                Ok(event) => handler(&event),
                Err(e) => warn!(error = %e, "Unreadable transport error event"),
            }
        })
    }

    /// Disconnect and release every handler
    pub fn destroy(&self) {
        self.inner.transport.disconnect();
        let subscriptions: Vec<Subscription> =
            self.inner.transport_subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.inner.dispatcher.clear();
    }
}

/// Republish transport traffic and lifecycle through the dispatcher
fn wire_transport(transport: &dyn Transport, dispatcher: &EventDispatcher) -> Vec<Subscription> {
    let messages = dispatcher.clone();
    let states = dispatcher.clone();
    let errors = dispatcher.clone();

    vec![
        transport.on_message(Arc::new(move |message: &InboundMessage| {
            messages.dispatch(message)
        })),
        transport.on_state_change(Arc::new(move |state: ConnectionState| {
            let mut data = Map::new();
            data.insert("state".to_string(), Value::String(state.as_str().to_string()));
            states.dispatch(&InboundMessage::new(CONNECTION_STATE_EVENT, data));
        })),
        transport.on_error(Arc::new(move |error: &EdgeError| {
            let data = match serde_json::to_value(ErrorEvent::from(error)) {
                Ok(Value::Object(map)) => map,
                _ => Map::new(),
            };
            errors.dispatch(&InboundMessage::new(TRANSPORT_ERROR_EVENT, data));
        })),
    ]
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpConfig, SocketConfig};
    use crate::transport::{HttpTransport, SocketTransport};
    use serde_json::json;

    fn socket_client() -> EdgeClient {
        let transport = Arc::new(SocketTransport::new(SocketConfig::new("ws://localhost:9")));
        EdgeClient::new(ClientConfig::new(transport).manual_connect())
    }

    #[test]
    fn test_client_initial_state() {
        let client = socket_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_auto_connect_without_runtime_is_skipped() {
        let transport = Arc::new(SocketTransport::new(SocketConfig::new("ws://localhost:9")));
        let client = EdgeClient::new(ClientConfig::new(transport));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(CONNECTION_STATE_EVENT));
        assert!(is_reserved(TRANSPORT_ERROR_EVENT));
        assert!(!is_reserved("purchase"));
    }

    #[test]
    fn test_error_event_from_error() {
        let event = ErrorEvent::from(&EdgeError::RequestTimeout);
        assert_eq!(event.kind, "request_timeout");
        assert_eq!(event.message, "Request timed out");
    }

    #[test]
    fn test_json_type_names() {
        assert_eq!(json_type(&json!(null)), "null");
        assert_eq!(json_type(&json!([1])), "array");
        assert_eq!(json_type(&json!("x")), "string");
        assert_eq!(json_type(&json!({})), "object");
    }

    #[tokio::test]
    async fn test_send_rejects_non_object() {
        let client = socket_client();
        let result = client.send(&json!([1, 2, 3])).await;
        assert!(matches!(result, Err(EdgeError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_send_event_rejects_scalar_properties() {
        let client = socket_client();
        let result = client.send_event("purchase", &42).await;
        assert!(matches!(result, Err(EdgeError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn test_state_changes_are_republished() {
        let transport = Arc::new(HttpTransport::new(HttpConfig::new("http://localhost:9")).unwrap());
        let client = EdgeClient::new(ClientConfig::new(transport).manual_connect());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_state_change(move |state| sink.lock().push(state));

        client.connect().await.unwrap();
        client.disconnect();

        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connected, ConnectionState::Disconnected]
        );
    }

    #[tokio::test]
    async fn test_transport_errors_are_republished() {
        let transport = Arc::new(HttpTransport::new(HttpConfig::new("http://127.0.0.1:9")).unwrap());
        let client = EdgeClient::new(ClientConfig::new(transport).manual_connect());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = client.on_error(move |event| sink.lock().push(event.kind.clone()));

        client.connect().await.unwrap();
        let result = client.send(&json!({"event": "ping"})).await;

        assert!(result.is_err());
        assert_eq!(*seen.lock(), vec!["http".to_string()]);
    }

    #[test]
    fn test_destroy_clears_handlers() {
        let client = socket_client();
        let _a = client.on("purchase", |_| {});
        let _b = client.on_state_change(|_| {});

        client.destroy();

        assert!(client.dispatcher().event_types().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}

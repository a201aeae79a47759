//! Edgelink
//!
//! A client for delivering events to an edge endpoint and receiving events
//! back from it, over a reconnecting WebSocket or fire-and-forget HTTP.
//!
//! # Example
//!
//! ```no_run
//! use edgelink::{ClientConfig, EdgeClient, SocketConfig, SocketTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(SocketTransport::new(SocketConfig::new("wss://edge.example.com/ws")));
//!     let client = EdgeClient::new(ClientConfig::new(transport).manual_connect());
//!
//!     // React to server pushes
//!     let _sub = client.on("notification", |data| {
//!         println!("Notification: {:?}", data);
//!     });
//!
//!     // Track the connection lifecycle
//!     let _state = client.on_state_change(|state| println!("State: {}", state));
//!
//!     client.connect().await?;
//!
//!     // Deliver an event
//!     client.send_event("purchase", &serde_json::json!({"amount": 99.99})).await?;
//!
//!     client.destroy();
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod dispatcher;
mod error;
mod listeners;
mod messages;
mod state;
pub mod transport;

pub use client::{EdgeClient, ErrorEvent, CONNECTION_STATE_EVENT, TRANSPORT_ERROR_EVENT};
pub use config::{ClientConfig, HttpConfig, HttpMethod, SocketConfig};
pub use dispatcher::{EventDispatcher, EventHandler};
pub use error::{EdgeError, Result};
pub use listeners::Subscription;
pub use messages::{InboundMessage, OutboundMessage, EVENT_TYPE};
pub use state::{ConnectionState, StateHandler};
pub use transport::{
    backoff_delay, ErrorHandler, HttpTransport, MessageHandler, SocketTransport, Transport,
};

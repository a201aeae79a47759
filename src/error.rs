//! Error types for the edgelink client

use thiserror::Error;

/// Errors that can occur when delivering or receiving events
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Handshake failed or the connection dropped
    #[error("Connection error: {0}")]
    Connection(String),

    /// Handshake did not complete within the connect timeout
    #[error("Connection timed out")]
    Timeout,

    /// HTTP request did not complete within the request timeout
    #[error("Request timed out")]
    RequestTimeout,

    /// Transport is not connected
    #[error("Not connected")]
    NotConnected,

    /// Inbound frame could not be parsed as a message envelope
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Writing a frame to the socket failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Endpoint answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(String),

    /// Every delivery attempt failed
    #[error("Delivery failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EdgeError>,
    },

    /// Failed to serialize a message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event data was not a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration could not be applied
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EdgeError {
    /// Stable label for this error, used in `transport_error` events
    pub fn kind(&self) -> &'static str {
        match self {
            EdgeError::Connection(_) => "connection",
            EdgeError::Timeout => "connect_timeout",
            EdgeError::RequestTimeout => "request_timeout",
            EdgeError::NotConnected => "not_connected",
            EdgeError::MalformedMessage(_) => "malformed_message",
            EdgeError::Send(_) => "send",
            EdgeError::HttpStatus { .. } => "http_status",
            EdgeError::Http(_) => "http",
            EdgeError::RetriesExhausted { .. } => "retries_exhausted",
            EdgeError::Serialization(_) => "serialization",
            EdgeError::InvalidPayload(_) => "invalid_payload",
            EdgeError::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Result type for edgelink operations
pub type Result<T> = std::result::Result<T, EdgeError>;

//! Configuration for the client and its transports

use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the WebSocket transport
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Endpoint URL (e.g., "wss://edge.example.com/events")
    pub url: String,

    /// Whether to automatically reconnect after an unexpected close
    pub auto_reconnect: bool,

    /// Base delay before the first reconnect; doubles on every attempt
    pub reconnect_delay: Duration,

    /// Upper bound on the reconnect delay. `None` leaves growth uncapped.
    pub max_reconnect_delay: Option<Duration>,

    /// Maximum reconnect attempts per outage (0 = unlimited)
    pub max_reconnect_attempts: u32,

    /// Time allowed for the WebSocket handshake
    pub connect_timeout: Duration,
}

impl SocketConfig {
    /// Create a new configuration for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: None,
            max_reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Disable automatic reconnection
    pub fn no_reconnect(mut self) -> Self {
        self.auto_reconnect = false;
        self
    }

    /// Set the base reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Cap the reconnect delay
    pub fn max_reconnect_delay(mut self, max: Duration) -> Self {
        self.max_reconnect_delay = Some(max);
        self
    }

    /// Limit reconnect attempts (0 = unlimited)
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the handshake timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// HTTP method used by the fire-and-forget transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl HttpMethod {
    pub(crate) fn as_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// Configuration for the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Endpoint URL receiving the events
    pub url: String,

    /// Request method
    pub method: HttpMethod,

    /// Extra headers, merged over the JSON content-type default
    pub headers: Vec<(String, String)>,

    /// Timeout for each individual request
    pub timeout: Duration,

    /// Whether failed sends are retried
    pub retry: bool,

    /// Retries after the first attempt when `retry` is enabled
    pub max_retries: u32,

    /// Base delay between attempts; doubles on every attempt
    pub retry_delay: Duration,

    /// Upper bound on the retry delay. `None` leaves growth uncapped.
    pub max_retry_delay: Option<Duration>,
}

impl HttpConfig {
    /// Create a new configuration for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: Vec::new(),
            timeout: Duration::from_secs(10),
            retry: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: None,
        }
    }

    /// Set the request method
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable retries with the given budget and base delay
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.retry = true;
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Cap the retry delay
    pub fn max_retry_delay(mut self, max: Duration) -> Self {
        self.max_retry_delay = Some(max);
        self
    }

    /// Total attempts a single send may make
    pub fn max_attempts(&self) -> u32 {
        if self.retry {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

/// Configuration for [`EdgeClient`](crate::EdgeClient)
#[derive(Clone)]
pub struct ClientConfig {
    /// Transport used for delivery
    pub transport: Arc<dyn Transport>,

    /// Connect in the background as soon as the client is built
    pub auto_connect: bool,

    /// Log dispatcher misses and other chatter at debug level
    pub debug: bool,
}

impl ClientConfig {
    /// Create a new configuration around a transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            auto_connect: true,
            debug: false,
        }
    }

    /// Do not connect on construction
    pub fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// Enable debug logging
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("transport_state", &self.transport.state())
            .field("auto_connect", &self.auto_connect)
            .field("debug", &self.debug)
            .finish()
    }
}

//! Fire-and-forget HTTP transport
//!
//! Every send is one JSON request to the edge. There is no inbound channel;
//! the message subscription exists so the transport fits the common trait.

use crate::config::HttpConfig;
use crate::error::{EdgeError, Result};
use crate::listeners::Subscription;
use crate::messages::OutboundMessage;
use crate::state::{ConnectionState, StateHandler};
use crate::transport::{backoff_delay, ErrorHandler, MessageHandler, Observers, Transport};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

struct HttpInner {
    config: HttpConfig,
    client: reqwest::Client,
    headers: HeaderMap,
    observers: Observers,
}

/// HTTP transport with per-send retry
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<HttpInner>,
}

impl HttpTransport {
    /// Build a transport; fails if a configured header is not valid HTTP
    pub fn new(config: HttpConfig) -> Result<Self> {
        let headers = build_headers(&config.headers)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EdgeError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(HttpInner {
                config,
                client,
                headers,
                observers: Observers::new(),
            }),
        })
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn config(&self) -> &HttpConfig {
        &self.inner.config
    }

    /// Headers sent with every request
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }
}

/// JSON content type first, then caller headers replacing any defaults
fn build_headers(extra: &[(String, String)]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| EdgeError::InvalidConfig(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| EdgeError::InvalidConfig(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<()> {
        if self.inner.observers.state.set(ConnectionState::Connected) {
            info!(url = %self.inner.config.url, "HTTP transport ready");
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.inner.observers.state.set(ConnectionState::Disconnected);
    }

    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.inner.observers.state.get() != ConnectionState::Connected {
            return Err(EdgeError::NotConnected);
        }

        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(e) => {
                let error = EdgeError::from(e);
                self.inner.observers.emit_error(&error);
                return Err(error);
            }
        };

        let config = &self.inner.config;
        let max_attempts = config.max_attempts();
        let mut attempt = 0u32;

        let last_error = loop {
            match self.inner.post(body.clone()).await {
                Ok(()) => {
                    if attempt > 0 {
                        debug!(attempt = attempt + 1, "Delivered after retry");
                    }
                    return Ok(());
                }
                Err(e) => {
                    debug!(attempt = attempt + 1, max_attempts, error = %e, "Delivery attempt failed");
                    if attempt + 1 >= max_attempts {
                        break e;
                    }
                    let delay = backoff_delay(config.retry_delay, attempt, config.max_retry_delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let error = if max_attempts > 1 {
            EdgeError::RetriesExhausted {
                attempts: max_attempts,
                source: Box::new(last_error),
            }
        } else {
            last_error
        };
        warn!(url = %config.url, id = ?message.id, error = %error, "Delivery failed");
        self.inner.observers.emit_error(&error);
        Err(error)
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

impl HttpInner {
    /// One request, bounded by the configured timeout
    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let request = self
            .client
            .request(self.config.method.as_reqwest(), &self.config.url)
            .headers(self.headers.clone())
            .body(body)
            .send();

        let response = timeout(self.config.timeout, request)
            .await
            .map_err(|_| EdgeError::RequestTimeout)?
            .map_err(|e| EdgeError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(EdgeError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_default_headers() {
        let headers = build_headers(&[]).unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_caller_headers_override_defaults() {
        let headers = build_headers(&[
            ("content-type".to_string(), "application/vnd.edge+json".to_string()),
            ("X-Api-Key".to_string(), "secret".to_string()),
        ])
        .unwrap();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/vnd.edge+json");
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert_eq!(headers.len(), 2);
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let result = HttpTransport::new(
            HttpConfig::new("http://localhost").header("bad header", "value"),
        );
        assert!(matches!(result, Err(EdgeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_are_immediate() {
        let transport = HttpTransport::new(HttpConfig::new("http://localhost")).unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        transport.connect().await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);

        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let transport = HttpTransport::new(HttpConfig::new("http://localhost")).unwrap();
        let result = transport
            .send(OutboundMessage::new("event", Map::new()))
            .await;
        assert!(matches!(result, Err(EdgeError::NotConnected)));
    }
}

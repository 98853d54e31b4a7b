//! Construction of [`HubConnection`]s.
//!
//! The URL is the only required setting.  Everything else has a default: the
//! WebSocket transport with a ten-second connect timeout and no delegate.
//!
//! ```rust
//! use hub_client::HubConnectionBuilder;
//!
//! let connection = HubConnectionBuilder::new()
//!     .with_url("https://chat.example.com/chathub")
//!     .build()
//!     .expect("valid url");
//! assert_eq!(connection.url().as_str(), "wss://chat.example.com/chathub");
//! ```

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::application::error::HubError;
use crate::application::hub_connection::{ConnectionDelegate, HubConnection};
use crate::application::transport::Transport;
use crate::infrastructure::transport::WebSocketTransport;

/// Builder for [`HubConnection`].
#[derive(Default)]
pub struct HubConnectionBuilder {
    url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    delegate: Option<Arc<dyn ConnectionDelegate>>,
    connect_timeout: Option<Duration>,
}

impl HubConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hub endpoint.  `http(s)` URLs are rewritten to `ws(s)`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Replaces the default WebSocket transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ConnectionDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Connect timeout for the default WebSocket transport.  Ignored when a
    /// custom transport is set.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Validates the settings and creates the connection in `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidUrl`] if no URL was given or it is not a
    /// `ws`, `wss`, `http` or `https` URL.
    pub fn build(self) -> Result<HubConnection, HubError> {
        let raw = self
            .url
            .ok_or_else(|| HubError::InvalidUrl("no hub url configured".to_string()))?;
        let url = normalize_hub_url(&raw)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(match self.connect_timeout {
                Some(timeout) => WebSocketTransport::new(timeout),
                None => WebSocketTransport::default(),
            }),
        };
        Ok(HubConnection::new(url, transport, self.delegate))
    }
}

/// Parses a hub URL and maps `http`/`https` to `ws`/`wss`.
///
/// # Errors
///
/// Returns [`HubError::InvalidUrl`] for unparsable URLs, other schemes, or
/// URLs without a host.
pub fn normalize_hub_url(raw: &str) -> Result<Url, HubError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| HubError::InvalidUrl(format!("{raw}: {e}")))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(HubError::InvalidUrl(format!(
                "{raw}: unsupported scheme `{other}`"
            )))
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(HubError::InvalidUrl(format!("{raw}: missing host")));
    }
    url.set_scheme(scheme)
        .map_err(|()| HubError::InvalidUrl(format!("{raw}: cannot use scheme `{scheme}`")))?;
    Ok(url)
}

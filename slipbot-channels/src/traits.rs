//! Gateway traits for outbound messaging.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Channel is {0}, not ready to send")]
    NotReady(ConnectionState),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ChannelError> for slipbot_common::Error {
    fn from(err: ChannelError) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Connection state of a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// Status snapshot reported by `GET /whatsapp/status`.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub channel: &'static str,
    pub state: ConnectionState,
    pub ready: bool,
}

/// Outbound side of a messaging transport.
///
/// `address` is a transport contact address as produced by
/// `PhoneMatcher::to_address`. Both send operations fail with
/// [`ChannelError::NotReady`] unless the gateway is connected.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Get the gateway name.
    fn name(&self) -> &'static str;

    /// Current connection state.
    async fn state(&self) -> ConnectionState;

    async fn status(&self) -> GatewayStatus {
        let state = self.state().await;
        GatewayStatus {
            channel: self.name(),
            state,
            ready: state == ConnectionState::Connected,
        }
    }

    /// Send a plain text message.
    async fn send_text(&self, address: &str, text: &str) -> ChannelResult<()>;

    /// Send a PDF document with an optional caption.
    async fn send_document(
        &self,
        address: &str,
        document: Vec<u8>,
        file_name: &str,
        caption: Option<&str>,
    ) -> ChannelResult<()>;
}

/// Gateway used when no transport is configured; every send fails.
pub struct DisconnectedGateway;

#[async_trait]
impl MessageGateway for DisconnectedGateway {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    async fn send_text(&self, _address: &str, _text: &str) -> ChannelResult<()> {
        Err(ChannelError::NotReady(ConnectionState::Disconnected))
    }

    async fn send_document(
        &self,
        _address: &str,
        _document: Vec<u8>,
        _file_name: &str,
        _caption: Option<&str>,
    ) -> ChannelResult<()> {
        Err(ChannelError::NotReady(ConnectionState::Disconnected))
    }
}

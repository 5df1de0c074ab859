//! Transport-level errors.

use std::time::Duration;

use tokio_tungstenite::tungstenite;
use vigil_mirror::TransportError;

/// Why a session could not be opened or ended.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    /// The WebSocket handshake or the socket failed.
    #[error("websocket error: {0}")]
    Socket(#[from] tungstenite::Error),
    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// A frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    /// The server closed the session.
    #[error("closed by server{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ClosedByServer(Option<String>),
    /// The read half ended without a close frame.
    #[error("stream ended")]
    StreamEnded,
    /// Nothing was received for too long.
    #[error("no traffic for {0:?}")]
    Stale(Duration),
}

impl WsError {
    /// Short classification string for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Socket(_) => "socket",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::Encode(_) => "encode",
            Self::ClosedByServer(_) => "closed_by_server",
            Self::StreamEnded => "stream_ended",
            Self::Stale(_) => "stale",
        }
    }
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::HandshakeTimeout(after) => TransportError::Timeout(after),
            other => TransportError::Handshake(other.to_string()),
        }
    }
}

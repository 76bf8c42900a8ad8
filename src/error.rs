use thiserror::Error;

/// Failure raised by the host application while probing or executing a
/// command. `Display` is the host's message verbatim, so it can travel back
/// to a remote caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for HostError {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for HostError {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Error type for the relay. Transports, the hub and the CLI all report
/// through this enum; host failures stay in [`HostError`] until they are
/// stringified into an error reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0} source already registered")]
    DuplicateSource(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("{0} is not connected")]
    NotConnected(&'static str),
    #[error("failed to post message to peer: {0}")]
    PeerClosed(String),
    #[error("no apps connected")]
    NoApps,
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("{0}")]
    Remote(String),
    #[error("app disconnected before replying")]
    Disconnected,
    #[error("{0}")]
    InvalidArgs(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Http(e.to_string())
    }
}

/// Allow converting RelayError to String for surfaces that only carry text.
impl From<RelayError> for String {
    fn from(e: RelayError) -> String {
        e.to_string()
    }
}

//! Concrete transports. Each one decodes inbound envelopes, hands them to a
//! [`Dispatcher`](crate::dispatcher::Dispatcher) and implements the send
//! hooks of [`CommandSource`](crate::dispatcher::CommandSource).

pub mod websocket;
pub mod window;

use std::fmt;

use serde::Serialize;

pub use websocket::WebSocketCommandSource;
pub use window::WindowCommandSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebSocket,
    Window,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WebSocket => "websocket",
            Self::Window => "window",
        })
    }
}

/// A transport as registered with the
/// [`RemoteCommandManager`](crate::manager::RemoteCommandManager).
pub trait RemoteSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Stop receiving and release the underlying channel.
    fn close(&self);
}

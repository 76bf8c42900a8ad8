//! Transport-agnostic request handling.
//!
//! A transport decodes an envelope and calls [`Dispatcher::handle`] with an
//! opaque peer handle. The dispatcher resolves the request against the
//! [`RemoteCommandManager`] and hands the reply back to the same transport
//! through its [`CommandSource`] hooks. Nothing is kept between requests.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::error::RelayError;
use crate::manager::RemoteCommandManager;
use crate::protocol::{ErrorResponse, MessageType, Request, Response};

// ── Readiness ───────────────────────────────────────────────────

/// One-shot readiness signal. Waiters that arrive before [`ReadyLatch::resolve`]
/// are parked, never dropped; waiters that arrive after return immediately.
#[derive(Debug, Clone)]
pub struct ReadyLatch {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn resolve(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

// ── Transport capability ────────────────────────────────────────

/// Send hooks a transport provides to the dispatcher.
#[async_trait]
pub trait CommandSource: Send + Sync {
    /// Whatever identifies the reply target: nothing for a single-peer
    /// socket, the originating window for a multiplexed channel.
    type Peer: Send + Sync;

    /// Resolves once the transport can carry replies.
    async fn ready(&self);

    async fn send_response(&self, response: Response, peer: &Self::Peer) -> Result<(), RelayError>;

    async fn send_error(&self, error: ErrorResponse, peer: &Self::Peer) -> Result<(), RelayError>;
}

// ── Dispatcher ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct Dispatcher {
    manager: Arc<RemoteCommandManager>,
}

impl Dispatcher {
    pub fn new(manager: Arc<RemoteCommandManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<RemoteCommandManager> {
        &self.manager
    }

    /// Resolve one request and reply through `source`. Unknown request types
    /// are logged and dropped without a reply. Every other outcome, including
    /// a failing command, ends in exactly one reply attempt (plus at most one
    /// fallback error if that attempt fails).
    pub async fn handle<S>(&self, source: &S, request: Request, peer: &S::Peer)
    where
        S: CommandSource + ?Sized,
    {
        source.ready().await;
        debug!(
            request_id = %request.request_id,
            request_type = %request.request_type,
            "Handling request"
        );

        let Some(kind) = request.kind() else {
            warn!(
                request_id = %request.request_id,
                request_type = %request.request_type,
                "Ignoring request with unknown type"
            );
            return;
        };

        let outcome = self.resolve(kind, &request).await;
        let request_id = request.request_id;

        let (sent, original) = match outcome {
            Ok(content) => {
                let response = Response {
                    request_id: request_id.clone(),
                    request_type: kind,
                    content,
                };
                (source.send_response(response, peer).await, None)
            }
            Err(message) => {
                let reply = ErrorResponse {
                    request_id: request_id.clone(),
                    request_type: kind,
                    error: message.clone(),
                };
                (source.send_error(reply, peer).await, Some(message))
            }
        };

        let Err(send_err) = sent else {
            return;
        };

        error!(%request_id, error = %send_err, "Failed to send reply");
        let mut message = format!("multiple errors\n{send_err}");
        if let Some(original) = original {
            message.push('\n');
            message.push_str(&original);
        }
        let fallback = ErrorResponse {
            request_id: request_id.clone(),
            request_type: kind,
            error: message,
        };
        if let Err(e) = source.send_error(fallback, peer).await {
            error!(%request_id, error = %e, "Failed to report reply failure");
        }
    }

    async fn resolve(&self, kind: MessageType, request: &Request) -> Result<Value, String> {
        match kind {
            MessageType::AppInfo => {
                serde_json::to_value(self.manager.get_app_info()).map_err(|e| e.to_string())
            }
            MessageType::Run => {
                let content = request.run_content().map_err(|e| e.to_string())?;
                self.manager
                    .run(&content.id, content.args.unwrap_or_default())
                    .await
                    .map_err(|e| non_empty(e.to_string()))
            }
        }
    }
}

fn non_empty(message: String) -> String {
    if message.is_empty() {
        "command failed".to_string()
    } else {
        message
    }
}

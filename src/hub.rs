//! Server side of the persistent socket: tracks connected apps and issues
//! requests to them.
//!
//! Each [`AppConnection`] is carrier-agnostic. Outbound envelopes go to an
//! mpsc receiver the owner drains into its socket; inbound text is fed back
//! through [`AppConnection::on_message`].

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::protocol::{decode_response, encode, AnyResponse, AppInfo, MessageType, Request, RunContent};
use crate::registry::CommandInfo;

type Reply = Result<Value, RelayError>;

// ── Connection ──────────────────────────────────────────────────

pub struct AppConnection {
    id: Uuid,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<String, oneshot::Sender<Reply>>>,
}

impl AppConnection {
    /// Create a connection and the receiver of its outbound envelopes.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            outbound,
            pending: Mutex::new(HashMap::new()),
        });
        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and wait for the correlated reply.
    pub async fn request(&self, kind: MessageType, content: Value) -> Reply {
        let request_id = Uuid::new_v4().to_string();
        let request = Request {
            request_id: request_id.clone(),
            request_type: kind.as_str().to_string(),
            content: Some(content),
        };
        let text = encode(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);
        if self.outbound.send(text).is_err() {
            self.pending.lock().remove(&request_id);
            return Err(RelayError::Disconnected);
        }

        rx.await.unwrap_or(Err(RelayError::Disconnected))
    }

    pub async fn app_info(&self) -> Result<AppInfo, RelayError> {
        let content = self.request(MessageType::AppInfo, json!({})).await?;
        Ok(serde_json::from_value(content)?)
    }

    pub async fn run(&self, command_id: &str, args: Map<String, Value>) -> Reply {
        let content = serde_json::to_value(RunContent {
            id: command_id.to_string(),
            args: Some(args),
        })?;
        self.request(MessageType::Run, content).await
    }

    /// Complete the pending request a reply belongs to.
    pub fn on_message(&self, text: &str) {
        let (request_id, reply) = match decode_response(text) {
            Ok(AnyResponse::Ok(response)) => (response.request_id, Ok(response.content)),
            Ok(AnyResponse::Error(error)) => (error.request_id, Err(RelayError::Remote(error.error))),
            Err(e) => {
                // Still fail the caller if the envelope names its request.
                let id = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("request_id")?.as_str().map(str::to_string));
                let Some(id) = id else {
                    warn!(connection = %self.id, error = %e, "Discarding undecodable reply");
                    return;
                };
                (id, Err(e))
            }
        };

        match self.pending.lock().remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!(connection = %self.id, %request_id, "Reply for unknown request"),
        }
    }

    /// Fail every pending request with [`RelayError::Disconnected`].
    pub fn close(&self) {
        let pending: Vec<_> = self.pending.lock().drain().collect();
        debug!(connection = %self.id, pending = pending.len(), "Closing connection");
        for (_, tx) in pending {
            let _ = tx.send(Err(RelayError::Disconnected));
        }
    }
}

// ── Hub ─────────────────────────────────────────────────────────

/// All connected apps, in connection order.
#[derive(Default)]
pub struct AppHub {
    apps: Mutex<IndexMap<Uuid, Arc<AppConnection>>>,
}

impl AppHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, conn: Arc<AppConnection>) {
        info!(connection = %conn.id(), "App subscribed");
        self.apps.lock().insert(conn.id(), conn);
    }

    pub fn unsubscribe(&self, id: Uuid) -> Option<Arc<AppConnection>> {
        let conn = self.apps.lock().shift_remove(&id)?;
        info!(connection = %id, "App unsubscribed");
        conn.close();
        Some(conn)
    }

    pub fn app_count(&self) -> usize {
        self.apps.lock().len()
    }

    fn first(&self) -> Result<Arc<AppConnection>, RelayError> {
        self.apps
            .lock()
            .values()
            .next()
            .cloned()
            .ok_or(RelayError::NoApps)
    }

    /// App info from every connected app. An app that fails contributes
    /// `{"error": message}` in its slot.
    pub async fn get_apps(&self) -> Vec<Value> {
        let apps: Vec<_> = self.apps.lock().values().cloned().collect();
        join_all(apps.iter().map(|app| async move {
            app.request(MessageType::AppInfo, json!({}))
                .await
                .unwrap_or_else(|e| json!({"error": e.to_string()}))
        }))
        .await
    }

    /// Run a command on the first connected app.
    pub async fn run(&self, command_id: &str, args: Map<String, Value>) -> Result<Value, RelayError> {
        debug!(command_id, "Run requested");
        self.first()?.run(command_id, args).await
    }

    /// Catalog entry for a command, from the first connected app.
    pub async fn command_info(&self, command_id: &str) -> Result<CommandInfo, RelayError> {
        let info = self.first()?.app_info().await?;
        info.commands
            .get(command_id)
            .cloned()
            .ok_or_else(|| RelayError::CommandNotFound(command_id.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{decode_request, ErrorResponse, Response};

    /// Answer every request on `rx` with `respond`, feeding replies back into
    /// `conn`.
    fn serve<F>(conn: Arc<AppConnection>, mut rx: mpsc::UnboundedReceiver<String>, respond: F)
    where
        F: Fn(&Request) -> Option<String> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                let request = decode_request(&text).unwrap();
                if let Some(reply) = respond(&request) {
                    conn.on_message(&reply);
                }
            }
        });
    }

    fn ok(request: &Request, content: Value) -> String {
        encode(&Response {
            request_id: request.request_id.clone(),
            request_type: request.kind().unwrap(),
            content,
        })
        .unwrap()
    }

    fn err(request: &Request, error: &str) -> String {
        encode(&ErrorResponse {
            request_id: request.request_id.clone(),
            request_type: request.kind().unwrap(),
            error: error.into(),
        })
        .unwrap()
    }

    fn app_info(name: &str) -> Value {
        json!({
            "name": name,
            "title": "",
            "version": "1.0.0",
            "url": "",
            "plugins": [],
            "commands": {"app:open": {"label": "Open"}}
        })
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (conn, rx) = AppConnection::new();
        serve(conn.clone(), rx, |req| match req.kind() {
            Some(MessageType::Run) => {
                let content = req.run_content().unwrap();
                Some(if content.id == "app:open" {
                    ok(req, json!({"ok": true}))
                } else {
                    err(req, "not found")
                })
            }
            _ => None,
        });

        assert_eq!(conn.run("app:open", Map::new()).await.unwrap(), json!({"ok": true}));
        let e = conn.run("app:nope", Map::new()).await.unwrap_err();
        assert!(matches!(e, RelayError::Remote(ref m) if m == "not found"));
        assert_eq!(conn.pending_len(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_requests() {
        let (conn, _rx) = AppConnection::new();
        let waiting = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.request(MessageType::AppInfo, json!({})).await })
        };
        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.pending_len() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        conn.close();
        let result = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(RelayError::Disconnected)));
    }

    #[tokio::test]
    async fn dropped_receiver_means_disconnected() {
        let (conn, rx) = AppConnection::new();
        drop(rx);
        assert!(matches!(
            conn.request(MessageType::AppInfo, json!({})).await,
            Err(RelayError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn unknown_reply_ids_are_ignored() {
        let (conn, _rx) = AppConnection::new();
        conn.on_message(r#"{"request_id":"stray","request_type":"run","content":1}"#);
        conn.on_message("garbage");
        assert_eq!(conn.pending_len(), 0);
    }

    #[tokio::test]
    async fn hub_without_apps() {
        let hub = AppHub::new();
        assert!(hub.get_apps().await.is_empty());
        assert!(matches!(hub.run("x", Map::new()).await, Err(RelayError::NoApps)));
        assert!(matches!(hub.command_info("x").await, Err(RelayError::NoApps)));
    }

    #[tokio::test]
    async fn get_apps_reports_failures_in_place() {
        let hub = AppHub::new();

        let (good, rx) = AppConnection::new();
        serve(good.clone(), rx, |req| Some(ok(req, app_info("good"))));
        let (bad, rx) = AppConnection::new();
        serve(bad.clone(), rx, |req| Some(err(req, "catalog exploded")));

        hub.subscribe(good);
        hub.subscribe(bad);

        let apps = tokio::time::timeout(Duration::from_secs(2), hub.get_apps())
            .await
            .unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0]["name"], "good");
        assert_eq!(apps[1], json!({"error": "catalog exploded"}));
    }

    #[tokio::test]
    async fn command_info_uses_first_app() {
        let hub = AppHub::new();
        let (conn, rx) = AppConnection::new();
        serve(conn.clone(), rx, |req| Some(ok(req, app_info("first"))));
        hub.subscribe(conn);

        let info = hub.command_info("app:open").await.unwrap();
        assert_eq!(info.label.as_deref(), Some("Open"));
        assert!(matches!(
            hub.command_info("app:missing").await,
            Err(RelayError::CommandNotFound(ref id)) if id == "app:missing"
        ));
    }

    #[tokio::test]
    async fn unsubscribe_removes_and_closes() {
        let hub = AppHub::new();
        let (conn, _rx) = AppConnection::new();
        let id = conn.id();
        hub.subscribe(conn);
        assert_eq!(hub.app_count(), 1);

        assert!(hub.unsubscribe(id).is_some());
        assert!(hub.unsubscribe(id).is_none());
        assert_eq!(hub.app_count(), 0);
    }
}

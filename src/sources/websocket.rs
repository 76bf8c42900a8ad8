//! Persistent socket to a single peer, typically the relay server.
//!
//! Requests are handled one at a time in arrival order and replies are
//! written back over the same connection. There is no reconnect: when the
//! socket closes the source stops and stays stopped.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use super::{RemoteSource, SourceKind};
use crate::dispatcher::{CommandSource, Dispatcher, ReadyLatch};
use crate::error::RelayError;
use crate::manager::RemoteCommandManager;
use crate::protocol::{decode_request, encode, ErrorResponse, Response};

pub struct WebSocketCommandSource {
    dispatcher: Dispatcher,
    label: String,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    ready: ReadyLatch,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketCommandSource {
    fn new(manager: Arc<RemoteCommandManager>, label: String) -> Arc<Self> {
        Arc::new(Self {
            dispatcher: Dispatcher::new(manager),
            label,
            outbound: Mutex::new(None),
            ready: ReadyLatch::new(),
            task: Mutex::new(None),
        })
    }

    /// Dial `url` in the background. A failed connect is logged and leaves
    /// the source idle.
    pub fn connect(manager: Arc<RemoteCommandManager>, url: &str) -> Arc<Self> {
        let source = Self::new(manager, url.to_string());
        let url = url.to_string();
        let runner = source.clone();
        let task = tokio::spawn(async move {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _response)) => runner.serve(ws).await,
                Err(e) => error!(%url, error = %e, "Failed to connect"),
            }
        });
        *source.task.lock() = Some(task);
        source
    }

    /// Serve an already-open websocket.
    pub fn attach<S>(manager: Arc<RemoteCommandManager>, ws: WebSocketStream<S>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let source = Self::new(manager, "attached".to_string());
        let runner = source.clone();
        let task = tokio::spawn(async move { runner.serve(ws).await });
        *source.task.lock() = Some(task);
        source
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    async fn serve<S>(self: Arc<Self>, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock() = Some(tx);
        self.ready.resolve();
        info!(url = %self.label, "Connected");

        let label = self.label.clone();
        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    error!(url = %label, error = %e, "Socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match decode_request(text.as_str()) {
                    Ok(request) => self.dispatcher.handle(self.as_ref(), request, &()).await,
                    Err(e) => warn!(url = %self.label, error = %e, "Discarding undecodable message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(other) => debug!(url = %self.label, "Ignoring non-text frame: {other:?}"),
                Err(e) => {
                    error!(url = %self.label, error = %e, "Socket read failed");
                    break;
                }
            }
        }

        warn!(url = %self.label, "Connection closed");
        self.outbound.lock().take();
        let _ = writer.await;
    }

    fn send_text(&self, text: String) -> Result<(), RelayError> {
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(RelayError::NotConnected("websocket"))?;
        tx.send(text)
            .map_err(|_| RelayError::PeerClosed(self.label.clone()))
    }
}

#[async_trait]
impl CommandSource for WebSocketCommandSource {
    type Peer = ();

    async fn ready(&self) {
        self.ready.wait().await;
    }

    async fn send_response(&self, response: Response, _peer: &()) -> Result<(), RelayError> {
        self.send_text(encode(&response)?)
    }

    async fn send_error(&self, error: ErrorResponse, _peer: &()) -> Result<(), RelayError> {
        self.send_text(encode(&error)?)
    }
}

impl RemoteSource for WebSocketCommandSource {
    fn kind(&self) -> SourceKind {
        SourceKind::WebSocket
    }

    fn close(&self) {
        self.outbound.lock().take();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use tokio::io::DuplexStream;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use super::*;
    use crate::demo::{DemoCommand, DemoHost};
    use crate::error::HostError;

    fn manager() -> Arc<RemoteCommandManager> {
        let host = DemoHost::builder("socket-app")
            .command(DemoCommand::new("app:open").handler(|_| Ok(json!({"ok": true}))))
            .command(DemoCommand::new("app:broken").handler(|_| Err(HostError::new("not found"))))
            .command(DemoCommand::new("app:echo").handler(|args| Ok(Value::Object(args.clone()))))
            .build();
        RemoteCommandManager::new(Arc::new(host))
    }

    async fn pair() -> (Arc<WebSocketCommandSource>, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (WebSocketCommandSource::attach(manager(), client), server)
    }

    async fn send(server: &mut WebSocketStream<DuplexStream>, text: &str) {
        server.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    async fn recv(server: &mut WebSocketStream<DuplexStream>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), server.next())
            .await
            .expect("timed out waiting for reply")
            .unwrap()
            .unwrap();
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn replies_to_run_requests() {
        let (_source, mut server) = pair().await;
        send(
            &mut server,
            r#"{"request_id":"r1","request_type":"run","content":{"id":"app:open","args":{}}}"#,
        )
        .await;
        assert_eq!(
            recv(&mut server).await,
            json!({"request_id": "r1", "request_type": "run", "content": {"ok": true}})
        );

        send(
            &mut server,
            r#"{"request_id":"r2","request_type":"run","content":{"id":"app:broken","args":{}}}"#,
        )
        .await;
        assert_eq!(
            recv(&mut server).await,
            json!({"request_id": "r2", "request_type": "run", "error": "not found"})
        );
    }

    #[tokio::test]
    async fn ignores_garbage_and_unknown_types() {
        let (_source, mut server) = pair().await;
        send(&mut server, "not json").await;
        send(&mut server, r#"{"request_id":"x","request_type":"reboot"}"#).await;
        send(&mut server, r#"{"request_id":"r3","request_type":"app_info","content":{}}"#).await;

        let reply = recv(&mut server).await;
        assert_eq!(reply["request_id"], "r3");
        assert_eq!(reply["content"]["name"], "socket-app");
    }

    #[tokio::test]
    async fn replies_keep_arrival_order() {
        let (_source, mut server) = pair().await;
        for i in 0..5 {
            let text = format!(
                r#"{{"request_id":"r{i}","request_type":"run","content":{{"id":"app:echo","args":{{"i":{i}}}}}}}"#
            );
            send(&mut server, &text).await;
        }
        for i in 0..5 {
            let reply = recv(&mut server).await;
            assert_eq!(reply["request_id"], format!("r{i}"));
            assert_eq!(reply["content"]["i"], i);
        }
    }

    #[tokio::test]
    async fn stops_on_close_and_reports_not_connected() {
        let (source, mut server) = pair().await;
        send(&mut server, r#"{"request_id":"r1","request_type":"app_info"}"#).await;
        recv(&mut server).await;
        assert!(source.is_connected());

        server.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while source.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let err = source
            .send_response(
                Response {
                    request_id: "late".into(),
                    request_type: crate::protocol::MessageType::Run,
                    content: Value::Null,
                },
                &(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotConnected(_)));
    }

    #[tokio::test]
    async fn connects_to_a_listening_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let source = WebSocketCommandSource::connect(manager(), &format!("ws://{addr}"));

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = tokio_tungstenite::accept_async(tcp).await.unwrap();
        server
            .send(Message::Text(
                r#"{"request_id":"r1","request_type":"run","content":{"id":"app:open"}}"#.into(),
            ))
            .await
            .unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), server.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(reply["content"], json!({"ok": true}));

        source.close();
        assert!(!source.is_connected());
    }
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::error::RelayError;
use crate::hub::{AppConnection, AppHub};
use crate::protocol;

// ── Response types ───────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErr {
    error: String,
}

fn err_json(status: StatusCode, msg: String) -> axum::response::Response {
    (status, Json(ApiErr { error: msg })).into_response()
}

fn status_for(e: &RelayError) -> StatusCode {
    match e {
        RelayError::NoApps | RelayError::CommandNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::Remote(_) | RelayError::Disconnected => StatusCode::BAD_GATEWAY,
        RelayError::InvalidArgs(_) | RelayError::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn relay_err(e: &RelayError) -> axum::response::Response {
    err_json(status_for(e), e.to_string())
}

// ── Handlers ─────────────────────────────────────────────────────

async fn get_commands(Extension(hub): Extension<Arc<AppHub>>) -> impl IntoResponse {
    let apps = hub.get_apps().await;
    Json(serde_json::json!({ "apps": apps }))
}

async fn get_command(
    Extension(hub): Extension<Arc<AppHub>>,
    Path(command_id): Path<String>,
) -> axum::response::Response {
    match hub.command_info(&command_id).await {
        Ok(info) => Json(info).into_response(),
        Err(e) => relay_err(&e),
    }
}

/// An empty body means no arguments; anything else must be a JSON object.
fn parse_args(body: &[u8]) -> Result<Map<String, Value>, RelayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body)? {
        Value::Object(args) => Ok(args),
        other => Err(RelayError::InvalidArgs(format!(
            "command arguments must be a JSON object, got {other}"
        ))),
    }
}

async fn post_command(
    Extension(hub): Extension<Arc<AppHub>>,
    Path(command_id): Path<String>,
    body: Bytes,
) -> axum::response::Response {
    let args = match parse_args(&body) {
        Ok(args) => args,
        Err(e) => return relay_err(&e),
    };
    match hub.run(&command_id, args).await {
        Ok(response) => Json(serde_json::json!({ "response": response })).into_response(),
        Err(e) => relay_err(&e),
    }
}

async fn get_schema() -> impl IntoResponse {
    Json(protocol::wire_schema())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(hub): Extension<Arc<AppHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_app(socket, hub))
}

/// Bridge one app socket to an [`AppConnection`] subscribed for the
/// socket's lifetime.
async fn serve_app(socket: WebSocket, hub: Arc<AppHub>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (conn, mut outbound) = AppConnection::new();
    let id = conn.id();
    hub.subscribe(conn.clone());

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                warn!(connection = %id, error = %e, "App socket write failed");
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => conn.on_message(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection = %id, error = %e, "App socket read failed");
                break;
            }
        }
    }

    debug!(connection = %id, "App socket closed");
    hub.unsubscribe(id);
    writer.abort();
}

// ── Server ───────────────────────────────────────────────────────

pub fn router(hub: Arc<AppHub>) -> Router {
    Router::new()
        .route("/commands", get(get_commands))
        .route("/commands/{*command_id}", get(get_command).post(post_command))
        .route("/ws", get(ws_handler))
        .route("/schema", get(get_schema))
        .layer(CorsLayer::permissive())
        .layer(Extension(hub))
}

/// Bind `addr` and serve the API in the background. Returns the bound
/// address (useful with port 0) and the serve task.
pub async fn start_api_server(
    hub: Arc<AppHub>,
    addr: SocketAddr,
) -> Result<(SocketAddr, JoinHandle<()>), RelayError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound = listener.local_addr()?;
    let app = router(hub);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    info!(addr = %bound, "API server listening");
    Ok((bound, task))
}

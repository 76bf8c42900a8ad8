//! Wire envelopes shared by every transport.
//!
//! The same JSON shapes travel as websocket text frames and as the payload of
//! cross-window message events. Every reply echoes the triggering request's
//! `request_id` and `request_type`, on success and on failure alike.

use std::collections::HashMap;
use std::fmt;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::error::RelayError;
use crate::registry::{CommandCatalog, CommandInfo};

// ── Message types ───────────────────────────────────────────────

/// The two request kinds the protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MessageType {
    AppInfo,
    Run,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppInfo => "app_info",
            Self::Run => "run",
        }
    }

    /// Map a raw `request_type` onto a known kind. Anything else is `None`
    /// and must be discarded, never answered.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "app_info" => Some(Self::AppInfo),
            "run" => Some(Self::Run),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Requests ────────────────────────────────────────────────────

/// Inbound request envelope.
///
/// `request_type` is kept as the raw string so that unknown kinds survive
/// decoding and can be logged before being dropped. `content` is only
/// interpreted once the kind is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct Request {
    pub request_id: String,
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub content: Option<Value>,
}

/// Content of a `run` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct RunContent {
    pub id: String,
    #[serde(default)]
    #[ts(type = "Record<string, unknown> | null")]
    pub args: Option<Map<String, Value>>,
}

impl Request {
    pub fn app_info(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            request_type: MessageType::AppInfo.as_str().to_string(),
            content: Some(Value::Object(Map::new())),
        }
    }

    pub fn run(
        request_id: impl Into<String>,
        command_id: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        let content = RunContent {
            id: command_id.into(),
            args: Some(args),
        };
        Self {
            request_id: request_id.into(),
            request_type: MessageType::Run.as_str().to_string(),
            content: serde_json::to_value(content).ok(),
        }
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::parse(&self.request_type)
    }

    /// Interpret `content` as a run request. A missing `args` (or `null`)
    /// is returned as-is; callers substitute an empty mapping.
    pub fn run_content(&self) -> Result<RunContent, RelayError> {
        let content = self.content.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(content)?)
    }
}

// ── Responses ───────────────────────────────────────────────────

/// Successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct Response {
    pub request_id: String,
    pub request_type: MessageType,
    #[serde(default)]
    #[ts(type = "unknown")]
    pub content: Value,
}

/// Failure reply. `error` is a human-readable message; there are no codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct ErrorResponse {
    pub request_id: String,
    pub request_type: MessageType,
    pub error: String,
}

/// Either reply shape, as seen by the side that issued the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyResponse {
    Error(ErrorResponse),
    Ok(Response),
}

impl AnyResponse {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Error(e) => &e.request_id,
            Self::Ok(r) => &r.request_id,
        }
    }
}

// ── App info ────────────────────────────────────────────────────

/// Snapshot of the host's identity and command catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
pub struct AppInfo {
    pub name: String,
    pub title: String,
    pub version: String,
    pub url: String,
    pub plugins: Vec<String>,
    #[schemars(with = "HashMap<String, CommandInfo>")]
    #[ts(as = "HashMap<String, CommandInfo>")]
    pub commands: CommandCatalog,
}

// ── Codec ───────────────────────────────────────────────────────

pub fn decode_request(text: &str) -> Result<Request, RelayError> {
    Ok(serde_json::from_str(text)?)
}

pub fn decode_response(text: &str) -> Result<AnyResponse, RelayError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode<T: Serialize>(envelope: &T) -> Result<String, RelayError> {
    Ok(serde_json::to_string(envelope)?)
}

fn schema_value<T: JsonSchema>() -> Value {
    let root = schema_for!(T);
    serde_json::to_value(root).unwrap_or(Value::Null)
}

/// JSON Schema for every envelope, keyed by shape name.
pub fn wire_schema() -> Value {
    serde_json::json!({
        "request": schema_value::<Request>(),
        "run_content": schema_value::<RunContent>(),
        "response": schema_value::<Response>(),
        "error_response": schema_value::<ErrorResponse>(),
        "app_info": schema_value::<AppInfo>(),
    })
}

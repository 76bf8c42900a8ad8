//! The host application as seen by the relay.
//!
//! The host owns and executes commands; the relay only ever probes their
//! metadata and asks for execution through this trait.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HostError;
use crate::registry::CommandAttribute;

/// An icon resolved by the host. When it carries inline SVG markup the
/// catalog flattens it to that markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub name: String,
    pub svg: Option<String>,
}

/// Value returned by an attribute accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Json(Value),
    Icon(Icon),
}

impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        AttributeValue::Json(value)
    }
}

impl From<Icon> for AttributeValue {
    fn from(icon: Icon) -> Self {
        AttributeValue::Icon(icon)
    }
}

#[async_trait]
pub trait CommandHost: Send + Sync {
    fn name(&self) -> String;

    fn version(&self) -> String;

    /// Human-facing title of the running app (a document title in a browser).
    fn title(&self) -> String;

    /// Address the app is served from.
    fn url(&self) -> String;

    fn plugins(&self) -> Vec<String>;

    /// Every command id known to the host, in registry order.
    fn list_commands(&self) -> Vec<String>;

    /// Probe one attribute of one command. Accessors may fail; the relay
    /// treats a failure as permanent for that (command, attribute) pair.
    fn attribute(
        &self,
        command_id: &str,
        attribute: CommandAttribute,
        args: &Map<String, Value>,
    ) -> Result<AttributeValue, HostError>;

    /// Execute a command. Whatever the host fails with is propagated to the
    /// caller untranslated.
    async fn execute(&self, command_id: &str, args: Map<String, Value>) -> Result<Value, HostError>;

    /// Resolves once the host has finished starting up.
    async fn started(&self) -> Result<(), HostError>;
}

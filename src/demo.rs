//! In-memory host application with a declarative command table.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::dispatcher::ReadyLatch;
use crate::error::HostError;
use crate::host::{AttributeValue, CommandHost, Icon};
use crate::registry::CommandAttribute;

type Handler = Arc<dyn Fn(&Map<String, Value>) -> Result<Value, HostError> + Send + Sync>;

/// One command of a [`DemoHost`].
#[derive(Clone)]
pub struct DemoCommand {
    id: String,
    attributes: HashMap<CommandAttribute, Result<AttributeValue, HostError>>,
    handler: Handler,
}

impl fmt::Debug for DemoCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DemoCommand")
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl DemoCommand {
    /// A command with no attributes whose handler returns `null`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
            handler: Arc::new(|_| Ok(Value::Null)),
        }
    }

    pub fn attribute(mut self, attribute: CommandAttribute, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(attribute, Ok(value.into()));
        self
    }

    pub fn label(self, label: &str) -> Self {
        self.attribute(CommandAttribute::Label, json!(label))
    }

    pub fn caption(self, caption: &str) -> Self {
        self.attribute(CommandAttribute::Caption, json!(caption))
    }

    /// The accessor for `attribute` fails with `message` on every probe.
    pub fn raising(mut self, attribute: CommandAttribute, message: &str) -> Self {
        self.attributes
            .insert(attribute, Err(HostError::new(message)));
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Result<Value, HostError> + Send + Sync + 'static,
    {
        self.handler = Arc::new(handler);
        self
    }
}

#[derive(Debug, Clone)]
enum StartMode {
    Immediate,
    Fail(String),
    Gated(ReadyLatch),
}

/// A [`CommandHost`] backed by a fixed table of [`DemoCommand`]s.
#[derive(Debug)]
pub struct DemoHost {
    name: String,
    version: String,
    title: String,
    url: String,
    plugins: Vec<String>,
    commands: IndexMap<String, DemoCommand>,
    start: StartMode,
    probes: AtomicUsize,
}

impl DemoHost {
    pub fn builder(name: impl Into<String>) -> DemoHostBuilder {
        DemoHostBuilder {
            host: DemoHost {
                name: name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: String::new(),
                url: String::new(),
                plugins: Vec::new(),
                commands: IndexMap::new(),
                start: StartMode::Immediate,
                probes: AtomicUsize::new(0),
            },
        }
    }

    /// The app `command-relay --demo-app` serves.
    pub fn sample() -> Self {
        Self::builder("demo")
            .title("Command relay demo")
            .url("http://localhost/")
            .plugin("demo:commands")
            .command(
                DemoCommand::new("demo:echo")
                    .label("Echo")
                    .caption("Return the arguments unchanged")
                    .attribute(CommandAttribute::IsEnabled, json!(true))
                    .handler(|args| Ok(Value::Object(args.clone()))),
            )
            .command(
                DemoCommand::new("demo:greet")
                    .label("Greet")
                    .attribute(CommandAttribute::Usage, json!("--name <who>"))
                    .attribute(
                        CommandAttribute::Icon,
                        Icon {
                            name: "ui:wave".into(),
                            svg: Some("<svg viewBox=\"0 0 16 16\"></svg>".into()),
                        },
                    )
                    .handler(|args| {
                        let who = args.get("name").and_then(Value::as_str).unwrap_or("world");
                        Ok(json!(format!("Hello, {who}!")))
                    }),
            )
            .command(
                DemoCommand::new("demo:fail")
                    .label("Fail")
                    .raising(CommandAttribute::Caption, "caption unavailable")
                    .handler(|_| Err(HostError::new("demo failure"))),
            )
            .build()
    }

    /// Number of attribute accessor calls so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

pub struct DemoHostBuilder {
    host: DemoHost,
}

impl DemoHostBuilder {
    pub fn version(mut self, version: &str) -> Self {
        self.host.version = version.to_string();
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.host.title = title.to_string();
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.host.url = url.to_string();
        self
    }

    pub fn plugin(mut self, plugin: &str) -> Self {
        self.host.plugins.push(plugin.to_string());
        self
    }

    pub fn command(mut self, command: DemoCommand) -> Self {
        self.host.commands.insert(command.id.clone(), command);
        self
    }

    /// `started()` fails with `message`.
    pub fn fail_start(mut self, message: &str) -> Self {
        self.host.start = StartMode::Fail(message.to_string());
        self
    }

    /// `started()` waits for `gate` to resolve.
    pub fn start_gate(mut self, gate: ReadyLatch) -> Self {
        self.host.start = StartMode::Gated(gate);
        self
    }

    pub fn build(self) -> DemoHost {
        self.host
    }
}

#[async_trait]
impl CommandHost for DemoHost {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> String {
        self.version.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn plugins(&self) -> Vec<String> {
        self.plugins.clone()
    }

    fn list_commands(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }

    fn attribute(
        &self,
        command_id: &str,
        attribute: CommandAttribute,
        _args: &Map<String, Value>,
    ) -> Result<AttributeValue, HostError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.commands
            .get(command_id)
            .and_then(|c| c.attributes.get(&attribute))
            .cloned()
            .unwrap_or(Ok(AttributeValue::Json(Value::Null)))
    }

    async fn execute(&self, command_id: &str, args: Map<String, Value>) -> Result<Value, HostError> {
        let command = self
            .commands
            .get(command_id)
            .ok_or_else(|| HostError::new(format!("unknown command: {command_id}")))?;
        (command.handler)(&args)
    }

    async fn started(&self) -> Result<(), HostError> {
        match &self.start {
            StartMode::Immediate => Ok(()),
            StartMode::Fail(message) => Err(HostError::new(message.as_str())),
            StartMode::Gated(gate) => {
                gate.wait().await;
                Ok(())
            }
        }
    }
}

use std::collections::HashSet;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use super::{CommandAttribute, CommandCatalog, CommandInfo};
use crate::host::{AttributeValue, CommandHost};

/// Sentinel a host returns for "no mnemonic". Hosts may send it as `-1`
/// or `-1.0`.
const NO_MNEMONIC: f64 = -1.0;

/// Builds command catalogs from a host, remembering every
/// (command, attribute) pair whose accessor has ever failed. Those pairs are
/// never probed again for the lifetime of the builder.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    skipped: Mutex<HashSet<(String, CommandAttribute)>>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe every attribute of every command the host lists. Keys follow
    /// the host's enumeration order.
    pub fn build(&self, host: &dyn CommandHost) -> CommandCatalog {
        let context = Map::new();
        let mut catalog = CommandCatalog::new();

        for id in host.list_commands() {
            let mut info = CommandInfo::default();
            for &attribute in CommandAttribute::all() {
                if self.is_skipped(&id, attribute) {
                    continue;
                }
                let value = match host.attribute(&id, attribute, &context) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!("Skipping {}.{} from now on: {e}", id, attribute.key());
                        self.skipped.lock().insert((id.clone(), attribute));
                        continue;
                    }
                };
                if let Some(value) = normalize(attribute, value) {
                    info.set(attribute, value);
                }
            }
            catalog.insert(id, info);
        }

        catalog
    }

    pub fn is_skipped(&self, command_id: &str, attribute: CommandAttribute) -> bool {
        self.skipped
            .lock()
            .contains(&(command_id.to_string(), attribute))
    }

    pub fn skipped_len(&self) -> usize {
        self.skipped.lock().len()
    }
}

/// Reduce an accessor result to the value worth reporting, or `None` when it
/// carries no information.
fn normalize(attribute: CommandAttribute, value: AttributeValue) -> Option<Value> {
    let value = match value {
        AttributeValue::Icon(icon) => Value::String(icon.svg.unwrap_or(icon.name)),
        AttributeValue::Json(value) => value,
    };

    match &value {
        Value::Null => return None,
        Value::String(s) if s.is_empty() => return None,
        Value::Object(map) if map.is_empty() => return None,
        Value::Bool(false) if attribute.is_flag() => return None,
        Value::Number(n) if attribute == CommandAttribute::Mnemonic => {
            if n.as_f64() == Some(NO_MNEMONIC) {
                return None;
            }
        }
        _ => {}
    }

    Some(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::HostError;
    use crate::host::Icon;

    /// Host whose attributes come from a table. Missing entries read as
    /// `null`; entries set to `Err` raise.
    #[derive(Default)]
    struct TableHost {
        commands: Vec<String>,
        attributes: HashMap<(String, CommandAttribute), Result<AttributeValue, HostError>>,
        probes: AtomicUsize,
    }

    impl TableHost {
        fn with(mut self, id: &str, attribute: CommandAttribute, value: AttributeValue) -> Self {
            if !self.commands.iter().any(|c| c == id) {
                self.commands.push(id.to_string());
            }
            self.attributes.insert((id.to_string(), attribute), Ok(value));
            self
        }

        fn failing(mut self, id: &str, attribute: CommandAttribute) -> Self {
            if !self.commands.iter().any(|c| c == id) {
                self.commands.push(id.to_string());
            }
            self.attributes
                .insert((id.to_string(), attribute), Err(HostError::new("accessor blew up")));
            self
        }
    }

    #[async_trait]
    impl CommandHost for TableHost {
        fn name(&self) -> String {
            "table".into()
        }
        fn version(&self) -> String {
            "0.0.0".into()
        }
        fn title(&self) -> String {
            String::new()
        }
        fn url(&self) -> String {
            String::new()
        }
        fn plugins(&self) -> Vec<String> {
            Vec::new()
        }
        fn list_commands(&self) -> Vec<String> {
            self.commands.clone()
        }
        fn attribute(
            &self,
            command_id: &str,
            attribute: CommandAttribute,
            args: &Map<String, Value>,
        ) -> Result<AttributeValue, HostError> {
            assert!(args.is_empty());
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.attributes
                .get(&(command_id.to_string(), attribute))
                .cloned()
                .unwrap_or(Ok(AttributeValue::Json(Value::Null)))
        }
        async fn execute(&self, _: &str, _: Map<String, Value>) -> Result<Value, HostError> {
            Ok(Value::Null)
        }
        async fn started(&self) -> Result<(), HostError> {
            Ok(())
        }
    }

    #[test]
    fn omits_uninformative_values() {
        let host = TableHost::default()
            .with("a", CommandAttribute::Label, json!("").into())
            .with("a", CommandAttribute::Dataset, json!({}).into())
            .with("a", CommandAttribute::IsEnabled, json!(false).into())
            .with("a", CommandAttribute::IsVisible, json!(true).into())
            .with("a", CommandAttribute::Mnemonic, json!(-1).into())
            .with("a", CommandAttribute::Caption, json!("Do A").into());
        let catalog = CatalogBuilder::new().build(&host);

        assert_eq!(
            serde_json::to_value(&catalog["a"]).unwrap(),
            json!({"caption": "Do A", "isVisible": true})
        );
    }

    #[test]
    fn float_mnemonic_sentinel_is_omitted() {
        let host = TableHost::default()
            .with("a", CommandAttribute::Mnemonic, json!(-1.0).into())
            .with("b", CommandAttribute::Mnemonic, json!(-1.5).into());
        let catalog = CatalogBuilder::new().build(&host);

        assert_eq!(catalog["a"].mnemonic, None);
        assert_eq!(catalog["b"].mnemonic, Some(json!(-1.5)));
    }

    #[test]
    fn keeps_zero_mnemonic_and_non_empty_dataset() {
        let host = TableHost::default()
            .with("a", CommandAttribute::Mnemonic, json!(0).into())
            .with("a", CommandAttribute::Dataset, json!({"mode": "edit"}).into());
        let catalog = CatalogBuilder::new().build(&host);

        let info = &catalog["a"];
        assert_eq!(info.mnemonic, Some(json!(0)));
        assert_eq!(info.dataset.as_ref().unwrap()["mode"], "edit");
    }

    #[test]
    fn flattens_icons() {
        let host = TableHost::default()
            .with(
                "svg",
                CommandAttribute::Icon,
                Icon {
                    name: "ui:save".into(),
                    svg: Some("<svg/>".into()),
                }
                .into(),
            )
            .with(
                "named",
                CommandAttribute::Icon,
                Icon {
                    name: "ui:open".into(),
                    svg: None,
                }
                .into(),
            )
            .with("plain", CommandAttribute::Icon, json!("fa-cog").into());
        let catalog = CatalogBuilder::new().build(&host);

        assert_eq!(catalog["svg"].icon.as_deref(), Some("<svg/>"));
        assert_eq!(catalog["named"].icon.as_deref(), Some("ui:open"));
        assert_eq!(catalog["plain"].icon.as_deref(), Some("fa-cog"));
    }

    #[test]
    fn failing_accessor_is_never_probed_again() {
        let host = TableHost::default()
            .failing("a", CommandAttribute::Label)
            .with("a", CommandAttribute::Caption, json!("kept").into());
        let builder = CatalogBuilder::new();

        let first = builder.build(&host);
        let probes_first = host.probes.load(Ordering::SeqCst);
        let second = builder.build(&host);
        let probes_second = host.probes.load(Ordering::SeqCst) - probes_first;

        assert!(builder.is_skipped("a", CommandAttribute::Label));
        assert_eq!(builder.skipped_len(), 1);
        assert_eq!(probes_first, CommandAttribute::all().len());
        assert_eq!(probes_second, CommandAttribute::all().len() - 1);
        assert_eq!(first, second);
        assert_eq!(second["a"].label, None);
        assert_eq!(second["a"].caption.as_deref(), Some("kept"));
    }

    #[test]
    fn wrong_shape_is_omitted_but_not_skipped() {
        let host = TableHost::default().with("a", CommandAttribute::IsToggled, json!("yes").into());
        let builder = CatalogBuilder::new();
        let catalog = builder.build(&host);

        assert_eq!(catalog["a"], CommandInfo::default());
        assert_eq!(builder.skipped_len(), 0);
    }

    #[test]
    fn preserves_host_enumeration_order() {
        let host = TableHost::default()
            .with("zeta", CommandAttribute::Label, json!("Z").into())
            .with("alpha", CommandAttribute::Label, json!("A").into())
            .with("mid", CommandAttribute::Label, json!("M").into());
        let catalog = CatalogBuilder::new().build(&host);

        let keys: Vec<&str> = catalog.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }
}

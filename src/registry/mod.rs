pub mod catalog;

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

pub use catalog::CatalogBuilder;

// ── Command attributes ──────────────────────────────────────────

/// An introspectable property of a host command. Probed in the order of
/// [`CommandAttribute::all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandAttribute {
    Caption,
    ClassName,
    Dataset,
    Icon,
    IconClass,
    IconLabel,
    IsEnabled,
    IsToggleable,
    IsToggled,
    IsVisible,
    Label,
    Mnemonic,
    Usage,
}

impl CommandAttribute {
    /// Catalog key, matching the serde name.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Caption => "caption",
            Self::ClassName => "className",
            Self::Dataset => "dataset",
            Self::Icon => "icon",
            Self::IconClass => "iconClass",
            Self::IconLabel => "iconLabel",
            Self::IsEnabled => "isEnabled",
            Self::IsToggleable => "isToggleable",
            Self::IsToggled => "isToggled",
            Self::IsVisible => "isVisible",
            Self::Label => "label",
            Self::Mnemonic => "mnemonic",
            Self::Usage => "usage",
        }
    }

    /// Boolean flags are only reported when set.
    pub fn is_flag(&self) -> bool {
        matches!(
            self,
            Self::IsEnabled | Self::IsToggleable | Self::IsToggled | Self::IsVisible
        )
    }

    pub fn all() -> &'static [CommandAttribute] {
        &[
            Self::Caption,
            Self::ClassName,
            Self::Dataset,
            Self::Icon,
            Self::IconClass,
            Self::IconLabel,
            Self::IsEnabled,
            Self::IsToggleable,
            Self::IsToggled,
            Self::IsVisible,
            Self::Label,
            Self::Mnemonic,
            Self::Usage,
        ]
    }
}

// ── Command info ────────────────────────────────────────────────

/// Sparse metadata for one command. A missing field means the host had
/// nothing meaningful to say, which is distinct from an explicit `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CommandInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "Record<string, unknown> | null")]
    pub dataset: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_toggleable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_toggled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// A character or a character index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "string | number | null")]
    pub mnemonic: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl CommandInfo {
    /// Store a normalized attribute value. Returns `false` (and stores
    /// nothing) when the value has the wrong shape for the attribute.
    pub fn set(&mut self, attribute: CommandAttribute, value: Value) -> bool {
        fn text(value: Value) -> Option<String> {
            match value {
                Value::String(s) => Some(s),
                _ => None,
            }
        }

        match attribute {
            CommandAttribute::Caption => self.caption = text(value),
            CommandAttribute::ClassName => self.class_name = text(value),
            CommandAttribute::Icon => self.icon = text(value),
            CommandAttribute::IconClass => self.icon_class = text(value),
            CommandAttribute::IconLabel => self.icon_label = text(value),
            CommandAttribute::Label => self.label = text(value),
            CommandAttribute::Usage => self.usage = text(value),
            CommandAttribute::Dataset => {
                self.dataset = match value {
                    Value::Object(map) => Some(map),
                    _ => None,
                }
            }
            CommandAttribute::IsEnabled => self.is_enabled = value.as_bool(),
            CommandAttribute::IsToggleable => self.is_toggleable = value.as_bool(),
            CommandAttribute::IsToggled => self.is_toggled = value.as_bool(),
            CommandAttribute::IsVisible => self.is_visible = value.as_bool(),
            CommandAttribute::Mnemonic => {
                self.mnemonic = match value {
                    Value::Number(_) | Value::String(_) => Some(value),
                    _ => None,
                }
            }
        }
        self.has(attribute)
    }

    pub fn has(&self, attribute: CommandAttribute) -> bool {
        match attribute {
            CommandAttribute::Caption => self.caption.is_some(),
            CommandAttribute::ClassName => self.class_name.is_some(),
            CommandAttribute::Dataset => self.dataset.is_some(),
            CommandAttribute::Icon => self.icon.is_some(),
            CommandAttribute::IconClass => self.icon_class.is_some(),
            CommandAttribute::IconLabel => self.icon_label.is_some(),
            CommandAttribute::IsEnabled => self.is_enabled.is_some(),
            CommandAttribute::IsToggleable => self.is_toggleable.is_some(),
            CommandAttribute::IsToggled => self.is_toggled.is_some(),
            CommandAttribute::IsVisible => self.is_visible.is_some(),
            CommandAttribute::Label => self.label.is_some(),
            CommandAttribute::Mnemonic => self.mnemonic.is_some(),
            CommandAttribute::Usage => self.usage.is_some(),
        }
    }

    /// Short human label: the label if present, else the caption.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or_default()
    }
}

/// Command id to metadata, in host registry order.
pub type CommandCatalog = IndexMap<String, CommandInfo>;

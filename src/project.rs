use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DesignerResult;

/// A device as the editor hands it over: identity plus its design project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    /// Slug used as the ESPHome node name
    pub slug: String,
    #[serde(default)]
    pub name: String,
    /// Optional 32-byte base64 API encryption key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_recipe_id: Option<String>,
    #[serde(default)]
    pub project: Project,
}

impl Device {
    /// Parse a device snapshot from the editor's JSON form
    pub fn from_json(json: &str) -> DesignerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The name written into the device identity section
    pub fn node_name(&self) -> &str {
        if self.slug.trim().is_empty() {
            "device"
        } else {
            self.slug.trim()
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// The design project: pages, data wiring and global settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub model_version: u32,
    pub pages: Vec<Page>,
    pub bindings: Vec<Binding>,
    pub links: Vec<Link>,
    pub action_bindings: Vec<ActionBinding>,
    pub scripts: Vec<ScriptDef>,
    pub advanced: Advanced,
    pub global: GlobalConfig,
}

impl Project {
    /// Iterate over every widget of every page, in declaration order
    pub fn widgets(&self) -> impl Iterator<Item = (&Page, &Widget)> {
        self.pages
            .iter()
            .flat_map(|page| page.widgets.iter().map(move |w| (page, w)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    #[serde(alias = "id")]
    pub page_id: String,
    /// Display label shown in the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    #[serde(default)]
    pub widgets: Vec<Widget>,
}

/// A widget as stored by the editor.
///
/// The kind is kept as the raw tag so provisional kinds survive a round trip
/// through the editor; it is resolved against the schema registry at compile time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_width")]
    pub w: f64,
    #[serde(default = "default_height")]
    pub h: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub props: BTreeMap<String, Value>,
    #[serde(default)]
    pub style: BTreeMap<String, Value>,
    #[serde(default)]
    pub events: BTreeMap<String, Value>,
    /// Everything else: named sub-part style sections (`indicator`, `knob`, …)
    /// and editor-only fields, filtered by the schema at compile time.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_width() -> f64 {
    100.0
}

fn default_height() -> f64 {
    50.0
}

impl Widget {
    pub fn parent(&self) -> Option<&str> {
        self.parent_id
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    pub fn prop_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str).map(str::trim)
    }
}

/// Category of an ingested value.
///
/// Declaration order matches the lexical order of the tags, so the derived
/// `Ord` groups declarations the same way a string sort would.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    AttributeNumber,
    AttributeText,
    Binary,
    #[default]
    State,
}

impl DataKind {
    /// Whether the attribute participates in identity for this kind
    pub fn uses_attribute(self) -> bool {
        matches!(self, DataKind::AttributeNumber | DataKind::AttributeText)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::AttributeNumber => "attribute_number",
            DataKind::AttributeText => "attribute_text",
            DataKind::Binary => "binary",
            DataKind::State => "state",
        }
    }
}

/// A subscription to one piece of external state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub entity_id: String,
    #[serde(default)]
    pub kind: DataKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Binding {
    pub fn new(entity_id: &str, kind: DataKind, attribute: Option<&str>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            kind,
            attribute: attribute.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSource {
    pub entity_id: String,
    #[serde(default)]
    pub kind: DataKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub widget_id: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Hide the target while this expression over `x` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_override: Option<String>,
}

/// Reactive wiring from an ingested value to a widget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub source: LinkSource,
    pub target: LinkTarget,
}

/// Outbound call descriptor: `<domain>.<service>` against an optional entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl ServiceCall {
    pub fn entity(&self) -> Option<&str> {
        self.entity_id
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

/// Reactive wiring from a widget event to an outbound call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub widget_id: String,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<ServiceCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yaml_override: Option<String>,
}

impl ActionBinding {
    pub fn override_text(&self) -> Option<&str> {
        self.yaml_override
            .as_deref()
            .filter(|o| !o.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepDirection {
    #[default]
    Inc,
    Dec,
}

/// Setpoint nudge script (thermostat +/- buttons).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptDef {
    pub id: String,
    pub entity_id: String,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub direction: StepDirection,
}

fn default_step() -> f64 {
    0.5
}

/// Hand-written YAML the user wants carried into the document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advanced {
    pub yaml_pre: String,
    pub yaml_post: String,
    pub markers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub default_background: Option<String>,
    pub style_definitions: BTreeMap<String, BTreeMap<String, Value>>,
    pub gradients: Vec<Gradient>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gradient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default)]
    pub stops: Vec<GradientStop>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub color: String,
    pub position: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_device() {
        let json = r#"{
            "device_id": "hallway",
            "slug": "hallway",
            "project": {
                "pages": [{"page_id": "main", "name": "Main", "widgets": [
                    {"id": "lbl", "type": "label", "x": 10, "y": 20, "w": 120, "h": 32,
                     "props": {"text": "Hello"}, "locked": true}
                ]}]
            }
        }"#;
        let device = Device::from_json(json).unwrap();
        let widget = &device.project.pages[0].widgets[0];
        assert_eq!(widget.kind, "label");
        assert_eq!(widget.prop_str("text"), Some("Hello"));
        assert_eq!(widget.extra.get("locked"), Some(&Value::Bool(true)));
        assert_eq!(device.project.bindings.len(), 0);
    }

    #[test]
    fn test_page_id_alias() {
        let page: Page = serde_json::from_str(r#"{"id": "p1"}"#).unwrap();
        assert_eq!(page.page_id, "p1");
    }

    #[test]
    fn test_data_kind_order_matches_tags() {
        let mut kinds = vec![
            DataKind::State,
            DataKind::Binary,
            DataKind::AttributeText,
            DataKind::AttributeNumber,
        ];
        kinds.sort();
        let tags: Vec<_> = kinds.iter().map(|k| k.as_str()).collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn test_blank_slug_falls_back() {
        let device = Device {
            device_id: "x".to_string(),
            slug: "  ".to_string(),
            name: String::new(),
            api_key: Some("  ".to_string()),
            hardware_recipe_id: None,
            project: Project::default(),
        };
        assert_eq!(device.node_name(), "device");
        assert_eq!(device.api_key(), None);
    }
}

//! Widget schema registry.
//!
//! The set of widget kinds and link actions is closed and lives in code, so
//! every stage that dispatches on them gets an exhaustiveness check. The key
//! tables (which props, style keys, parts and events a kind accepts, and
//! their output names) are declarative and loaded from `schemas/widgets.yaml`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{DesignerError, DesignerResult};

const BUILTIN_SCHEMA: &str = include_str!("../schemas/widgets.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WidgetKind {
    Container,
    Label,
    Button,
    Arc,
    Bar,
    Slider,
    Switch,
    Checkbox,
    Dropdown,
    Roller,
    Image,
    Led,
    Spinner,
    Qrcode,
    Textarea,
    Spinbox,
    Line,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 17] = [
        WidgetKind::Container,
        WidgetKind::Label,
        WidgetKind::Button,
        WidgetKind::Arc,
        WidgetKind::Bar,
        WidgetKind::Slider,
        WidgetKind::Switch,
        WidgetKind::Checkbox,
        WidgetKind::Dropdown,
        WidgetKind::Roller,
        WidgetKind::Image,
        WidgetKind::Led,
        WidgetKind::Spinner,
        WidgetKind::Qrcode,
        WidgetKind::Textarea,
        WidgetKind::Spinbox,
        WidgetKind::Line,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            WidgetKind::Container => "container",
            WidgetKind::Label => "label",
            WidgetKind::Button => "button",
            WidgetKind::Arc => "arc",
            WidgetKind::Bar => "bar",
            WidgetKind::Slider => "slider",
            WidgetKind::Switch => "switch",
            WidgetKind::Checkbox => "checkbox",
            WidgetKind::Dropdown => "dropdown",
            WidgetKind::Roller => "roller",
            WidgetKind::Image => "image",
            WidgetKind::Led => "led",
            WidgetKind::Spinner => "spinner",
            WidgetKind::Qrcode => "qrcode",
            WidgetKind::Textarea => "textarea",
            WidgetKind::Spinbox => "spinbox",
            WidgetKind::Line => "line",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        WidgetKind::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

/// Update a link can apply to its target widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkAction {
    WidgetChecked,
    SliderValue,
    ArcValue,
    BarValue,
    LabelText,
    SelectedIndex,
    ObjHidden,
}

impl LinkAction {
    pub const ALL: [LinkAction; 7] = [
        LinkAction::WidgetChecked,
        LinkAction::SliderValue,
        LinkAction::ArcValue,
        LinkAction::BarValue,
        LinkAction::LabelText,
        LinkAction::SelectedIndex,
        LinkAction::ObjHidden,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            LinkAction::WidgetChecked => "widget_checked",
            LinkAction::SliderValue => "slider_value",
            LinkAction::ArcValue => "arc_value",
            LinkAction::BarValue => "bar_value",
            LinkAction::LabelText => "label_text",
            LinkAction::SelectedIndex => "selected_index",
            LinkAction::ObjHidden => "obj_hidden",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        LinkAction::ALL.into_iter().find(|a| a.tag() == tag)
    }

    /// Whether a widget of `kind` can be the target of this action
    pub fn applies_to(self, kind: WidgetKind) -> bool {
        use WidgetKind::*;
        match self {
            LinkAction::WidgetChecked => matches!(kind, Switch | Checkbox | Button),
            LinkAction::SliderValue => kind == Slider,
            LinkAction::ArcValue => kind == Arc,
            LinkAction::BarValue => kind == Bar,
            LinkAction::LabelText => matches!(kind, Label | Textarea),
            LinkAction::SelectedIndex => matches!(kind, Dropdown | Roller),
            LinkAction::ObjHidden => true,
        }
    }

    /// Firmware action used to apply the update to a widget of `kind`
    pub fn update_action(self, kind: WidgetKind) -> &'static str {
        match (self, kind) {
            (LinkAction::SliderValue, _) => "lvgl.slider.update",
            (LinkAction::ArcValue, _) => "lvgl.arc.update",
            (LinkAction::BarValue, _) => "lvgl.bar.update",
            (LinkAction::LabelText, WidgetKind::Textarea) => "lvgl.textarea.update",
            (LinkAction::LabelText, _) => "lvgl.label.update",
            (LinkAction::SelectedIndex, WidgetKind::Roller) => "lvgl.roller.update",
            (LinkAction::SelectedIndex, _) => "lvgl.dropdown.update",
            (LinkAction::WidgetChecked | LinkAction::ObjHidden, _) => "lvgl.widget.update",
        }
    }
}

/// One accepted key and the name it is written under.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub key: String,
    pub output: String,
    pub default: Option<Value>,
    pub emit_default: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawField {
    Key(String),
    Full {
        key: String,
        #[serde(default)]
        output: Option<String>,
        #[serde(default)]
        default: Option<Value>,
        #[serde(default)]
        emit_default: bool,
    },
}

impl From<RawField> for FieldDef {
    fn from(raw: RawField) -> Self {
        match raw {
            RawField::Key(key) => FieldDef {
                output: key.clone(),
                key,
                default: None,
                emit_default: false,
            },
            RawField::Full {
                key,
                output,
                default,
                emit_default,
            } => FieldDef {
                output: output.unwrap_or_else(|| key.clone()),
                key,
                default,
                emit_default,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCommon {
    #[serde(default)]
    props: Vec<RawField>,
    #[serde(default)]
    style: Vec<RawField>,
    #[serde(default)]
    events: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawKind {
    root_key: Option<String>,
    aliases: Vec<String>,
    container: bool,
    props: Vec<RawField>,
    style: Vec<RawField>,
    parts: BTreeMap<String, Option<Vec<RawField>>>,
    events: Vec<String>,
    commit_events: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    common: RawCommon,
    kinds: BTreeMap<String, Option<RawKind>>,
}

/// Resolved key tables for one widget kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub kind: WidgetKind,
    /// Key the widget is emitted under (`obj` for containers)
    pub root_key: String,
    pub aliases: Vec<String>,
    /// Always emits a `widgets:` list, even when empty
    pub container: bool,
    pub props: Vec<FieldDef>,
    pub style: Vec<FieldDef>,
    pub parts: Vec<(String, Vec<FieldDef>)>,
    pub events: Vec<String>,
    pub commit_events: BTreeMap<String, String>,
}

impl Schema {
    pub fn supports_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    pub fn supports_link(&self, action: LinkAction) -> bool {
        action.applies_to(self.kind)
    }

    pub fn link_actions(&self) -> Vec<LinkAction> {
        LinkAction::ALL
            .into_iter()
            .filter(|a| a.applies_to(self.kind))
            .collect()
    }

    /// Commit-style replacement for a high-frequency event, if the kind has one
    pub fn commit_event(&self, event: &str) -> Option<&str> {
        self.commit_events.get(event).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
    shared_style: Vec<FieldDef>,
}

impl SchemaRegistry {
    /// Registry built from the bundled key tables
    pub fn builtin() -> DesignerResult<Self> {
        Self::from_yaml_str(BUILTIN_SCHEMA)
    }

    pub fn from_yaml_str(yaml: &str) -> DesignerResult<Self> {
        let raw: RawRegistry = serde_yaml::from_str(yaml)
            .map_err(|e| DesignerError::SchemaError(e.to_string()))?;

        for tag in raw.kinds.keys() {
            if WidgetKind::from_tag(tag).is_none() {
                return Err(DesignerError::InconsistentSchema {
                    kind: tag.clone(),
                    reason: "not a known widget kind".to_string(),
                });
            }
        }

        let common_props: Vec<FieldDef> = raw.common.props.into_iter().map(Into::into).collect();
        let shared_style: Vec<FieldDef> = raw.common.style.into_iter().map(Into::into).collect();
        let common_events = raw.common.events;

        let mut kinds = raw.kinds;
        let mut schemas = Vec::with_capacity(WidgetKind::ALL.len());
        for kind in WidgetKind::ALL {
            let entry = kinds
                .remove(kind.tag())
                .ok_or_else(|| DesignerError::MissingSchema {
                    kind: kind.tag().to_string(),
                })?
                .unwrap_or_default();
            schemas.push(build_schema(
                kind,
                entry,
                &common_props,
                &shared_style,
                &common_events,
            )?);
        }

        log::debug!("Loaded widget schemas for {} kinds", schemas.len());
        Ok(Self {
            schemas,
            shared_style,
        })
    }

    pub fn resolve(&self, kind: WidgetKind) -> &Schema {
        // Construction guarantees one schema per kind, in `WidgetKind::ALL` order.
        &self.schemas[kind as usize]
    }

    /// Resolve an editor tag, accepting aliases
    pub fn resolve_tag(&self, tag: &str) -> Option<&Schema> {
        let tag = tag.trim();
        self.schemas
            .iter()
            .find(|s| s.kind.tag() == tag || s.aliases.iter().any(|a| a == tag))
    }

    /// Style keys accepted by every kind (and by reusable style definitions)
    pub fn shared_style(&self) -> &[FieldDef] {
        &self.shared_style
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter()
    }
}

fn build_schema(
    kind: WidgetKind,
    raw: RawKind,
    common_props: &[FieldDef],
    shared_style: &[FieldDef],
    common_events: &[String],
) -> DesignerResult<Schema> {
    let inconsistent = |reason: String| DesignerError::InconsistentSchema {
        kind: kind.tag().to_string(),
        reason,
    };

    let mut props = common_props.to_vec();
    merge_fields(&mut props, raw.props.into_iter().map(Into::into));
    let mut style = shared_style.to_vec();
    merge_fields(&mut style, raw.style.into_iter().map(Into::into));

    let mut parts = Vec::with_capacity(raw.parts.len());
    for (name, fields) in raw.parts {
        if props.iter().chain(style.iter()).any(|f| f.output == name) {
            return Err(inconsistent(format!("part '{}' shadows a field", name)));
        }
        let fields = match fields {
            Some(list) if !list.is_empty() => list.into_iter().map(Into::into).collect(),
            _ => shared_style.to_vec(),
        };
        parts.push((name, fields));
    }

    let mut events = common_events.to_vec();
    for event in raw.events {
        if !events.contains(&event) {
            events.push(event);
        }
    }

    for (from, to) in &raw.commit_events {
        if !events.contains(from) || !events.contains(to) {
            return Err(inconsistent(format!(
                "commit event '{}' -> '{}' names an event the kind does not emit",
                from, to
            )));
        }
    }

    for field in props.iter().chain(style.iter()) {
        if field.emit_default && field.default.is_none() {
            return Err(inconsistent(format!(
                "field '{}' emits a default but declares none",
                field.key
            )));
        }
    }

    Ok(Schema {
        kind,
        root_key: raw.root_key.unwrap_or_else(|| kind.tag().to_string()),
        aliases: raw.aliases,
        container: raw.container,
        props,
        style,
        parts,
        events,
        commit_events: raw.commit_events,
    })
}

/// Append kind-specific fields; a kind entry replaces a common one with the same key.
fn merge_fields(base: &mut Vec<FieldDef>, extra: impl Iterator<Item = FieldDef>) {
    for field in extra {
        match base.iter_mut().find(|f| f.key == field.key) {
            Some(slot) => *slot = field,
            None => base.push(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_loads() {
        let registry = SchemaRegistry::builtin().unwrap();
        for kind in WidgetKind::ALL {
            assert_eq!(registry.resolve(kind).kind, kind);
        }
    }

    #[test]
    fn test_container_alias_and_root_key() {
        let registry = SchemaRegistry::builtin().unwrap();
        let schema = registry.resolve_tag("obj").unwrap();
        assert_eq!(schema.kind, WidgetKind::Container);
        assert_eq!(schema.root_key, "obj");
        assert!(schema.container);
        assert!(registry.resolve_tag("hologram").is_none());
    }

    #[test]
    fn test_label_font_alias() {
        let registry = SchemaRegistry::builtin().unwrap();
        let label = registry.resolve(WidgetKind::Label);
        let font = label.props.iter().find(|f| f.key == "font").unwrap();
        assert_eq!(font.output, "text_font");
    }

    #[test]
    fn test_link_actions_per_kind() {
        let registry = SchemaRegistry::builtin().unwrap();
        let slider = registry.resolve(WidgetKind::Slider);
        assert_eq!(
            slider.link_actions(),
            vec![LinkAction::SliderValue, LinkAction::ObjHidden]
        );
        assert!(!registry.resolve(WidgetKind::Label).supports_link(LinkAction::WidgetChecked));
        assert!(registry.resolve(WidgetKind::Roller).supports_link(LinkAction::SelectedIndex));
    }

    #[test]
    fn test_commit_events() {
        let registry = SchemaRegistry::builtin().unwrap();
        assert_eq!(registry.resolve(WidgetKind::Slider).commit_event("on_value"), Some("on_release"));
        assert_eq!(registry.resolve(WidgetKind::Switch).commit_event("on_value"), None);
    }

    #[test]
    fn test_parts_default_to_shared_style() {
        let registry = SchemaRegistry::builtin().unwrap();
        let arc = registry.resolve(WidgetKind::Arc);
        let (name, fields) = &arc.parts[0];
        assert_eq!(name, "indicator");
        assert_eq!(fields.len(), registry.shared_style().len());
    }

    #[test]
    fn test_missing_kind_is_rejected() {
        let yaml = "common: {}\nkinds:\n  label: ~\n";
        assert!(matches!(
            SchemaRegistry::from_yaml_str(yaml),
            Err(DesignerError::MissingSchema { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = "common: {}\nkinds:\n  hologram: ~\n";
        assert!(matches!(
            SchemaRegistry::from_yaml_str(yaml),
            Err(DesignerError::InconsistentSchema { .. })
        ));
    }
}

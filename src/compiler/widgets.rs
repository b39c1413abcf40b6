use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use crate::compiler::assets::AssetTable;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ids::{safe_id, IdPolicy};
use crate::node::{Mapping, Node};
use crate::project::{Page, Project, Widget};
use crate::schema::{FieldDef, Schema, SchemaRegistry, WidgetKind};

/// Compiled event handlers keyed by (widget output id, event)
pub type EventHandlers = BTreeMap<(String, String), Node>;

/// A widget as seen by the link and action stages.
#[derive(Debug, Clone)]
pub struct IndexedWidget<'a> {
    pub widget: &'a Widget,
    pub page: usize,
    pub schema: Option<&'a Schema>,
    pub out_id: String,
}

impl IndexedWidget<'_> {
    pub fn kind(&self) -> Option<WidgetKind> {
        self.schema.map(|s| s.kind)
    }

    /// Kind tag for messages, falling back to the raw editor tag
    pub fn kind_tag(&self) -> &str {
        match self.schema {
            Some(s) => s.kind.tag(),
            None => self.widget.kind.as_str(),
        }
    }
}

/// Lookup of every widget in the project by its editor id (first declaration wins).
#[derive(Debug, Default)]
pub struct WidgetIndex<'a> {
    by_id: HashMap<&'a str, IndexedWidget<'a>>,
}

impl<'a> WidgetIndex<'a> {
    /// Index the project, reporting unknown kinds and duplicate ids
    pub fn build(
        project: &'a Project,
        registry: &'a SchemaRegistry,
        policy: &IdPolicy,
        diagnostics: &mut Diagnostics,
    ) -> Self {
        let mut by_id = HashMap::new();
        let mut page_ids = HashSet::new();
        for page in &project.pages {
            if !page_ids.insert(page_output_id(page, policy)) {
                diagnostics.push(Diagnostic::DuplicatePageId {
                    page: page.page_id.clone(),
                });
            }
        }

        let mut out_ids = HashSet::new();
        for (page_idx, page) in project.pages.iter().enumerate() {
            for widget in &page.widgets {
                let schema = registry.resolve_tag(&widget.kind);
                if schema.is_none() {
                    diagnostics.push(Diagnostic::UnknownWidgetKind {
                        widget: widget.id.clone(),
                        kind: widget.kind.clone(),
                    });
                }
                let out_id = policy.output_id(&widget.id);
                if page_ids.contains(&out_id) {
                    diagnostics.push(Diagnostic::WidgetIdTakenByPage {
                        widget: widget.id.clone(),
                        id: out_id.clone(),
                    });
                } else if !out_ids.insert(out_id.clone()) || by_id.contains_key(widget.id.trim()) {
                    diagnostics.push(Diagnostic::DuplicateWidgetId {
                        widget: widget.id.clone(),
                    });
                }
                by_id.entry(widget.id.trim()).or_insert(IndexedWidget {
                    widget,
                    page: page_idx,
                    schema,
                    out_id,
                });
            }
        }
        Self { by_id }
    }

    pub fn get(&self, id: &str) -> Option<&IndexedWidget<'a>> {
        self.by_id.get(id.trim())
    }
}

/// Everything the page stage reads besides the project itself.
pub struct PageInputs<'a> {
    pub registry: &'a SchemaRegistry,
    pub index: &'a WidgetIndex<'a>,
    pub assets: &'a AssetTable,
    pub handlers: &'a EventHandlers,
    pub policy: &'a IdPolicy,
}

/// Build the entries that go under `lvgl:`: style definitions, gradients and pages.
pub fn compile_pages(
    project: &Project,
    inputs: &PageInputs<'_>,
    diagnostics: &mut Diagnostics,
) -> Mapping {
    let mut lvgl = Mapping::new();

    let style_defs = &project.global.style_definitions;
    if !style_defs.is_empty() {
        let defs = style_defs
            .iter()
            .map(|(name, values)| {
                let mut def = Mapping::new().with("id", Node::Ident(safe_id(name)));
                emit_fields(&mut def, inputs.registry.shared_style(), values, inputs.assets, false);
                Node::Map(def)
            })
            .collect();
        lvgl.insert("style_definitions", Node::List(defs));
    }

    if !project.global.gradients.is_empty() {
        let gradients = project
            .global
            .gradients
            .iter()
            .map(|g| {
                let mut map = Mapping::new().with("id", Node::Ident(safe_id(&g.id)));
                if let Some(dir) = g.direction.as_deref().filter(|d| !d.is_empty()) {
                    map.insert("direction", Node::ident(dir));
                }
                let stops = g
                    .stops
                    .iter()
                    .map(|s| {
                        Node::Map(
                            Mapping::new()
                                .with("color", color_node(&s.color))
                                .with("position", Node::Int(i64::from(s.position))),
                        )
                    })
                    .collect();
                map.insert("stops", Node::List(stops));
                Node::Map(map)
            })
            .collect();
        lvgl.insert("gradients", Node::List(gradients));
    }

    let default_bg = project.global.default_background.as_deref();
    let pages: Vec<Node> = if project.pages.is_empty() {
        let page = Page {
            page_id: "main".to_string(),
            ..Default::default()
        };
        vec![compile_page(&page, project, inputs, default_bg, diagnostics)]
    } else {
        project
            .pages
            .iter()
            .map(|page| compile_page(page, project, inputs, default_bg, diagnostics))
            .collect()
    };
    lvgl.insert("pages", Node::List(pages));

    log::debug!("Compiled {} pages", project.pages.len().max(1));
    lvgl
}

fn compile_page(
    page: &Page,
    project: &Project,
    inputs: &PageInputs<'_>,
    default_bg: Option<&str>,
    diagnostics: &mut Diagnostics,
) -> Node {
    let mut map = Mapping::new().with("id", Node::Ident(page_output_id(page, inputs.policy)));
    let bg = page
        .bg_color
        .as_deref()
        .or(default_bg)
        .map(str::trim)
        .filter(|c| !c.is_empty());
    if let Some(bg) = bg {
        map.insert("bg_color", color_node(bg));
    }

    let forest = Forest::build(page, inputs.index, diagnostics);
    let styles: HashSet<&str> = project
        .global
        .style_definitions
        .keys()
        .map(String::as_str)
        .collect();
    let emitter = Emitter {
        page,
        forest: &forest,
        inputs,
        styles: &styles,
    };
    let widgets = forest
        .roots
        .iter()
        .map(|&i| emitter.widget_node(i, diagnostics))
        .collect();
    map.insert("widgets", Node::List(widgets));
    Node::Map(map)
}

/// Parent/child structure of one page, in declaration order.
struct Forest {
    roots: Vec<usize>,
    children: Vec<Vec<usize>>,
}

impl Forest {
    fn build(page: &Page, index: &WidgetIndex<'_>, diagnostics: &mut Diagnostics) -> Self {
        let widgets = &page.widgets;
        let mut local: HashMap<&str, usize> = HashMap::new();
        for (i, w) in widgets.iter().enumerate() {
            local.entry(w.id.trim()).or_insert(i);
        }

        let mut parent_of: Vec<Option<usize>> = Vec::with_capacity(widgets.len());
        for w in widgets {
            let parent = match w.parent() {
                None => None,
                Some(p) => match local.get(p) {
                    Some(&j) => Some(j),
                    None => {
                        if index.get(p).is_some() {
                            diagnostics.push(Diagnostic::CrossPageParent {
                                widget: w.id.clone(),
                                parent: p.to_string(),
                            });
                        } else {
                            diagnostics.push(Diagnostic::DanglingParent {
                                widget: w.id.clone(),
                                parent: p.to_string(),
                            });
                        }
                        None
                    }
                },
            };
            parent_of.push(parent);
        }

        // A widget is in a cycle when walking up its parents leads back to it.
        let in_cycle: Vec<bool> = (0..widgets.len())
            .map(|start| {
                let mut cur = parent_of[start];
                for _ in 0..widgets.len() {
                    match cur {
                        Some(p) if p == start => return true,
                        Some(p) => cur = parent_of[p],
                        None => return false,
                    }
                }
                false
            })
            .collect();
        for (i, cyclic) in in_cycle.iter().enumerate() {
            if *cyclic {
                diagnostics.push(Diagnostic::ParentCycle {
                    widget: widgets[i].id.clone(),
                });
                parent_of[i] = None;
            }
        }

        let mut roots = Vec::new();
        let mut children = vec![Vec::new(); widgets.len()];
        for (i, parent) in parent_of.iter().enumerate() {
            match parent {
                Some(p) => children[*p].push(i),
                None => roots.push(i),
            }
        }
        Self { roots, children }
    }
}

struct Emitter<'e, 'a> {
    page: &'e Page,
    forest: &'e Forest,
    inputs: &'e PageInputs<'a>,
    styles: &'e HashSet<&'e str>,
}

impl Emitter<'_, '_> {
    fn widget_node(&self, i: usize, diagnostics: &mut Diagnostics) -> Node {
        let widget = &self.page.widgets[i];
        let schema = self.inputs.registry.resolve_tag(&widget.kind);
        let out_id = self.inputs.policy.output_id(&widget.id);

        let mut body = Mapping::new()
            .with("id", Node::Ident(out_id.clone()))
            .with("x", Node::Int(widget.x.round() as i64))
            .with("y", Node::Int(widget.y.round() as i64))
            .with("width", Node::Int(widget.w.round() as i64))
            .with("height", Node::Int(widget.h.round() as i64));

        if let Some(schema) = schema {
            emit_fields(&mut body, &schema.props, &widget.props, self.inputs.assets, true);
            emit_fields(&mut body, &schema.style, &widget.style, self.inputs.assets, true);
            self.check_styles(widget, &mut body, diagnostics);
            for (part, fields) in &schema.parts {
                if let Some(Value::Object(values)) = widget.extra.get(part) {
                    let values: BTreeMap<String, Value> =
                        values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                    let mut section = Mapping::new();
                    emit_fields(&mut section, fields, &values, self.inputs.assets, false);
                    if !section.is_empty() {
                        body.insert(part.as_str(), Node::Map(section));
                    }
                }
            }
            for event in &schema.events {
                let key = (out_id.clone(), event.clone());
                if let Some(handler) = self.inputs.handlers.get(&key) {
                    body.insert(event.as_str(), handler.clone());
                } else if let Some(node) = widget.events.get(event).and_then(event_node) {
                    body.insert(event.as_str(), node);
                }
            }
        }

        let children = &self.forest.children[i];
        let is_container = schema.map_or(true, |s| s.container);
        if is_container || !children.is_empty() {
            let nodes = children
                .iter()
                .map(|&c| self.widget_node(c, diagnostics))
                .collect();
            body.insert("widgets", Node::List(nodes));
        }

        let root_key = schema.map_or("obj", |s| s.root_key.as_str());
        Node::Map(Mapping::new().with(root_key, Node::Map(body)))
    }

    /// Rewrite `styles:` references to definition ids and report unknown ones
    fn check_styles(&self, widget: &Widget, body: &mut Mapping, diagnostics: &mut Diagnostics) {
        let names: Vec<&str> = match widget.props.get("styles") {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => return,
        };
        let mut refs = Vec::new();
        for name in names.into_iter().map(str::trim).filter(|n| !n.is_empty()) {
            if self.styles.contains(name) {
                refs.push(Node::Ident(safe_id(name)));
            } else {
                diagnostics.push(Diagnostic::UnknownStyleDefinition {
                    widget: widget.id.clone(),
                    style: name.to_string(),
                });
            }
        }
        match refs.len() {
            0 => {
                body.remove("styles");
            }
            1 => body.insert("styles", refs.remove(0)),
            _ => body.insert("styles", Node::List(refs)),
        }
    }
}

/// Write every schema field present in `values` (or defaulted) under its output name.
/// Unknown keys and null or empty values are skipped.
fn emit_fields(
    target: &mut Mapping,
    fields: &[FieldDef],
    values: &BTreeMap<String, Value>,
    assets: &AssetTable,
    with_defaults: bool,
) {
    for field in fields {
        let node = match values.get(&field.key) {
            Some(value) => value_node(&field.output, value, assets),
            None => None,
        };
        let node = node.or_else(|| {
            if with_defaults && field.emit_default {
                field.default.as_ref().and_then(Node::from_json)
            } else {
                None
            }
        });
        if let Some(node) = node {
            target.insert(field.output.as_str(), node);
        }
    }
}

fn value_node(key: &str, value: &Value, assets: &AssetTable) -> Option<Node> {
    if let Value::String(s) = value {
        if let Some(id) = assets.rewrite(s) {
            return Some(Node::ident(id));
        }
        if key.ends_with("color") {
            return Some(color_node(s));
        }
    }
    Node::from_json(value)
}

static HEX_COLOR: OnceLock<Regex> = OnceLock::new();

/// `#rrggbb` and `0xRRGGBB` become hex literals; anything else (named colors,
/// ids) stays a quoted string.
fn color_node(color: &str) -> Node {
    let re = HEX_COLOR.get_or_init(|| Regex::new(r"^(?:#|0x|0X)([0-9a-fA-F]{6})$").unwrap());
    let color = color.trim();
    match re.captures(color) {
        Some(caps) => Node::Ident(format!("0x{}", caps[1].to_uppercase())),
        None => Node::str(color),
    }
}

/// Emitted page id; a blank id falls back to the default page name.
fn page_output_id(page: &Page, policy: &IdPolicy) -> String {
    let page_id = page.page_id.trim();
    policy.output_id(if page_id.is_empty() { "main" } else { page_id })
}

/// A literal event payload: strings are hand-written YAML action lists.
fn event_node(value: &Value) -> Option<Node> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(Node::Fragment(s.clone())),
        Value::String(_) | Value::Null => None,
        other => Node::from_json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compile(project: &Project) -> (String, Diagnostics) {
        let registry = SchemaRegistry::builtin().unwrap();
        let policy = CompileOptions::default().id_policy();
        let mut diags = Diagnostics::new();
        let index = WidgetIndex::build(project, &registry, &policy, &mut diags);
        let assets = AssetTable::collect(project);
        let handlers = EventHandlers::new();
        let inputs = PageInputs {
            registry: &registry,
            index: &index,
            assets: &assets,
            handlers: &handlers,
            policy: &policy,
        };
        let lvgl = compile_pages(project, &inputs, &mut diags);
        (lvgl.to_yaml(), diags)
    }

    fn project(value: Value) -> Project {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_nested_container_with_label() {
        let p = project(json!({
            "pages": [{"page_id": "home", "widgets": [
                {"id": "root", "type": "container", "x": 0, "y": 0, "w": 320, "h": 240},
                {"id": "lbl", "type": "label", "x": 10.4, "y": 20, "w": 100, "h": 30,
                 "parent_id": "root", "props": {"text": "Hello", "draft_note": "x"}}
            ]}]
        }));
        let (yaml, diags) = compile(&p);
        assert!(diags.is_empty());
        assert_eq!(
            yaml,
            "pages:\n  - id: home\n    widgets:\n      - obj:\n          id: root\n          x: 0\n          y: 0\n          width: 320\n          height: 240\n          widgets:\n            - label:\n                id: lbl\n                x: 10\n                y: 20\n                width: 100\n                height: 30\n                text: \"Hello\"\n"
        );
    }

    #[test]
    fn test_empty_container_emits_empty_list() {
        let p = project(json!({
            "pages": [{"page_id": "home", "widgets": [
                {"id": "box", "type": "container", "w": 10, "h": 10}
            ]}]
        }));
        let (yaml, _) = compile(&p);
        assert!(yaml.contains("          widgets: []\n"));
    }

    #[test]
    fn test_null_property_omitted() {
        let p = project(json!({
            "pages": [{"page_id": "home", "widgets": [
                {"id": "lbl", "type": "label", "props": {"text": null, "long_mode": ""}}
            ]}]
        }));
        let (yaml, _) = compile(&p);
        assert!(!yaml.contains("text"));
        assert!(!yaml.contains("null"));
        assert!(!yaml.contains("long_mode"));
    }

    #[test]
    fn test_reserved_page_id_remapped() {
        let p = project(json!({"pages": [{"page_id": "main", "name": "Main", "widgets": []}]}));
        let (yaml, _) = compile(&p);
        assert_eq!(yaml, "pages:\n  - id: main_page\n    widgets: []\n");
        assert_eq!(p.pages[0].page_id, "main");
    }

    #[test]
    fn test_widget_colliding_with_remapped_page_reported() {
        let p = project(json!({"pages": [
            {"page_id": "main", "widgets": [{"id": "main_page", "type": "label"}]},
            {"page_id": "main_page", "widgets": []}
        ]}));
        let (_, diags) = compile(&p);
        let found: Vec<_> = diags.iter().collect();
        assert_eq!(found.len(), 2);
        assert!(matches!(found[0], Diagnostic::DuplicatePageId { page } if page == "main_page"));
        assert!(matches!(
            found[1],
            Diagnostic::WidgetIdTakenByPage { widget, id } if widget == "main_page" && id == "main_page"
        ));
    }

    #[test]
    fn test_no_pages_yields_default_page() {
        let (yaml, _) = compile(&Project::default());
        assert_eq!(yaml, "pages:\n  - id: main_page\n    widgets: []\n");
    }

    #[test]
    fn test_parent_problems_reported_and_rooted() {
        let p = project(json!({
            "pages": [
                {"page_id": "a", "widgets": [
                    {"id": "orphan", "type": "label", "parent_id": "ghost"},
                    {"id": "c1", "type": "container", "parent_id": "c2"},
                    {"id": "c2", "type": "container", "parent_id": "c1"},
                    {"id": "far", "type": "label", "parent_id": "other"}
                ]},
                {"page_id": "b", "widgets": [{"id": "other", "type": "container"}]}
            ]
        }));
        let (yaml, diags) = compile(&p);
        assert!(diags
            .iter()
            .any(|d| matches!(d, Diagnostic::DanglingParent { parent, .. } if parent == "ghost")));
        assert!(diags
            .iter()
            .any(|d| matches!(d, Diagnostic::CrossPageParent { widget, .. } if widget == "far")));
        assert_eq!(
            diags.iter().filter(|d| matches!(d, Diagnostic::ParentCycle { .. })).count(),
            2
        );
        assert!(yaml.contains("id: orphan"));
        assert!(yaml.contains("id: c1"));
        assert!(yaml.contains("id: c2"));
        assert!(yaml.contains("id: far"));
    }

    #[test]
    fn test_unknown_kind_emitted_as_container() {
        let p = project(json!({
            "pages": [{"page_id": "a", "widgets": [
                {"id": "holo", "type": "hologram", "props": {"beam": 3}}
            ]}]
        }));
        let (yaml, diags) = compile(&p);
        assert!(matches!(
            diags.iter().next(),
            Some(Diagnostic::UnknownWidgetKind { .. })
        ));
        assert!(yaml.contains("- obj:\n          id: holo\n"));
        assert!(!yaml.contains("beam"));
    }

    #[test]
    fn test_multiline_event_payloads_stay_valid() {
        let p = project(json!({
            "pages": [{"page_id": "a", "widgets": [
                {"id": "b", "type": "button", "events": {
                    "on_click": "\n\n   - logger.log: a\n\u{3000}\u{3000}\u{3000}- if:\n       condition: true\n       then:\n         - delay: 1s\n",
                    "on_long_press": "\t- logger.log: held\n\t- delay: 2s"
                }},
                {"id": "lbl", "type": "label", "props": {"text": "\n  indented\nflush"}}
            ]}]
        }));
        let (yaml, _) = compile(&p);
        assert!(yaml.contains(
            "on_click:\n            - logger.log: a\n            - if:\n                condition: true\n"
        ));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let widgets = &parsed["pages"][0]["widgets"];
        assert_eq!(widgets[0]["button"]["on_click"].as_sequence().map(Vec::len), Some(2));
        assert_eq!(widgets[0]["button"]["on_long_press"].as_sequence().map(Vec::len), Some(2));
        assert_eq!(widgets[1]["label"]["text"].as_str(), Some("\n  indented\nflush"));
    }

    #[test]
    fn test_style_parts_and_colors() {
        let p = project(json!({
            "pages": [{"page_id": "a", "widgets": [
                {"id": "s1", "type": "slider", "props": {"value": 40},
                 "style": {"bg_color": "#1a2b3c", "unknown_style": 1},
                 "indicator": {"bg_color": "red", "bogus": 2}}
            ]}]
        }));
        let (yaml, _) = compile(&p);
        assert!(yaml.contains("value: 40\n"));
        assert!(yaml.contains("min_value: 0\n"));
        assert!(yaml.contains("max_value: 100\n"));
        assert!(yaml.contains("bg_color: 0x1A2B3C\n"));
        assert!(yaml.contains("indicator:\n            bg_color: \"red\"\n"));
        assert!(!yaml.contains("unknown_style"));
        assert!(!yaml.contains("bogus"));
    }

    #[test]
    fn test_unknown_style_definition_reported() {
        let p = project(json!({
            "global": {"style_definitions": {"card": {"radius": 8, "nope": 1}}},
            "pages": [{"page_id": "a", "widgets": [
                {"id": "b", "type": "button", "props": {"styles": ["card", "missing"]}}
            ]}]
        }));
        let (yaml, diags) = compile(&p);
        assert!(yaml.starts_with("style_definitions:\n  - id: card\n    radius: 8\n"));
        assert!(yaml.contains("styles: card\n"));
        assert!(matches!(
            diags.iter().next(),
            Some(Diagnostic::UnknownStyleDefinition { style, .. }) if style == "missing"
        ));
    }

    #[test]
    fn test_literal_event_is_fragment() {
        let p = project(json!({
            "pages": [{"page_id": "a", "widgets": [
                {"id": "b", "type": "button",
                 "events": {"on_click": "- logger.log: clicked\n", "on_hover": "- x"}}
            ]}]
        }));
        let (yaml, _) = compile(&p);
        assert!(yaml.contains("on_click:\n            - logger.log: clicked\n"));
        assert!(!yaml.contains("on_hover"));
    }
}

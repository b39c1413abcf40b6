use std::collections::HashMap;

use crate::compiler::bindings::{BindingKey, Declarations};
use crate::compiler::locks::LockTable;
use crate::compiler::widgets::WidgetIndex;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ids::is_valid_entity_id;
use crate::node::{format_float, Mapping, Node};
use crate::project::{DataKind, Link, LinkTarget};
use crate::schema::{LinkAction, WidgetKind};

const DEFAULT_NUMBER_FORMAT: &str = "%.0f";

/// Attach each link's update to the declaration it reads from.
///
/// Updates are appended in link order, which is the order they run on the
/// device; when two links drive the same action on one widget the last wins.
pub fn compile_links(
    links: &[Link],
    index: &WidgetIndex<'_>,
    decls: &mut Declarations,
    locks: &mut LockTable,
    diagnostics: &mut Diagnostics,
) {
    let mut drivers: HashMap<(String, LinkAction), usize> = HashMap::new();
    let mut attached = 0usize;

    for (idx, link) in links.iter().enumerate() {
        let entity = link.source.entity_id.trim();
        if !is_valid_entity_id(entity) {
            diagnostics.push(Diagnostic::InvalidEntityReference {
                entity: link.source.entity_id.clone(),
                context: format!("link #{}", idx),
            });
            continue;
        }

        let Some(target) = index.get(&link.target.widget_id) else {
            diagnostics.push(Diagnostic::DanglingLinkTarget {
                index: idx,
                widget: link.target.widget_id.clone(),
            });
            continue;
        };

        let Some(action) = LinkAction::from_tag(link.target.action.trim()) else {
            diagnostics.push(Diagnostic::UnknownLinkAction {
                index: idx,
                action: link.target.action.clone(),
            });
            continue;
        };

        let supported = match target.kind() {
            Some(kind) => action.applies_to(kind),
            None => action == LinkAction::ObjHidden,
        };
        if !supported {
            diagnostics.push(Diagnostic::UnsupportedLinkAction {
                index: idx,
                action: action.tag().to_string(),
                kind: target.kind_tag().to_string(),
                widget: link.target.widget_id.clone(),
            });
            continue;
        }

        let key = BindingKey::new(entity, link.source.kind, link.source.attribute.as_deref());
        if !decls.contains(&key) {
            diagnostics.push(Diagnostic::UnbackedLink {
                index: idx,
                source_ref: key.describe(),
            });
            continue;
        }

        let update = match override_text(&link.target) {
            Some(text) => Node::Fragment(text.to_string()),
            None => {
                let kind = target.kind().unwrap_or(WidgetKind::Container);
                match synthesize(action, kind, &target.out_id, link, idx, diagnostics) {
                    Some(node) => node,
                    None => continue,
                }
            }
        };

        if let Some(first) = drivers.insert((target.out_id.clone(), action), idx) {
            diagnostics.push(Diagnostic::ConflictingLinks {
                first,
                second: idx,
                widget: link.target.widget_id.clone(),
                action: action.tag().to_string(),
            });
        }

        let lock = locks.register(entity, &target.out_id);
        if let Some(decl) = decls.get_mut(&key) {
            decl.updates.push(LockTable::guard(&lock, vec![update]));
            attached += 1;
        }
    }

    log::debug!("Attached {} of {} links", attached, links.len());
}

fn override_text(target: &LinkTarget) -> Option<&str> {
    target
        .yaml_override
        .as_deref()
        .filter(|o| !o.trim().is_empty())
}

fn synthesize(
    action: LinkAction,
    kind: WidgetKind,
    out_id: &str,
    link: &Link,
    idx: usize,
    diagnostics: &mut Diagnostics,
) -> Option<Node> {
    let source = link.source.kind;
    let target = &link.target;
    let mut body = Mapping::new().with("id", Node::ident(out_id));

    match action {
        LinkAction::WidgetChecked => {
            let state = Mapping::new().with(
                "checked",
                Node::lambda(format!("return {};", truth_expr(source))),
            );
            body.insert("state", Node::Map(state));
        }
        LinkAction::SliderValue | LinkAction::ArcValue | LinkAction::BarValue => {
            body.insert(
                "value",
                Node::lambda(format!("return {};", scaled_expr(source, target.scale))),
            );
        }
        LinkAction::LabelText => {
            body.insert("text", text_node(source, target));
        }
        LinkAction::SelectedIndex => {
            body.insert(
                "selected_index",
                Node::lambda(format!("return (int) {};", scaled_expr(source, target.scale))),
            );
        }
        LinkAction::ObjHidden => {
            let predicate = match target.condition_expr.as_deref() {
                Some(expr) if expr.trim().is_empty() => {
                    diagnostics.push(Diagnostic::EmptyPredicate { index: idx });
                    return None;
                }
                Some(expr) => expr.trim().to_string(),
                None if source == DataKind::Binary => "!x".to_string(),
                None => {
                    diagnostics.push(Diagnostic::MissingPredicate {
                        index: idx,
                        widget: target.widget_id.clone(),
                    });
                    return None;
                }
            };
            body.insert("hidden", Node::lambda(format!("return ({});", predicate)));
        }
    }

    let update = action.update_action(kind);
    Some(Node::Map(Mapping::new().with(update, Node::Map(body))))
}

/// The incoming value as a float
fn numeric_expr(source: DataKind) -> &'static str {
    match source {
        DataKind::AttributeNumber => "x",
        DataKind::Binary => "(x ? 1.0f : 0.0f)",
        DataKind::State | DataKind::AttributeText => "atof(x.c_str())",
    }
}

fn scaled_expr(source: DataKind, scale: Option<f64>) -> String {
    let base = numeric_expr(source);
    match scale {
        Some(s) if s.is_finite() && s != 1.0 => format!("({} * {})", base, format_float(s)),
        _ => base.to_string(),
    }
}

/// The incoming value as a bool
fn truth_expr(source: DataKind) -> &'static str {
    match source {
        DataKind::Binary => "x",
        DataKind::AttributeNumber => "x > 0.0f",
        DataKind::State | DataKind::AttributeText => "x == \"on\"",
    }
}

fn text_node(source: DataKind, target: &LinkTarget) -> Node {
    let format = target
        .format
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty());
    let formatted = |fmt: &str, arg: String| {
        Node::Map(
            Mapping::new()
                .with("format", Node::str(fmt))
                .with("args", Node::List(vec![Node::Str(arg)])),
        )
    };
    match source {
        DataKind::State | DataKind::AttributeText => match format {
            Some(fmt) => formatted(fmt, "x.c_str()".to_string()),
            None => Node::lambda("return x;"),
        },
        DataKind::AttributeNumber => formatted(
            format.unwrap_or(DEFAULT_NUMBER_FORMAT),
            scaled_expr(source, target.scale),
        ),
        DataKind::Binary => match format {
            Some(fmt) => formatted(fmt, "x ? \"on\" : \"off\"".to_string()),
            None => Node::lambda("return x ? \"ON\" : \"OFF\";"),
        },
    }
}

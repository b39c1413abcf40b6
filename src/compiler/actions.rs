use serde_json::Value;
use std::collections::BTreeMap;

use crate::compiler::locks::LockTable;
use crate::compiler::widgets::{EventHandlers, WidgetIndex};
use crate::config::CompileOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ids::is_valid_entity_id;
use crate::node::{Mapping, Node};
use crate::project::{ActionBinding, ServiceCall};

/// Compile action bindings into per-event handler lists.
///
/// A literal override is emitted verbatim. Otherwise the handler is
/// `delay` (optional), the lock write for (entity, widget), then the call.
/// When two bindings land on the same widget event the later one wins.
pub fn compile_actions(
    bindings: &[ActionBinding],
    index: &WidgetIndex<'_>,
    options: &CompileOptions,
    locks: &mut LockTable,
    diagnostics: &mut Diagnostics,
) -> EventHandlers {
    let mut handlers = EventHandlers::new();
    let mut owners: BTreeMap<(String, String), usize> = BTreeMap::new();

    for (idx, binding) in bindings.iter().enumerate() {
        let Some(target) = index.get(&binding.widget_id) else {
            diagnostics.push(Diagnostic::DanglingActionWidget {
                index: idx,
                widget: binding.widget_id.clone(),
            });
            continue;
        };

        let requested = binding.event.trim();
        let schema = match target.schema {
            Some(schema) if schema.supports_event(requested) => schema,
            _ => {
                diagnostics.push(Diagnostic::UnknownEvent {
                    index: idx,
                    widget: binding.widget_id.clone(),
                    kind: target.kind_tag().to_string(),
                    event: requested.to_string(),
                });
                continue;
            }
        };

        let event = match schema.commit_event(requested) {
            Some(commit) => {
                diagnostics.push(Diagnostic::CommitEventSubstituted {
                    widget: binding.widget_id.clone(),
                    from: requested.to_string(),
                    to: commit.to_string(),
                });
                commit
            }
            None => requested,
        };

        let handler = if let Some(text) = binding.override_text() {
            Node::Fragment(text.to_string())
        } else if let Some(call) = binding.call.as_ref().filter(|c| is_complete(c)) {
            synthesize(call, &target.out_id, idx, options, locks, diagnostics)
        } else {
            diagnostics.push(Diagnostic::IncompleteCall {
                index: idx,
                widget: binding.widget_id.clone(),
            });
            continue;
        };

        let key = (target.out_id.clone(), event.to_string());
        if let Some(previous) = owners.insert(key.clone(), idx) {
            diagnostics.push(Diagnostic::ShadowedAction {
                widget: binding.widget_id.clone(),
                event: event.to_string(),
                shadowed: previous,
                winner: idx,
            });
        }
        handlers.insert(key, handler);
    }

    log::debug!("Compiled {} action handlers", handlers.len());
    handlers
}

fn is_complete(call: &ServiceCall) -> bool {
    !call.domain.trim().is_empty() && !call.service.trim().is_empty()
}

fn synthesize(
    call: &ServiceCall,
    widget_out_id: &str,
    idx: usize,
    options: &CompileOptions,
    locks: &mut LockTable,
    diagnostics: &mut Diagnostics,
) -> Node {
    let mut statements = Vec::new();
    if options.outbound_delay_ms > 0 {
        statements.push(Node::Map(Mapping::new().with(
            "delay",
            Node::Ident(format!("{}ms", options.outbound_delay_ms)),
        )));
    }

    let entity = call.entity();
    if let Some(entity) = entity {
        if !is_valid_entity_id(entity) {
            diagnostics.push(Diagnostic::InvalidEntityReference {
                entity: entity.to_string(),
                context: format!("action binding #{}", idx),
            });
        }
        let lock = locks.register(entity, widget_out_id);
        statements.push(locks.writer(&lock));
    }

    let mut data = Mapping::new();
    if let Some(entity) = entity {
        data.insert("entity_id", Node::str(entity));
    }
    for (key, value) in &call.data {
        if entity.is_some() && key == "entity_id" {
            continue;
        }
        if let Some(node) = payload_node(value) {
            data.insert(key.as_str(), node);
        }
    }

    let action = Mapping::new()
        .with(
            "action",
            Node::Ident(format!("{}.{}", call.domain.trim(), call.service.trim())),
        )
        .with("data", Node::Map(data));
    statements.push(Node::Map(
        Mapping::new().with("homeassistant.action", Node::Map(action)),
    ));
    Node::List(statements)
}

/// Payload strings marked `!lambda` are expressions; everything else is a literal.
fn payload_node(value: &Value) -> Option<Node> {
    match value {
        Value::String(s) if s.trim().starts_with("!lambda") => Node::from_text(s),
        Value::String(s) => Some(Node::str(s.as_str())),
        other => Node::from_json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Project;
    use crate::schema::SchemaRegistry;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn run(project: Value, options: &CompileOptions) -> (String, Diagnostics, LockTable) {
        let project: Project = serde_json::from_value(project).unwrap();
        let registry = SchemaRegistry::builtin().unwrap();
        let mut diags = Diagnostics::new();
        let index = WidgetIndex::build(&project, &registry, &options.id_policy(), &mut diags);
        let mut locks = LockTable::new(options.lock_window_ms);
        let handlers = compile_actions(
            &project.action_bindings,
            &index,
            options,
            &mut locks,
            &mut diags,
        );
        let mut out = Mapping::new();
        for ((widget, event), node) in handlers {
            out.insert(format!("{}.{}", widget, event), node);
        }
        (out.to_yaml(), diags, locks)
    }

    fn widgets() -> Value {
        json!([{"page_id": "p", "widgets": [
            {"id": "sw", "type": "switch"},
            {"id": "sl", "type": "slider"},
            {"id": "lbl", "type": "label"}
        ]}])
    }

    #[test]
    fn test_synthesized_call_with_lock_and_delay() {
        let (yaml, diags, locks) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "sw", "event": "on_value",
                 "call": {"domain": "light", "service": "toggle", "entity_id": "light.kitchen",
                          "data": {"brightness": 128, "transition": "!lambda return x;", "name": "a\"b"}}}
            ]}),
            &CompileOptions::default(),
        );
        assert!(diags.is_empty());
        assert_eq!(
            yaml,
            "sw.on_value:\n  - delay: 150ms\n  - lambda: id(etd_lock_light_kitchen__sw) = millis() + 500;\n  - homeassistant.action:\n      action: light.toggle\n      data:\n        entity_id: \"light.kitchen\"\n        brightness: 128\n        name: \"a\\\"b\"\n        transition: !lambda return x;\n"
        );
        assert!(!locks.is_empty());
    }

    #[test]
    fn test_commit_event_substitution() {
        let (yaml, diags, _) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "sl", "event": "on_value",
                 "call": {"domain": "light", "service": "turn_on", "entity_id": "light.kitchen",
                          "data": {"brightness": "!lambda return x;"}}}
            ]}),
            &CompileOptions::default(),
        );
        assert!(yaml.starts_with("sl.on_release:\n"));
        assert!(matches!(
            diags.iter().next(),
            Some(Diagnostic::CommitEventSubstituted { to, .. }) if to == "on_release"
        ));
        assert!(!diags.has_warnings());
    }

    #[test]
    fn test_multiline_lambda_payload_is_block() {
        let options = CompileOptions {
            outbound_delay_ms: 0,
            ..Default::default()
        };
        let (yaml, _, _) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "sl", "event": "on_value",
                 "call": {"domain": "light", "service": "turn_on", "entity_id": "light.kitchen",
                          "data": {"brightness": "!lambda if (x > 200) {\n  return 255;\n}\nreturn x;"}}}
            ]}),
            &options,
        );
        assert!(yaml.ends_with(
            "        brightness: !lambda |-\n          if (x > 200) {\n            return 255;\n          }\n          return x;\n"
        ));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed["sl.on_release"].as_sequence().is_some());
    }

    #[test]
    fn test_override_wins_without_lock() {
        let (yaml, _, locks) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "sw", "event": "on_value",
                 "call": {"domain": "light", "service": "toggle", "entity_id": "light.kitchen"},
                 "yaml_override": "- homeassistant.action:\n    action: script.turn_on\n"}
            ]}),
            &CompileOptions::default(),
        );
        assert_eq!(
            yaml,
            "sw.on_value:\n  - homeassistant.action:\n      action: script.turn_on\n"
        );
        assert!(locks.is_empty());
    }

    #[test]
    fn test_empty_data_and_no_delay() {
        let options = CompileOptions {
            outbound_delay_ms: 0,
            ..Default::default()
        };
        let (yaml, _, _) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "sw", "event": "on_click",
                 "call": {"domain": "scene", "service": "turn_on"}}
            ]}),
            &options,
        );
        assert_eq!(
            yaml,
            "sw.on_click:\n  - homeassistant.action:\n      action: scene.turn_on\n      data: {}\n"
        );
    }

    #[test]
    fn test_problems_reported() {
        let (yaml, diags, _) = run(
            json!({"pages": widgets(), "action_bindings": [
                {"widget_id": "ghost", "event": "on_click", "call": {"domain": "a", "service": "b"}},
                {"widget_id": "lbl", "event": "on_value", "call": {"domain": "a", "service": "b"}},
                {"widget_id": "sw", "event": "on_click"},
                {"widget_id": "sw", "event": "on_click", "call": {"domain": "a", "service": "b"}},
                {"widget_id": "sw", "event": "on_click", "call": {"domain": "c", "service": "d"}}
            ]}),
            &CompileOptions::default(),
        );
        let found: Vec<_> = diags.iter().collect();
        assert!(matches!(found[0], Diagnostic::DanglingActionWidget { index: 0, .. }));
        assert!(matches!(found[1], Diagnostic::UnknownEvent { index: 1, .. }));
        assert!(matches!(found[2], Diagnostic::IncompleteCall { index: 2, .. }));
        assert!(matches!(
            found[3],
            Diagnostic::ShadowedAction { shadowed: 3, winner: 4, .. }
        ));
        assert!(yaml.contains("action: c.d"));
        assert!(!yaml.contains("action: a.b"));
    }
}

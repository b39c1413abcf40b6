use std::collections::HashSet;

use crate::compiler::bindings::{BindingKey, Declarations};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ids::{is_valid_entity_id, safe_id};
use crate::node::{format_float, Mapping, Node};
use crate::project::{DataKind, ScriptDef, StepDirection};

/// Setpoint scripts (`climate.set_temperature` relative to the current
/// target). Each script reads the entity's `temperature` attribute, which is
/// declared here if no binding asked for it.
pub fn compile_scripts(
    scripts: &[ScriptDef],
    decls: &mut Declarations,
    diagnostics: &mut Diagnostics,
) -> Vec<Node> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for script in scripts {
        let invalid = |reason: &str| Diagnostic::InvalidScript {
            script: script.id.clone(),
            reason: reason.to_string(),
        };
        let id = safe_id(script.id.trim());
        let entity = script.entity_id.trim();
        if id.is_empty() {
            diagnostics.push(invalid("missing id"));
            continue;
        }
        if !is_valid_entity_id(entity) {
            diagnostics.push(invalid("entity_id is not a valid entity reference"));
            continue;
        }
        if !script.step.is_finite() || script.step <= 0.0 {
            diagnostics.push(invalid("step must be a positive number"));
            continue;
        }
        if !seen.insert(id.clone()) {
            diagnostics.push(invalid("duplicate script id"));
            continue;
        }

        let key = BindingKey::new(entity, DataKind::AttributeNumber, Some("temperature"));
        let sensor = key.derived_id();
        decls.ensure(key, diagnostics);

        let op = match script.direction {
            StepDirection::Inc => '+',
            StepDirection::Dec => '-',
        };
        let data = Mapping::new()
            .with("entity_id", Node::str(entity))
            .with(
                "temperature",
                Node::lambda(format!(
                    "return id({}).state {} {}f;",
                    sensor,
                    op,
                    format_float(script.step)
                )),
            );
        let call = Mapping::new()
            .with("action", Node::ident("climate.set_temperature"))
            .with("data", Node::Map(data));
        let then = vec![Node::Map(
            Mapping::new().with("homeassistant.action", Node::Map(call)),
        )];
        out.push(Node::Map(
            Mapping::new()
                .with("id", Node::Ident(id))
                .with("then", Node::List(then)),
        ));
    }
    out
}

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::ids::{is_valid_entity_id, safe_id};
use crate::node::{Mapping, Node};
use crate::project::{DataKind, Project};

/// Ingestion sections, in the order they are written.
pub const SENSOR_SECTIONS: [&str; 3] = ["text_sensor", "sensor", "binary_sensor"];

/// Normalized identity of an ingestion declaration.
///
/// Field order gives the output sort: kind, then entity, then attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingKey {
    pub kind: DataKind,
    pub entity_id: String,
    /// Empty for kinds that ignore the attribute
    pub attribute: String,
}

impl BindingKey {
    pub fn new(entity_id: &str, kind: DataKind, attribute: Option<&str>) -> Self {
        let attribute = if kind.uses_attribute() {
            attribute.map(str::trim).unwrap_or_default().to_string()
        } else {
            String::new()
        };
        Self {
            kind,
            entity_id: entity_id.trim().to_string(),
            attribute,
        }
    }

    /// Stable id the declaration is emitted under and referenced by
    pub fn derived_id(&self) -> String {
        let entity = safe_id(&self.entity_id);
        let attribute = || {
            if self.attribute.is_empty() {
                "attr".to_string()
            } else {
                safe_id(&self.attribute)
            }
        };
        match self.kind {
            DataKind::Binary => format!("ha_bin_{}", entity),
            DataKind::State => format!("ha_state_{}", entity),
            DataKind::AttributeNumber => format!("ha_num_{}_{}", entity, attribute()),
            DataKind::AttributeText => format!("ha_txt_{}_{}", entity, attribute()),
        }
    }

    pub fn section(&self) -> &'static str {
        match self.kind {
            DataKind::State | DataKind::AttributeText => "text_sensor",
            DataKind::AttributeNumber => "sensor",
            DataKind::Binary => "binary_sensor",
        }
    }

    fn trigger(&self) -> &'static str {
        match self.kind {
            DataKind::Binary => "on_state",
            _ => "on_value",
        }
    }

    pub fn describe(&self) -> String {
        if self.attribute.is_empty() {
            format!("{} ({})", self.entity_id, self.kind.as_str())
        } else {
            format!("{}[{}] ({})", self.entity_id, self.attribute, self.kind.as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub key: BindingKey,
    pub id: String,
    /// Update actions attached by the link stage, in link order
    pub updates: Vec<Node>,
}

impl Declaration {
    fn to_node(&self) -> Node {
        let mut entry = Mapping::new()
            .with("platform", Node::ident("homeassistant"))
            .with("id", Node::ident(self.id.as_str()))
            .with("entity_id", Node::ident(self.key.entity_id.as_str()));
        if !self.key.attribute.is_empty() {
            let attr = &self.key.attribute;
            let node = if safe_id(attr) == *attr {
                Node::ident(attr.as_str())
            } else {
                Node::str(attr.as_str())
            };
            entry.insert("attribute", node);
        }
        if self.key.kind == DataKind::Binary {
            entry.insert("publish_initial_state", Node::Bool(true));
        }
        if !self.updates.is_empty() {
            entry.insert(
                self.key.trigger(),
                Node::Map(Mapping::new().with("then", Node::List(self.updates.clone()))),
            );
        }
        Node::Map(entry)
    }
}

/// Deduplicated ingestion declarations, ordered by [`BindingKey`].
#[derive(Debug, Default)]
pub struct Declarations {
    items: BTreeMap<BindingKey, Declaration>,
    ids: HashMap<String, BindingKey>,
}

impl Declarations {
    pub fn get_mut(&mut self, key: &BindingKey) -> Option<&mut Declaration> {
        self.items.get_mut(key)
    }

    pub fn contains(&self, key: &BindingKey) -> bool {
        self.items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add a declaration unless one with the same identity exists.
    /// Returns `Err` with the owner of the id when the derived id is taken.
    fn add(&mut self, key: BindingKey) -> Result<(), BindingKey> {
        if self.items.contains_key(&key) {
            return Ok(());
        }
        let id = key.derived_id();
        if let Some(owner) = self.ids.get(&id) {
            return Err(owner.clone());
        }
        self.ids.insert(id.clone(), key.clone());
        self.items.insert(
            key.clone(),
            Declaration {
                key,
                id,
                updates: Vec::new(),
            },
        );
        Ok(())
    }

    /// Declare an entity another stage depends on, if not declared already
    pub fn ensure(&mut self, key: BindingKey, diagnostics: &mut Diagnostics) {
        if let Err(owner) = self.add(key.clone()) {
            diagnostics.push(collision(&owner, &key));
        }
    }

    /// Ingestion sections in fixed order; empty sections are left out
    pub fn into_sections(self) -> Vec<(&'static str, Vec<Node>)> {
        SENSOR_SECTIONS
            .iter()
            .filter_map(|section| {
                let entries: Vec<Node> = self
                    .items
                    .values()
                    .filter(|d| d.key.section() == *section)
                    .map(Declaration::to_node)
                    .collect();
                (!entries.is_empty()).then_some((*section, entries))
            })
            .collect()
    }
}

fn collision(owner: &BindingKey, key: &BindingKey) -> Diagnostic {
    Diagnostic::DerivedIdCollision {
        id: key.derived_id(),
        first: owner.describe(),
        second: key.describe(),
    }
}

/// Collapse the project's bindings into one declaration per identity.
pub fn compile_bindings(project: &Project, diagnostics: &mut Diagnostics) -> Declarations {
    let mut decls = Declarations::default();
    for (index, binding) in project.bindings.iter().enumerate() {
        let entity = binding.entity_id.trim();
        if !is_valid_entity_id(entity) {
            diagnostics.push(Diagnostic::InvalidEntityReference {
                entity: binding.entity_id.clone(),
                context: format!("binding #{}", index),
            });
            continue;
        }
        let key = BindingKey::new(entity, binding.kind, binding.attribute.as_deref());
        if let Err(owner) = decls.add(key.clone()) {
            diagnostics.push(collision(&owner, &key));
        }
    }
    log::debug!(
        "Compiled {} bindings into {} declarations",
        project.bindings.len(),
        decls.len()
    );
    decls
}

use std::collections::BTreeSet;

use crate::ids::entity_slug;
use crate::node::{Mapping, Node};

/// Anti-feedback lock registry for one compilation.
///
/// Each lock is a `uint32_t` global holding a `millis()` deadline, keyed by
/// (entity, widget). Outbound actions write it; inbound link updates for the
/// same pair are skipped until it expires. Both sides derive the name here so
/// the generated reader and writer always agree.
#[derive(Debug, Default)]
pub struct LockTable {
    window_ms: u32,
    names: BTreeSet<String>,
}

impl LockTable {
    pub fn new(window_ms: u32) -> Self {
        Self {
            window_ms,
            names: BTreeSet::new(),
        }
    }

    pub fn lock_name(entity_id: &str, widget_out_id: &str) -> String {
        format!("etd_lock_{}__{}", entity_slug(entity_id), widget_out_id)
    }

    /// Register the (entity, widget) pair and return its global id
    pub fn register(&mut self, entity_id: &str, widget_out_id: &str) -> String {
        let name = Self::lock_name(entity_id, widget_out_id);
        self.names.insert(name.clone());
        name
    }

    /// `- lambda: id(L) = millis() + <window>;`
    pub fn writer(&self, name: &str) -> Node {
        Node::Map(Mapping::new().with(
            "lambda",
            Node::Raw(format!("id({}) = millis() + {};", name, self.window_ms)),
        ))
    }

    /// Wrap `actions` so they only run once the lock has expired
    pub fn guard(name: &str, actions: Vec<Node>) -> Node {
        let condition =
            Mapping::new().with("lambda", Node::Raw(format!("return millis() > id({});", name)));
        let body = Mapping::new()
            .with("condition", Node::Map(condition))
            .with("then", Node::List(actions));
        Node::Map(Mapping::new().with("if", Node::Map(body)))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// `globals:` entries, one per registered pair, sorted by name
    pub fn into_globals(self) -> Vec<Node> {
        self.names
            .into_iter()
            .map(|name| {
                Node::Map(
                    Mapping::new()
                        .with("id", Node::Ident(name))
                        .with("type", Node::ident("uint32_t"))
                        .with("restore_value", Node::ident("no"))
                        .with("initial_value", Node::Raw("'0'".to_string())),
                )
            })
            .collect()
    }
}

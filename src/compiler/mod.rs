//! Compile stages: project model to ordered output nodes.
//!
//! Stages run in a fixed order over an immutable project snapshot. Each one
//! reports problems into the shared [`Diagnostics`] and keeps going.

pub mod actions;
pub mod assets;
pub mod bindings;
pub mod links;
pub mod locks;
pub mod scripts;
pub mod widgets;

use crate::config::CompileOptions;
use crate::diagnostics::Diagnostics;
use crate::node::{Mapping, Node};
use crate::project::Project;
use crate::schema::SchemaRegistry;

use self::assets::AssetTable;
use self::locks::LockTable;
use self::widgets::{PageInputs, WidgetIndex};

/// Compiled output, split by where the assembler places it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragments {
    /// Entries under `lvgl:` (style definitions, gradients, pages)
    pub lvgl: Mapping,
    /// Ingestion sections (`text_sensor`, `sensor`, `binary_sensor`) in output order
    pub sensors: Vec<(&'static str, Vec<Node>)>,
    pub globals: Vec<Node>,
    pub scripts: Vec<Node>,
    pub fonts: Vec<Node>,
    pub images: Vec<Node>,
}

impl Fragments {
    /// Generated top-level sections that follow the recipe body, in output order
    pub fn trailing_sections(&self) -> Vec<(&'static str, &[Node])> {
        [
            ("globals", self.globals.as_slice()),
            ("script", self.scripts.as_slice()),
            ("font", self.fonts.as_slice()),
            ("image", self.images.as_slice()),
        ]
        .into_iter()
        .filter(|(_, nodes)| !nodes.is_empty())
        .collect()
    }
}

/// Run every compile stage over `project`.
pub fn compile_fragments(
    project: &Project,
    registry: &SchemaRegistry,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> Fragments {
    let policy = options.id_policy();
    let index = WidgetIndex::build(project, registry, &policy, diagnostics);
    let assets = AssetTable::collect(project);
    let mut locks = LockTable::new(options.lock_window_ms);

    let handlers = actions::compile_actions(
        &project.action_bindings,
        &index,
        options,
        &mut locks,
        diagnostics,
    );

    let inputs = PageInputs {
        registry,
        index: &index,
        assets: &assets,
        handlers: &handlers,
        policy: &policy,
    };
    let lvgl = widgets::compile_pages(project, &inputs, diagnostics);

    let mut decls = bindings::compile_bindings(project, diagnostics);
    links::compile_links(&project.links, &index, &mut decls, &mut locks, diagnostics);
    let scripts = scripts::compile_scripts(&project.scripts, &mut decls, diagnostics);

    Fragments {
        lvgl,
        sensors: decls.into_sections(),
        globals: locks.into_globals(),
        scripts,
        fonts: assets.font_nodes(options),
        images: assets.image_nodes(options),
    }
}

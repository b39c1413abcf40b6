//! # touch-designer
//!
//! Compiles a touchscreen UI project (pages, widgets, Home Assistant data
//! bindings, reactive links and outbound actions) into an ESPHome LVGL
//! configuration document, and merges that document into a device file
//! without disturbing anything outside its managed region.
//!
//! ## Features
//! - Declarative widget schema registry (`schemas/widgets.yaml`)
//! - Deterministic, byte-stable output for identical input
//! - Inbound state ingestion and outbound service calls with anti-feedback locks
//! - Hardware recipe templates with named insertion points
//! - Marker-based safe merge that aborts instead of guessing
//!
//! ## Example
//! ```ignore
//! use touch_designer::{compile, export_safe, Device, ExportMode};
//!
//! let device = Device::from_json(&std::fs::read_to_string("device.json")?)?;
//! let recipe = std::fs::read_to_string("recipe.yaml")?;
//!
//! let compiled = compile(&device, &recipe)?;
//! for diagnostic in &compiled.diagnostics {
//!     eprintln!("{}", diagnostic);
//! }
//!
//! let merged = export_safe("", &compiled.document, ExportMode::CreateOrUpdate)?;
//! println!("{}", merged.text);
//! ```

pub mod assemble;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod ids;
pub mod node;
pub mod project;
pub mod recipe;
pub mod schema;
pub mod selfcheck;

// --- Core types ---
pub use assemble::Compilation;
pub use config::CompileOptions;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{DesignerError, DesignerResult, ExportAbort};
pub use project::{Device, Project};
pub use schema::{LinkAction, SchemaRegistry, WidgetKind};

// --- Export types ---
pub use export::{Export, ExportMode, ExportOptions, ExportOutcome, ExportPreview};

/// Compile a device project against a recipe with the built-in widget
/// schemas and default options.
pub fn compile(device: &Device, recipe: &str) -> DesignerResult<Compilation> {
    let registry = SchemaRegistry::builtin()?;
    Ok(compile_with(device, recipe, &registry, &CompileOptions::default()))
}

/// Compile with an explicit registry and options. Pure and total: every
/// project problem becomes a diagnostic.
pub fn compile_with(
    device: &Device,
    recipe: &str,
    registry: &SchemaRegistry,
    options: &CompileOptions,
) -> Compilation {
    assemble::compile_document(device, recipe, registry, options)
}

/// Merge a compiled document into existing file text
pub fn export_safe(existing: &str, document: &str, mode: ExportMode) -> Result<Export, ExportAbort> {
    export::export_safe(existing, document, mode)
}

/// Merge a compiled document into the file at `path`
pub fn export_to_path(
    path: &std::path::Path,
    document: &str,
    options: &ExportOptions,
) -> DesignerResult<Export> {
    export::export_to_path(path, document, options)
}

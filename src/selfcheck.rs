//! Structural validation of compiled documents and the compile/export
//! self-check used by the host layer for diagnostics.

use serde_yaml::Value;
use std::collections::HashSet;
use std::fmt;

use crate::assemble::compile_document;
use crate::config::CompileOptions;
use crate::error::ExportAbort;
use crate::export::{export_safe, ExportMode, BEGIN_MARKER, END_MARKER};
use crate::project::Device;
use crate::recipe::{self, API_KEY_PLACEHOLDER, DEVICE_NAME_PLACEHOLDER};
use crate::schema::SchemaRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentIssue {
    Unparseable(String),
    DuplicateTopLevelKey(String),
    EsphomeNotFirst,
    MissingDeviceName,
    LeftoverMarker(String),
    LeftoverPlaceholder(&'static str),
}

impl fmt::Display for DocumentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentIssue::Unparseable(reason) => write!(f, "document is not valid YAML: {}", reason),
            DocumentIssue::DuplicateTopLevelKey(key) => {
                write!(f, "top-level section '{}' is declared more than once", key)
            }
            DocumentIssue::EsphomeNotFirst => write!(f, "'esphome:' is not the first section"),
            DocumentIssue::MissingDeviceName => write!(f, "'esphome:' has no name"),
            DocumentIssue::LeftoverMarker(marker) => {
                write!(f, "insertion point '{}' was not substituted", marker)
            }
            DocumentIssue::LeftoverPlaceholder(token) => {
                write!(f, "placeholder '{}' was not substituted", token)
            }
        }
    }
}

/// Check that a compiled document is something the device toolchain will accept.
pub fn validate_document(text: &str) -> Vec<DocumentIssue> {
    let mut issues = Vec::new();

    let mut seen = HashSet::new();
    let blocks = recipe::split_blocks(text);
    for key in blocks.iter().filter_map(|b| b.key.as_deref()) {
        if !seen.insert(key) {
            issues.push(DocumentIssue::DuplicateTopLevelKey(key.to_string()));
        }
    }
    if blocks.iter().find_map(|b| b.key.as_deref()) != Some("esphome") {
        issues.push(DocumentIssue::EsphomeNotFirst);
    }

    for line in text.lines() {
        let t = line.trim();
        if t.len() > 6 && t.starts_with("#__") && t.ends_with("__") {
            issues.push(DocumentIssue::LeftoverMarker(t.to_string()));
        }
    }
    for token in [DEVICE_NAME_PLACEHOLDER, API_KEY_PLACEHOLDER] {
        if text.contains(token) {
            issues.push(DocumentIssue::LeftoverPlaceholder(token));
        }
    }

    // Duplicate keys already fail the parse; don't report them twice.
    if issues
        .iter()
        .any(|i| matches!(i, DocumentIssue::DuplicateTopLevelKey(_)))
    {
        return issues;
    }
    match serde_yaml::from_str::<Value>(text) {
        Ok(doc) => {
            let name = doc
                .get("esphome")
                .and_then(|e| e.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("");
            if name.trim().is_empty() {
                issues.push(DocumentIssue::MissingDeviceName);
            }
        }
        Err(err) => issues.push(DocumentIssue::Unparseable(err.to_string())),
    }
    issues
}

// ─── Self-check ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl Check {
    fn new(name: &'static str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfCheckReport {
    pub checks: Vec<Check>,
}

impl SelfCheckReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Compile twice, validate, export twice into a scratch buffer and probe
/// marker corruption. Touches no files.
pub fn self_check(
    device: &Device,
    recipe_text: &str,
    registry: &SchemaRegistry,
    options: &CompileOptions,
) -> SelfCheckReport {
    let mut report = SelfCheckReport::default();

    let first = compile_document(device, recipe_text, registry, options);
    let second = compile_document(device, recipe_text, registry, options);
    let doc = first.document;
    report.checks.push(Check::new(
        "compile_deterministic",
        !doc.trim().is_empty() && doc == second.document,
        if doc.trim().is_empty() {
            "compiled document is empty".to_string()
        } else if doc != second.document {
            "two compilations of the same project differ".to_string()
        } else {
            format!("{} bytes", doc.len())
        },
    ));

    let issues = validate_document(&doc);
    report.checks.push(Check::new(
        "document_valid",
        issues.is_empty(),
        issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    ));

    let user_above = "# user content above\nlogger:\n  level: INFO\n";
    let user_below = "\n# user content below\n";
    let check = match export_safe(user_above, &doc, ExportMode::CreateOrUpdate) {
        Ok(created) => {
            let surrounded = format!("{}{}", created.text, user_below);
            match export_safe(&surrounded, &doc, ExportMode::UpdateOnly) {
                Ok(again) if again.changed => {
                    Check::new("export_idempotent", false, "second export produced a diff")
                }
                Ok(again) if !again.text.starts_with(user_above) || !again.text.ends_with(user_below) => {
                    Check::new("export_idempotent", false, "content outside the managed region changed")
                }
                Ok(_) => Check::new("export_idempotent", true, ""),
                Err(abort) => Check::new("export_idempotent", false, abort.to_string()),
            }
        }
        Err(abort) => Check::new("export_idempotent", false, abort.to_string()),
    };
    report.checks.push(check);

    let corrupted = format!(
        "{}\nfoo: 1\n{}\nbar: 2\n{}\n",
        BEGIN_MARKER, BEGIN_MARKER, END_MARKER
    );
    let aborted = matches!(
        export_safe(&corrupted, &doc, ExportMode::CreateOrUpdate),
        Err(ExportAbort::DuplicatedMarkers { .. })
    );
    report.checks.push(Check::new(
        "duplicate_markers_abort",
        aborted,
        if aborted { "" } else { "duplicated markers were not rejected" },
    ));

    report
}

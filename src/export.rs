//! Safe-merge export: place a compiled document inside a marker-bounded
//! region of a target file, leaving everything outside the region untouched.
//!
//! Marker problems abort the export before anything is written; retrying
//! cannot succeed until someone fixes the file by hand.

use log::{debug, info};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{DesignerError, DesignerResult, ExportAbort};

pub const BEGIN_MARKER: &str = "# --- BEGIN ESPHOME_TOUCH_DESIGNER GENERATED ---";
pub const END_MARKER: &str = "# --- END ESPHOME_TOUCH_DESIGNER GENERATED ---";

const USER_HINT: &str = "# --- USER YAML BELOW (preserved on future exports if you keep the marker block above) ---\n# Add sensors, switches, substitutions, packages, etc.\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// Replace the managed region, or create one when the target has none
    #[default]
    CreateOrUpdate,
    /// Replace the managed region; a target without one is an abort
    UpdateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportOutcome {
    /// Target was empty or missing
    Created,
    /// Managed region appended below existing unmanaged content
    Appended,
    /// Existing managed region replaced
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub text: String,
    pub outcome: ExportOutcome,
    /// False when `text` is byte-identical to the target
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPreview {
    pub outcome: ExportOutcome,
    pub changed: bool,
    /// SHA-256 of the target as read; pass back as `expected_hash` when writing
    pub expected_hash: String,
    pub new_hash: String,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub mode: ExportMode,
    pub expected_hash: Option<String>,
}

/// Lower-hex SHA-256 of `text`
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ─── Marker scan ────────────────────────────────────────────────────────────

/// Byte offsets of a valid marker pair: start of the BEGIN line, end of the
/// BEGIN line (after its newline), start of the END line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    begin_line: usize,
    body_start: usize,
    end_line: usize,
}

/// `Ok(None)` when the text has no markers at all.
fn scan(text: &str) -> Result<Option<Region>, ExportAbort> {
    let begin_total = text.matches(BEGIN_MARKER).count();
    let end_total = text.matches(END_MARKER).count();
    if begin_total > 1 || end_total > 1 {
        return Err(ExportAbort::DuplicatedMarkers {
            begin: begin_total,
            end: end_total,
        });
    }

    let mut begin = None;
    let mut end = None;
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if content.trim() == BEGIN_MARKER {
            begin = Some((offset, offset + line.len()));
        } else if content.trim() == END_MARKER {
            end = Some(offset);
        }
        offset += line.len();
    }

    if (begin.is_none() && begin_total == 1) || (end.is_none() && end_total == 1) {
        return Err(ExportAbort::MalformedMarkers {
            reason: "marker must occupy a whole line".to_string(),
        });
    }
    match (begin, end) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ExportAbort::MalformedMarkers {
            reason: "BEGIN marker without END marker".to_string(),
        }),
        (None, Some(_)) => Err(ExportAbort::MalformedMarkers {
            reason: "END marker without BEGIN marker".to_string(),
        }),
        (Some((begin_line, body_start)), Some(end_line)) => {
            if end_line < begin_line {
                return Err(ExportAbort::InvertedMarkers);
            }
            Ok(Some(Region {
                begin_line,
                body_start,
                end_line,
            }))
        }
    }
}

// ─── Merge ──────────────────────────────────────────────────────────────────

/// Merge `document` into `existing`. Pure; the caller decides what to do
/// with the resulting text.
pub fn export_safe(existing: &str, document: &str, mode: ExportMode) -> Result<Export, ExportAbort> {
    if document.contains(BEGIN_MARKER) || document.contains(END_MARKER) {
        return Err(ExportAbort::GeneratedContainsMarkers);
    }
    let body = document.trim_end_matches(['\n', '\r', ' ', '\t']);

    let (text, outcome) = match scan(existing)? {
        Some(region) => {
            let mut text = String::with_capacity(existing.len() + body.len());
            text.push_str(&existing[..region.body_start]);
            text.push_str(body);
            text.push('\n');
            text.push_str(&existing[region.end_line..]);
            (text, ExportOutcome::Replaced)
        }
        None if mode == ExportMode::UpdateOnly => return Err(ExportAbort::MissingMarkers),
        None if existing.trim().is_empty() => (
            format!("{}\n{}\n{}\n\n{}", BEGIN_MARKER, body, END_MARKER, USER_HINT),
            ExportOutcome::Created,
        ),
        None => (
            format!(
                "{}\n\n{}\n{}\n{}\n",
                existing.trim_end(),
                BEGIN_MARKER,
                body,
                END_MARKER
            ),
            ExportOutcome::Appended,
        ),
    };
    let changed = text != existing;
    Ok(Export {
        text,
        outcome,
        changed,
    })
}

/// What `export_to_path` would do, without writing.
pub fn preview_export(existing: &str, document: &str, mode: ExportMode) -> Result<ExportPreview, ExportAbort> {
    let export = export_safe(existing, document, mode)?;
    Ok(ExportPreview {
        outcome: export.outcome,
        changed: export.changed,
        expected_hash: content_hash(existing),
        new_hash: content_hash(&export.text),
        text: export.text,
    })
}

fn read_target(path: &Path) -> DesignerResult<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(DesignerError::io(path, err)),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Merge `document` into the file at `path`.
///
/// The target is read, validated and merged; it is re-read immediately
/// before writing and the export aborts if it changed in between (or if it
/// no longer matches `options.expected_hash`). The write goes to a sibling
/// temporary file that is then renamed over the target. An unchanged result
/// is not written at all.
pub fn export_to_path(path: &Path, document: &str, options: &ExportOptions) -> DesignerResult<Export> {
    let existing = read_target(path)?;
    let current_hash = content_hash(&existing);
    if let Some(expected) = &options.expected_hash {
        if *expected != current_hash {
            return Err(ExportAbort::ExternallyModified {
                expected: expected.clone(),
                actual: current_hash,
            }
            .into());
        }
    }

    let export = export_safe(&existing, document, options.mode)?;
    if !export.changed {
        info!("{}: managed region already up to date", path.display());
        return Ok(export);
    }

    let latest = read_target(path)?;
    if latest != existing {
        return Err(ExportAbort::ExternallyModified {
            expected: current_hash,
            actual: content_hash(&latest),
        }
        .into());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| DesignerError::io(parent, e))?;
    }
    let permissions = fs::metadata(path).ok().map(|m| m.permissions());
    let tmp = temp_path(path);
    debug!("writing {} via {}", path.display(), tmp.display());
    fs::write(&tmp, &export.text).map_err(|e| DesignerError::io(&tmp, e))?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(DesignerError::io(path, err));
    }
    if let Some(permissions) = permissions {
        fs::set_permissions(path, permissions).map_err(|e| DesignerError::io(path, e))?;
    }
    info!("{}: export {:?} ({} bytes)", path.display(), export.outcome, export.text.len());
    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn managed(before: &str, body: &str, after: &str) -> String {
        format!("{}{}\n{}\n{}\n{}", before, BEGIN_MARKER, body, END_MARKER, after)
    }

    #[test]
    fn test_first_write_into_empty_file() {
        let export = export_safe("", "esphome:\n  name: x\n", ExportMode::CreateOrUpdate).unwrap();
        assert_eq!(export.outcome, ExportOutcome::Created);
        assert_eq!(
            export.text,
            format!("{}\nesphome:\n  name: x\n{}\n\n{}", BEGIN_MARKER, END_MARKER, USER_HINT)
        );
    }

    #[test]
    fn test_first_write_appends_below_user_content() {
        let export = export_safe("logger:\n\n\n", "a: 1\n", ExportMode::CreateOrUpdate).unwrap();
        assert_eq!(export.outcome, ExportOutcome::Appended);
        assert_eq!(export.text, format!("logger:\n\n{}\na: 1\n{}\n", BEGIN_MARKER, END_MARKER));
    }

    #[test]
    fn test_replace_keeps_outside_bytes() {
        let existing = managed("# mine\r\nfoo: 1\n", "old: 1", "bar: 2\n# end");
        let export = export_safe(&existing, "new: 2\nmore: 3\n", ExportMode::UpdateOnly).unwrap();
        assert_eq!(export.outcome, ExportOutcome::Replaced);
        assert_eq!(export.text, managed("# mine\r\nfoo: 1\n", "new: 2\nmore: 3", "bar: 2\n# end"));

        let again = export_safe(&export.text, "new: 2\nmore: 3\n", ExportMode::UpdateOnly).unwrap();
        assert!(!again.changed);
        assert_eq!(again.text, export.text);
    }

    #[test]
    fn test_empty_region_between_adjacent_markers() {
        let existing = format!("{}\n{}\n", BEGIN_MARKER, END_MARKER);
        let export = export_safe(&existing, "a: 1", ExportMode::UpdateOnly).unwrap();
        assert_eq!(export.text, format!("{}\na: 1\n{}\n", BEGIN_MARKER, END_MARKER));
    }

    #[test]
    fn test_marker_aborts() {
        let doc = "a: 1\n";
        let dup = format!("{}\n{}\n{}\n", BEGIN_MARKER, BEGIN_MARKER, END_MARKER);
        assert_eq!(
            export_safe(&dup, doc, ExportMode::CreateOrUpdate),
            Err(ExportAbort::DuplicatedMarkers { begin: 2, end: 1 })
        );

        let inverted = format!("{}\nx: 1\n{}\n", END_MARKER, BEGIN_MARKER);
        assert_eq!(
            export_safe(&inverted, doc, ExportMode::CreateOrUpdate),
            Err(ExportAbort::InvertedMarkers)
        );

        let lone = format!("x: 1\n{}\n", BEGIN_MARKER);
        let err = export_safe(&lone, doc, ExportMode::CreateOrUpdate).unwrap_err();
        assert_eq!(err.code(), "marker_malformed");

        let inline = format!("x: 1 {}\n{}\n", BEGIN_MARKER, END_MARKER);
        let err = export_safe(&inline, doc, ExportMode::CreateOrUpdate).unwrap_err();
        assert_eq!(err.code(), "marker_malformed");

        assert_eq!(
            export_safe("x: 1\n", doc, ExportMode::UpdateOnly),
            Err(ExportAbort::MissingMarkers)
        );
        assert_eq!(
            export_safe("", &format!("a: 1\n{}\n", END_MARKER), ExportMode::CreateOrUpdate),
            Err(ExportAbort::GeneratedContainsMarkers)
        );
    }

    #[test]
    fn test_preview_hashes() {
        let preview = preview_export("", "a: 1\n", ExportMode::CreateOrUpdate).unwrap();
        assert_eq!(
            preview.expected_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(preview.new_hash, content_hash(&preview.text));
        assert!(preview.changed);
    }
}

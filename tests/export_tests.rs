use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use touch_designer::export::{content_hash, preview_export, BEGIN_MARKER, END_MARKER};
use touch_designer::{
    compile, export_safe, export_to_path, Device, DesignerError, ExportAbort, ExportMode,
    ExportOptions, ExportOutcome,
};

fn get_fixture_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("fixtures");
    path.push(filename);
    path
}

fn compiled_fixture() -> String {
    let device =
        Device::from_json(&fs::read_to_string(get_fixture_path("hallway_device.json")).unwrap())
            .unwrap();
    let recipe = fs::read_to_string(get_fixture_path("recipe_basic.yaml")).unwrap();
    compile(&device, &recipe).unwrap().document
}

fn abort_of(result: Result<touch_designer::Export, DesignerError>) -> ExportAbort {
    match result {
        Err(DesignerError::ExportAborted(abort)) => abort,
        other => panic!("expected an export abort, got {:?}", other),
    }
}

// First write
#[test]
fn test_first_write_creates_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("hallway_panel.yaml");
    let doc = compiled_fixture();

    let export = export_to_path(&target, &doc, &ExportOptions::default()).unwrap();
    assert_eq!(export.outcome, ExportOutcome::Created);
    assert!(export.changed);

    let written = fs::read_to_string(&target).unwrap();
    assert_eq!(written, export.text);
    assert!(written.starts_with(&format!("{}\n# Generated by touch-designer", BEGIN_MARKER)));
    assert!(written.contains(&format!("\n{}\n", END_MARKER)));
    assert!(written.contains("# --- USER YAML BELOW"));
    assert!(!dir.path().join(".hallway_panel.yaml.tmp").exists());
}

#[test]
fn test_first_write_keeps_existing_content_above() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("device.yaml");
    fs::write(&target, "substitutions:\n  room: hall\n").unwrap();

    let export = export_to_path(&target, "esphome:\n  name: x\n", &ExportOptions::default()).unwrap();
    assert_eq!(export.outcome, ExportOutcome::Appended);
    assert_eq!(
        fs::read_to_string(&target).unwrap(),
        format!(
            "substitutions:\n  room: hall\n\n{}\nesphome:\n  name: x\n{}\n",
            BEGIN_MARKER, END_MARKER
        )
    );
}

// Idempotence
#[test]
fn test_second_export_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("device.yaml");
    let doc = compiled_fixture();

    export_to_path(&target, &doc, &ExportOptions::default()).unwrap();
    let first = fs::read_to_string(&target).unwrap();

    let again = export_to_path(&target, &compiled_fixture(), &ExportOptions::default()).unwrap();
    assert!(!again.changed);
    assert_eq!(again.outcome, ExportOutcome::Replaced);
    assert_eq!(fs::read_to_string(&target).unwrap(), first);
}

// Marker safety
#[test]
fn test_content_outside_region_untouched() {
    let before = "# hand-written header\nsubstitutions:\n  room: hall   \n\n";
    let after = "\n# below the block\nswitch:\n  - platform: restart\n    name: Restart\n";
    let existing = format!("{}{}\nold: 1\n{}\n{}", before, BEGIN_MARKER, END_MARKER, after);

    let large: String = (0..500).map(|i| format!("k{}: {}\n", i, i)).collect();
    let export = export_safe(&existing, &large, ExportMode::UpdateOnly).unwrap();

    assert!(export.text.starts_with(&format!("{}{}\n", before, BEGIN_MARKER)));
    assert!(export.text.ends_with(&format!("{}\n{}", END_MARKER, after)));
    assert!(!export.text.contains("old: 1"));
    assert!(export.text.contains("k499: 499\n"));
}

// Corruption aborts
#[test]
fn test_duplicate_begin_aborts_and_leaves_file() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("device.yaml");
    let corrupted = format!(
        "a: 1\n{}\nb: 2\n{}\nc: 3\n{}\n",
        BEGIN_MARKER, BEGIN_MARKER, END_MARKER
    );
    fs::write(&target, &corrupted).unwrap();

    let abort = abort_of(export_to_path(&target, "esphome:\n  name: x\n", &ExportOptions::default()));
    assert_eq!(abort, ExportAbort::DuplicatedMarkers { begin: 2, end: 1 });
    assert_eq!(abort.code(), "marker_duplicated");
    assert_eq!(fs::read_to_string(&target).unwrap(), corrupted);
}

#[test]
fn test_inverted_and_missing_markers_abort() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("device.yaml");

    let inverted = format!("{}\nx: 1\n{}\n", END_MARKER, BEGIN_MARKER);
    fs::write(&target, &inverted).unwrap();
    let abort = abort_of(export_to_path(&target, "a: 1\n", &ExportOptions::default()));
    assert_eq!(abort.code(), "marker_order_invalid");
    assert_eq!(fs::read_to_string(&target).unwrap(), inverted);

    fs::write(&target, "x: 1\n").unwrap();
    let options = ExportOptions {
        mode: ExportMode::UpdateOnly,
        ..Default::default()
    };
    let abort = abort_of(export_to_path(&target, "a: 1\n", &options));
    assert_eq!(abort, ExportAbort::MissingMarkers);
    assert_eq!(fs::read_to_string(&target).unwrap(), "x: 1\n");
}

// Check-then-act guard
#[test]
fn test_expected_hash_guards_against_external_edits() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("device.yaml");
    fs::write(&target, "x: 1\n").unwrap();

    let preview = preview_export("x: 1\n", "a: 1\n", ExportMode::CreateOrUpdate).unwrap();
    assert_eq!(preview.expected_hash, content_hash("x: 1\n"));

    fs::write(&target, "x: 2\n").unwrap();
    let options = ExportOptions {
        expected_hash: Some(preview.expected_hash.clone()),
        ..Default::default()
    };
    let abort = abort_of(export_to_path(&target, "a: 1\n", &options));
    assert!(matches!(abort, ExportAbort::ExternallyModified { .. }));
    assert_eq!(fs::read_to_string(&target).unwrap(), "x: 2\n");

    fs::write(&target, "x: 1\n").unwrap();
    let export = export_to_path(&target, "a: 1\n", &options).unwrap();
    assert_eq!(content_hash(&export.text), preview.new_hash);
}

//! Hardware recipe text: insertion points, top-level sections and lint.
//!
//! Recipes are hand-written YAML templates, so they are handled as text.
//! Comments, ordering and formatting outside the insertion points survive
//! compilation untouched.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::node::{list_to_yaml, Node};

pub const PAGES_MARKER: &str = "#__LVGL_PAGES__";
pub const BINDINGS_MARKER: &str = "#__HA_BINDINGS__";
pub const USER_PRE_MARKER: &str = "#__USER_YAML_PRE__";
pub const USER_POST_MARKER: &str = "#__USER_YAML_POST__";

pub const DEVICE_NAME_PLACEHOLDER: &str = "__ETD_DEVICE_NAME__";
pub const API_KEY_PLACEHOLDER: &str = "__ETD_API_KEY__";

/// Token for a project-defined insertion point
pub fn custom_marker(name: &str) -> String {
    format!("#__{}__", name)
}

/// Normalize recipe text: no BOM, `\n` line endings, and a top-level
/// `esphome:` line even when the author indented it.
pub fn normalize(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let text = text.replace("\r\n", "\n");
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    if let Some(first) = lines
        .iter_mut()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
    {
        let trimmed = first.trim_start();
        if trimmed.starts_with("esphome:") && trimmed.len() != first.len() {
            *first = trimmed.to_string();
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

// ─── Insertion points ───────────────────────────────────────────────────────

/// Indentation of the first line consisting of `marker` alone
pub fn find_marker(text: &str, marker: &str) -> Option<usize> {
    text.lines()
        .find(|l| l.trim() == marker)
        .map(|l| l.len() - l.trim_start().len())
}

/// Replace the first line holding only `marker` with `payload`, each payload
/// line prefixed by the marker's indentation. Further occurrences are removed.
/// Returns `None` when the marker is absent.
pub fn replace_marker(text: &str, marker: &str, payload: &str) -> Option<String> {
    find_marker(text, marker)?;
    let mut out = String::with_capacity(text.len() + payload.len());
    let mut done = false;
    for line in text.lines() {
        if line.trim() != marker {
            out.push_str(line);
            out.push('\n');
            continue;
        }
        if done {
            continue;
        }
        done = true;
        let pad = &line[..line.len() - line.trim_start().len()];
        for p in payload.trim_end_matches('\n').lines() {
            if !p.is_empty() {
                out.push_str(pad);
                out.push_str(p);
            }
            out.push('\n');
        }
    }
    Some(out)
}

/// Drop every line holding only `marker`
pub fn remove_marker(text: &str, marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines().filter(|l| l.trim() != marker) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

// ─── Top-level sections ─────────────────────────────────────────────────────

static TOP_LEVEL_KEY: OnceLock<Regex> = OnceLock::new();

fn top_level_key(line: &str) -> Option<&str> {
    let re = TOP_LEVEL_KEY
        .get_or_init(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_.\-]*)\s*:(?:\s|$)").unwrap());
    re.captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// A top-level section: its key line and everything up to the next key.
/// The leading block of a document (comments before the first key) has no key.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub key: Option<String>,
    pub lines: Vec<String>,
}

impl Block {
    pub fn new(key: &str, body: &str) -> Self {
        Self {
            key: Some(key.to_string()),
            lines: body.lines().map(str::to_string).collect(),
        }
    }

    pub fn is(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }

    /// Text after `key:` on the key line, without comments
    fn inline_value(&self) -> &str {
        let Some(first) = self.lines.first() else {
            return "";
        };
        let after = first.split_once(':').map(|(_, v)| v).unwrap_or("");
        after.split(" #").next().unwrap_or("").trim()
    }

    fn content_end(&self) -> usize {
        self.lines
            .iter()
            .rposition(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .map_or(1, |i| i + 1)
    }

    /// Append list entries to this section. Fails when the section holds a
    /// mapping or an inline value instead of a block list.
    pub fn append_entries(&mut self, entries: &[Node]) -> bool {
        let inline = self.inline_value();
        if !(inline.is_empty() || inline == "[]") {
            return false;
        }
        let child = self.lines.iter().skip(1).find(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        });
        let indent = match child {
            Some(line) if line.trim_start().starts_with("- ") || line.trim() == "-" => {
                line.len() - line.trim_start().len()
            }
            Some(_) => return false,
            None => 2,
        };
        if inline == "[]" {
            if let (Some(first), Some(key)) = (self.lines.first_mut(), self.key.as_deref()) {
                *first = format!("{}:", key);
            }
        }
        let at = self.content_end();
        let rendered: Vec<String> = list_to_yaml(entries, indent)
            .lines()
            .map(str::to_string)
            .collect();
        self.lines.splice(at..at, rendered);
        true
    }

    /// Section text without trailing blank lines
    pub fn text(&self) -> String {
        let end = self
            .lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map_or(0, |i| i + 1);
        self.lines[..end].join("\n")
    }
}

pub fn split_blocks(text: &str) -> Vec<Block> {
    let mut blocks: Vec<Block> = Vec::new();
    for line in text.lines() {
        match top_level_key(line) {
            Some(key) => blocks.push(Block {
                key: Some(key.to_string()),
                lines: vec![line.to_string()],
            }),
            None => match blocks.last_mut() {
                Some(block) => block.lines.push(line.to_string()),
                None => blocks.push(Block {
                    key: None,
                    lines: vec![line.to_string()],
                }),
            },
        }
    }
    blocks
}

pub fn has_top_level(text: &str, key: &str) -> bool {
    text.lines().any(|l| top_level_key(l) == Some(key))
}

// ─── Lint ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeIssue {
    MissingLvgl,
    MissingPagesMarker,
    Unparseable(String),
    MissingDisplay,
    MissingTouchscreen,
}

impl fmt::Display for RecipeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeIssue::MissingLvgl => write!(f, "recipe has no top-level 'lvgl:' section"),
            RecipeIssue::MissingPagesMarker => write!(
                f,
                "recipe has neither a {} insertion point nor its own 'pages:'",
                PAGES_MARKER
            ),
            RecipeIssue::Unparseable(reason) => write!(f, "recipe is not valid YAML: {}", reason),
            RecipeIssue::MissingDisplay => write!(f, "recipe has no 'display:' section"),
            RecipeIssue::MissingTouchscreen => write!(f, "recipe has no 'touchscreen:' section"),
        }
    }
}

/// Structural checks a recipe should pass before it is offered for compilation.
pub fn lint_recipe(text: &str) -> Vec<RecipeIssue> {
    let text = normalize(text);
    let mut issues = Vec::new();

    if !has_top_level(&text, "lvgl") {
        issues.push(RecipeIssue::MissingLvgl);
    }
    let has_pages = text.lines().any(|l| l.trim_start().starts_with("pages:"));
    if find_marker(&text, PAGES_MARKER).is_none() && !has_pages {
        issues.push(RecipeIssue::MissingPagesMarker);
    }

    let parseable = text.replace(DEVICE_NAME_PLACEHOLDER, "device");
    if let Err(err) = serde_yaml::from_str::<serde_yaml::Value>(&parseable) {
        issues.push(RecipeIssue::Unparseable(err.to_string()));
    }

    if !has_top_level(&text, "display") {
        issues.push(RecipeIssue::MissingDisplay);
    }
    if !has_top_level(&text, "touchscreen") {
        issues.push(RecipeIssue::MissingTouchscreen);
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Mapping;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("\u{feff}  esphome:\r\n  name: x\r\n"), "esphome:\n  name: x\n");
    }

    #[test]
    fn test_replace_marker_indents_payload() {
        let text = "lvgl:\n  #__LVGL_PAGES__\nother: 1\n";
        let out = replace_marker(text, PAGES_MARKER, "pages:\n  - id: a\n").unwrap();
        assert_eq!(out, "lvgl:\n  pages:\n    - id: a\nother: 1\n");
        assert_eq!(replace_marker(text, BINDINGS_MARKER, "x"), None);
    }

    #[test]
    fn test_marker_must_be_whole_line() {
        let text = "a: 1 #__LVGL_PAGES__\n";
        assert_eq!(find_marker(text, PAGES_MARKER), None);
    }

    #[test]
    fn test_split_blocks() {
        let text = "# head\nesphome:\n  name: x\n\nsensor:\n- platform: a\n# note\nlogger:\n";
        let blocks = split_blocks(text);
        let keys: Vec<_> = blocks.iter().map(|b| b.key.as_deref()).collect();
        assert_eq!(keys, vec![None, Some("esphome"), Some("sensor"), Some("logger")]);
        assert_eq!(blocks[2].text(), "sensor:\n- platform: a\n# note");
    }

    #[test]
    fn test_append_entries() {
        let entry = Node::Map(Mapping::new().with("platform", Node::ident("homeassistant")));

        let mut list = Block::new("sensor", "sensor:\n  - platform: uptime\n\n# trailing\n");
        assert!(list.append_entries(&[entry.clone()]));
        assert_eq!(
            list.text(),
            "sensor:\n  - platform: uptime\n  - platform: homeassistant\n\n# trailing"
        );

        let mut empty = Block::new("globals", "globals:\n");
        assert!(empty.append_entries(&[entry.clone()]));
        assert_eq!(empty.text(), "globals:\n  - platform: homeassistant");

        let mut mapping = Block::new("font", "font:\n  file: x\n");
        assert!(!mapping.append_entries(&[entry.clone()]));

        let mut include = Block::new("sensor", "sensor: !include sensors.yaml\n");
        assert!(!include.append_entries(&[entry]));
    }

    #[test]
    fn test_lint_recipe() {
        let good = "esphome:\n  name: __ETD_DEVICE_NAME__\ndisplay:\n  - platform: ili9xxx\ntouchscreen:\n  - platform: xpt2046\nlvgl:\n  #__LVGL_PAGES__\n";
        assert!(lint_recipe(good).is_empty());

        let bad = "esphome:\n  name: x\nlogger:\n  level: [\n";
        let issues = lint_recipe(bad);
        assert!(issues.contains(&RecipeIssue::MissingLvgl));
        assert!(issues.contains(&RecipeIssue::MissingPagesMarker));
        assert!(issues.iter().any(|i| matches!(i, RecipeIssue::Unparseable(_))));
        assert!(issues.contains(&RecipeIssue::MissingDisplay));
        assert!(issues.contains(&RecipeIssue::MissingTouchscreen));
    }
}

//! Document assembly: recipe template + compiled fragments -> one document.
//!
//! Output order is fixed: header comment, `esphome:`, `api:`, `wifi:`,
//! `ota:`, the remaining recipe sections in their own order, then generated
//! ingestion sections (when the recipe has no bindings insertion point),
//! `globals:`, `script:`, `font:` and `image:`.

use log::debug;
use regex::Regex;
use std::sync::OnceLock;

use crate::compiler::{self, Fragments};
use crate::config::CompileOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::node::{list_to_yaml, quote, Mapping, Node};
use crate::project::Device;
use crate::recipe::{
    self, custom_marker, Block, API_KEY_PLACEHOLDER, BINDINGS_MARKER, DEVICE_NAME_PLACEHOLDER,
    PAGES_MARKER, USER_POST_MARKER, USER_PRE_MARKER,
};
use crate::schema::SchemaRegistry;

const DEFAULT_WIFI: &str = "wifi:
  networks:
    - ssid: !secret wifi_ssid
      password: !secret wifi_password
  ap:
    ssid: \"Fallback\"
    password: \"12345678\"";

const DEFAULT_OTA: &str = "ota:
  - platform: esphome";

static NAME_LINE: OnceLock<Regex> = OnceLock::new();
static KEY_LINE: OnceLock<Regex> = OnceLock::new();

/// A compiled document and everything noticed while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub document: String,
    pub diagnostics: Diagnostics,
}

/// Compile `device` against `recipe_text`. Never fails: problems in the
/// project end up in [`Compilation::diagnostics`].
pub fn compile_document(
    device: &Device,
    recipe_text: &str,
    registry: &SchemaRegistry,
    options: &CompileOptions,
) -> Compilation {
    let mut diagnostics = Diagnostics::new();
    let fragments = compiler::compile_fragments(&device.project, registry, options, &mut diagnostics);
    debug!(
        "Compiled {}: {} sensor section(s), {} lock(s)",
        device.node_name(),
        fragments.sensors.len(),
        fragments.globals.len()
    );
    let document = assemble(device, recipe_text, &fragments, options, &mut diagnostics);
    debug!(
        "Assembled {} ({} bytes, {} diagnostic(s))",
        device.node_name(),
        document.len(),
        diagnostics.len()
    );
    Compilation {
        document,
        diagnostics,
    }
}

/// Merge `recipe_text` and the compiled fragments into the final document.
pub fn assemble(
    device: &Device,
    recipe_text: &str,
    fragments: &Fragments,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> String {
    let mut text = recipe::normalize(recipe_text);
    text = inject_user_text(&text, device);

    text = match recipe::replace_marker(&text, PAGES_MARKER, &fragments.lvgl.to_yaml()) {
        Some(replaced) => replaced,
        None => {
            diagnostics.push(Diagnostic::MissingPagesMarker);
            text
        }
    };

    // Ingestion sections already declared by the recipe absorb our entries;
    // the rest go to the bindings insertion point, or after the recipe body.
    let existing: Vec<&(&'static str, Vec<Node>)> = fragments
        .sensors
        .iter()
        .filter(|(name, _)| recipe::has_top_level(&text, name))
        .collect();
    let fresh: Mapping = fragments
        .sensors
        .iter()
        .filter(|(name, _)| !recipe::has_top_level(&text, name))
        .map(|(name, entries)| (name.to_string(), Node::List(entries.clone())))
        .collect();

    let mut trailing: Vec<(&str, &[Node])> = Vec::new();
    match recipe::replace_marker(&text, BINDINGS_MARKER, &fresh.to_yaml()) {
        Some(replaced) => text = replaced,
        None => {
            for (name, entries) in &fragments.sensors {
                if !recipe::has_top_level(&text, name) {
                    trailing.push((*name, entries.as_slice()));
                }
            }
        }
    }

    let mut blocks = recipe::split_blocks(&text);
    for (name, entries) in existing {
        merge_into(&mut blocks, name, entries, diagnostics);
    }
    for (name, entries) in fragments.trailing_sections() {
        if blocks.iter().any(|b| b.is(name)) {
            merge_into(&mut blocks, name, entries, diagnostics);
        } else {
            trailing.push((name, entries));
        }
    }

    let esphome = take_block(&mut blocks, "esphome");
    let api = take_block(&mut blocks, "api");
    let wifi = take_block(&mut blocks, "wifi");
    let ota = take_block(&mut blocks, "ota");

    let mut sections: Vec<String> = Vec::new();
    if options.header_comment {
        sections.push(header(device));
    }
    let preamble: Vec<String> = blocks
        .iter()
        .filter(|b| b.key.is_none())
        .map(Block::text)
        .map(|t| strip_document_markers(&t))
        .filter(|t| !t.trim().is_empty())
        .collect();
    sections.extend(preamble);

    sections.push(esphome_section(esphome, device, &text));
    sections.push(api_section(api, device));
    match wifi {
        Some(block) => sections.push(block.text()),
        None if options.default_network => sections.push(DEFAULT_WIFI.to_string()),
        None => {}
    }
    match ota {
        Some(block) => sections.push(block.text()),
        None if options.default_network => sections.push(DEFAULT_OTA.to_string()),
        None => {}
    }
    for block in blocks.iter().filter(|b| b.key.is_some()) {
        sections.push(block.text());
    }
    for (name, entries) in trailing {
        sections.push(format!("{}:\n{}", name, list_to_yaml(entries, 2).trim_end()));
    }

    let mut out = sections
        .into_iter()
        .map(|s| s.trim_end().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    out = substitute_placeholders(&out, device);
    out.push('\n');
    out
}

fn header(device: &Device) -> String {
    format!(
        "# Generated by {} v{}\n# device_id: {}\n# slug: {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        device.device_id,
        device.slug
    )
}

/// Pre/post free text and project-defined markers. Unused standard markers are removed.
fn inject_user_text(text: &str, device: &Device) -> String {
    let advanced = &device.project.advanced;
    let mut text = text.to_string();

    let pre = advanced.yaml_pre.trim_end();
    if pre.is_empty() {
        text = recipe::remove_marker(&text, USER_PRE_MARKER);
    } else {
        text = match recipe::replace_marker(&text, USER_PRE_MARKER, pre) {
            Some(replaced) => replaced,
            None => format!("{}\n\n{}", pre, text),
        };
    }

    let post = advanced.yaml_post.trim_end();
    if post.is_empty() {
        text = recipe::remove_marker(&text, USER_POST_MARKER);
    } else {
        text = match recipe::replace_marker(&text, USER_POST_MARKER, post) {
            Some(replaced) => replaced,
            None => format!("{}\n\n{}\n", text.trim_end(), post),
        };
    }

    for (name, payload) in &advanced.markers {
        if name.trim().is_empty() {
            continue;
        }
        let marker = custom_marker(name.trim());
        if let Some(replaced) = recipe::replace_marker(&text, &marker, payload.trim_end()) {
            text = replaced;
        }
    }
    text
}

fn merge_into(blocks: &mut [Block], name: &str, entries: &[Node], diagnostics: &mut Diagnostics) {
    let Some(block) = blocks.iter_mut().find(|b| b.is(name)) else {
        return;
    };
    if !block.append_entries(entries) {
        diagnostics.push(Diagnostic::UnmergeableSection {
            section: name.to_string(),
        });
    }
}

/// Remove the first section with `key`; later duplicates stay where they are.
fn take_block(blocks: &mut Vec<Block>, key: &str) -> Option<Block> {
    let pos = blocks.iter().position(|b| b.is(key))?;
    Some(blocks.remove(pos))
}

fn strip_document_markers(text: &str) -> String {
    text.lines()
        .filter(|l| l.trim() != "---" && l.trim() != "...")
        .collect::<Vec<_>>()
        .join("\n")
}

/// `esphome:` with the device name resolved: a verbatim value is kept, a
/// placeholder is left for substitution, otherwise the name is injected.
fn esphome_section(block: Option<Block>, device: &Device, recipe_text: &str) -> String {
    let name = device.node_name();
    let quoted = quote(name);
    let Some(mut block) = block else {
        return format!("esphome:\n  name: {}", quoted);
    };
    if let Some(first) = block.lines.first_mut() {
        *first = "esphome:".to_string();
    }

    let re = NAME_LINE.get_or_init(|| Regex::new(r"^(\s+)name\s*:\s*(.*?)\s*$").unwrap());
    let name_line = block
        .lines
        .iter()
        .position(|l| re.is_match(l) && indent_of(l) == child_indent(&block));
    match name_line {
        Some(i) => {
            let value = re
                .captures(&block.lines[i])
                .and_then(|c| c.get(2))
                .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '\''))
                .unwrap_or("");
            let verbatim = value == name;
            let placeholder = value.contains(DEVICE_NAME_PLACEHOLDER);
            if !verbatim && !placeholder {
                let pad = " ".repeat(indent_of(&block.lines[i]));
                block.lines[i] = format!("{}name: {}", pad, quoted);
            }
        }
        None if recipe_text.contains(DEVICE_NAME_PLACEHOLDER) => {
            // The placeholder lives elsewhere (e.g. substitutions); it names the device.
        }
        None => {
            let pad = " ".repeat(child_indent(&block));
            block.lines.insert(1, format!("{}name: {}", pad, quoted));
        }
    }
    block.text()
}

/// `api:` with the encryption key resolved the same way as the device name.
/// Without a key the recipe's section is kept (minus any key placeholder).
fn api_section(block: Option<Block>, device: &Device) -> String {
    let Some(key) = device.api_key() else {
        return match block {
            Some(block) => drop_key_placeholder(block).text(),
            None => "api:".to_string(),
        };
    };
    let quoted = quote(key);
    let Some(mut block) = block else {
        return format!("api:\n  encryption:\n    key: {}", quoted);
    };

    let text = block.text();
    if text.contains(key) || text.contains(API_KEY_PLACEHOLDER) {
        return text;
    }

    let re = KEY_LINE.get_or_init(|| Regex::new(r"^(\s+)key\s*:").unwrap());
    let encryption = block
        .lines
        .iter()
        .position(|l| l.trim_start().starts_with("encryption:"));
    match encryption {
        Some(e) => {
            let enc_indent = indent_of(&block.lines[e]);
            let key_line = block.lines[e + 1..]
                .iter()
                .take_while(|l| l.trim().is_empty() || indent_of(l) > enc_indent)
                .position(|l| re.is_match(l))
                .map(|p| p + e + 1);
            match key_line {
                Some(k) => {
                    let pad = " ".repeat(indent_of(&block.lines[k]));
                    block.lines[k] = format!("{}key: {}", pad, quoted);
                }
                None => {
                    let pad = " ".repeat(enc_indent + 2);
                    block.lines.insert(e + 1, format!("{}key: {}", pad, quoted));
                }
            }
        }
        None => {
            let pad = " ".repeat(child_indent(&block));
            block.lines.insert(1, format!("{}encryption:", pad));
            block.lines.insert(2, format!("{}  key: {}", pad, quoted));
        }
    }
    if let Some(first) = block.lines.first_mut() {
        *first = "api:".to_string();
    }
    block.text()
}

/// Remove a key placeholder line (and an `encryption:` left empty by it).
fn drop_key_placeholder(mut block: Block) -> Block {
    let Some(i) = block
        .lines
        .iter()
        .position(|l| l.contains(API_KEY_PLACEHOLDER))
    else {
        return block;
    };
    block.lines.remove(i);
    if i > 0 && block.lines[i - 1].trim() == "encryption:" {
        let parent = indent_of(&block.lines[i - 1]);
        let has_children = block.lines[i..]
            .iter()
            .find(|l| !l.trim().is_empty())
            .is_some_and(|l| indent_of(l) > parent);
        if !has_children {
            block.lines.remove(i - 1);
        }
    }
    block
}

fn substitute_placeholders(text: &str, device: &Device) -> String {
    let mut out = text.replace(DEVICE_NAME_PLACEHOLDER, &quote(device.node_name()));
    if let Some(key) = device.api_key() {
        out = out.replace(API_KEY_PLACEHOLDER, &quote(key));
    }
    out
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Indentation of the first nested line, or 2 for an empty section
fn child_indent(block: &Block) -> usize {
    block
        .lines
        .iter()
        .skip(1)
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .map_or(2, |l| indent_of(l))
}

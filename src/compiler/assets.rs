use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::CompileOptions;
use crate::ids::safe_id;
use crate::node::{Mapping, Node};
use crate::project::{Project, Widget};

const ASSET_PREFIX: &str = "asset:";

/// Keys whose `asset:` values name an image rather than a font.
const IMAGE_KEYS: [&str; 2] = ["src", "bg_image_src"];

/// Image and font files referenced from widgets as `asset:<file>` or
/// `asset:<file>:<size>`, with the ids the references are rewritten to.
#[derive(Debug, Default)]
pub struct AssetTable {
    /// id -> file name
    images: BTreeMap<String, String>,
    /// (file name, size) -> id
    fonts: BTreeMap<(String, u32), String>,
    /// reference text -> id
    refs: BTreeMap<String, String>,
}

impl AssetTable {
    pub fn collect(project: &Project) -> Self {
        let mut table = AssetTable::default();
        let mut font_refs = Vec::new();

        for (_, widget) in project.widgets() {
            for (key, value) in asset_values(widget) {
                let Some(rest) = value.strip_prefix(ASSET_PREFIX) else {
                    continue;
                };
                if IMAGE_KEYS.contains(&key) {
                    let file = rest.trim();
                    if !file.is_empty() {
                        let id = format!("asset_{}", safe_id(file));
                        table.refs.insert(value.to_string(), id.clone());
                        table.images.insert(id, file.to_string());
                    }
                } else if let Some((file, size)) = parse_font(rest) {
                    table.fonts.insert((file.clone(), size), String::new());
                    font_refs.push((value.to_string(), file, size));
                }
            }
        }

        // Ids are numbered over the sorted (file, size) set so they do not
        // depend on widget order.
        for (idx, ((file, size), id)) in table.fonts.iter_mut().enumerate() {
            let stem = Path::new(file.as_str())
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.clone());
            *id = format!("font_{}_{}_{}", safe_id(&stem), size, idx + 1);
        }
        for (reference, file, size) in font_refs {
            if let Some(id) = table.fonts.get(&(file, size)) {
                table.refs.insert(reference, id.clone());
            }
        }
        table
    }

    /// Generated id for an `asset:` reference, if it was collected
    pub fn rewrite(&self, value: &str) -> Option<&str> {
        self.refs.get(value.trim()).map(String::as_str)
    }

    pub fn image_nodes(&self, options: &CompileOptions) -> Vec<Node> {
        self.images
            .iter()
            .map(|(id, file)| {
                Node::Map(
                    Mapping::new()
                        .with("file", Node::str(options.asset_path(file)))
                        .with("id", Node::ident(id.as_str())),
                )
            })
            .collect()
    }

    pub fn font_nodes(&self, options: &CompileOptions) -> Vec<Node> {
        self.fonts
            .iter()
            .map(|((file, size), id)| {
                Node::Map(
                    Mapping::new()
                        .with("file", Node::str(options.asset_path(file)))
                        .with("id", Node::ident(id.as_str()))
                        .with("size", Node::Int(i64::from(*size))),
                )
            })
            .collect()
    }
}

/// `<file>:<size>` with a positive size
fn parse_font(rest: &str) -> Option<(String, u32)> {
    let (file, size) = rest.rsplit_once(':')?;
    let file = file.trim();
    let size: u32 = size.trim().parse().ok()?;
    (!file.is_empty() && size > 0).then(|| (file.to_string(), size))
}

/// Every trimmed string value of a widget's props, style and part sections
fn asset_values(widget: &Widget) -> Vec<(&str, &str)> {
    let mut out = Vec::new();
    let sections = [&widget.props, &widget.style];
    for section in sections {
        for (key, value) in section {
            if let Value::String(s) = value {
                out.push((key.as_str(), s.trim()));
            }
        }
    }
    for part in widget.extra.values() {
        if let Value::Object(obj) = part {
            for (key, value) in obj {
                if let Value::String(s) = value {
                    out.push((key.as_str(), s.trim()));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Page;
    use serde_json::json;

    fn widget(kind: &str, props: Value) -> Widget {
        Widget {
            id: "w".to_string(),
            kind: kind.to_string(),
            props: serde_json::from_value(props).unwrap(),
            ..Default::default()
        }
    }

    fn project(widgets: Vec<Widget>) -> Project {
        Project {
            pages: vec![Page {
                page_id: "p".to_string(),
                widgets,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_images_and_fonts_collected() {
        let table = AssetTable::collect(&project(vec![
            widget("image", json!({"src": "asset:logo.png"})),
            widget("label", json!({"font": "asset:Roboto-Bold.ttf:24"})),
            widget("label", json!({"font": "asset:Inter.ttf:16"})),
            widget("label", json!({"font": "asset:Inter.ttf:16"})),
        ]));
        assert_eq!(table.rewrite("asset:logo.png"), Some("asset_logo_png"));
        assert_eq!(table.rewrite("asset:Inter.ttf:16"), Some("font_Inter_16_1"));
        assert_eq!(table.rewrite("asset:Roboto-Bold.ttf:24"), Some("font_Roboto_Bold_24_2"));

        let opts = CompileOptions::default();
        let fonts = table.font_nodes(&opts);
        assert_eq!(fonts.len(), 2);
        let first = fonts[0].as_map().unwrap();
        assert_eq!(
            first.get("file"),
            Some(&Node::str("/config/esphome_touch_designer_assets/Inter.ttf"))
        );
        assert_eq!(first.get("size"), Some(&Node::Int(16)));
    }

    #[test]
    fn test_malformed_font_ignored() {
        let table = AssetTable::collect(&project(vec![
            widget("label", json!({"font": "asset:Inter.ttf"})),
            widget("label", json!({"font": "asset:Inter.ttf:0"})),
            widget("label", json!({"font": "montserrat_14"})),
        ]));
        assert!(table.font_nodes(&CompileOptions::default()).is_empty());
        assert_eq!(table.rewrite("asset:Inter.ttf"), None);
    }
}

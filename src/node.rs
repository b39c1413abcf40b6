//! Ordered YAML output tree.
//!
//! Every compile stage builds [`Node`] values; the text is produced in one
//! place by [`Mapping::to_yaml`]. Indentation, explicit empty collections,
//! block scalars and `!lambda` tags are all decided here.

use serde_json::Value;

const INDENT: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Quoted string scalar (JSON-style escaping, valid YAML double quotes)
    Str(String),
    /// Plain scalar written as-is: ids, enum words, units like `150ms`
    Ident(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// C++ expression tagged `!lambda`
    Lambda(String),
    /// Scalar text written verbatim, e.g. `!secret wifi_ssid`
    Raw(String),
    /// Multi-line text written as a `|-` block
    Text(String),
    /// Hand-written YAML re-indented under its key
    Fragment(String),
    Map(Mapping),
    List(Vec<Node>),
}

impl Node {
    pub fn str(value: impl Into<String>) -> Self {
        Node::Str(value.into())
    }

    pub fn ident(value: impl Into<String>) -> Self {
        Node::Ident(value.into())
    }

    pub fn lambda(code: impl Into<String>) -> Self {
        Node::Lambda(code.into())
    }

    /// Convert an editor value. `null` and empty strings yield `None` so the
    /// key is omitted instead of written as an explicit empty value.
    pub fn from_json(value: &Value) -> Option<Node> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Node::Bool(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Node::Int(i),
                None => Node::Float(n.as_f64().unwrap_or_default()),
            }),
            Value::String(s) => Node::from_text(s),
            Value::Array(items) => Some(Node::List(
                items.iter().filter_map(Node::from_json).collect(),
            )),
            Value::Object(obj) => {
                let mut map = Mapping::new();
                for (k, v) in obj {
                    if let Some(node) = Node::from_json(v) {
                        map.insert(k.as_str(), node);
                    }
                }
                Some(Node::Map(map))
            }
        }
    }

    /// String value from the editor: `!lambda` prefixes become expressions,
    /// multi-line text becomes a block.
    pub fn from_text(s: &str) -> Option<Node> {
        if s.is_empty() {
            return None;
        }
        if let Some(code) = s.trim().strip_prefix("!lambda") {
            return Some(Node::Lambda(unquote_lambda(code.trim())));
        }
        if s.contains('\n') {
            return Some(Node::Text(s.to_string()));
        }
        Some(Node::Str(s.to_string()))
    }

    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Inline rendering for scalar nodes; `None` for nodes needing their own lines.
    fn inline(&self) -> Option<String> {
        match self {
            Node::Str(s) if !s.contains('\n') => Some(quote(s)),
            Node::Ident(s) | Node::Raw(s) => Some(s.clone()),
            Node::Int(i) => Some(i.to_string()),
            Node::Float(f) => Some(format_float(*f)),
            Node::Bool(b) => Some(b.to_string()),
            Node::Lambda(code) if lambda_is_inline(code) => Some(format!("!lambda {}", code)),
            Node::Map(m) if m.is_empty() => Some("{}".to_string()),
            Node::List(l) if l.is_empty() => Some("[]".to_string()),
            _ => None,
        }
    }
}

/// Insertion-ordered mapping; inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Node) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`Mapping::insert`]
    pub fn with(mut self, key: impl Into<String>, value: Node) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn to_yaml(&self) -> String {
        self.to_yaml_at(0)
    }

    /// Render with every line prefixed by `indent` spaces
    pub fn to_yaml_at(&self, indent: usize) -> String {
        let mut out = String::new();
        write_map(&mut out, self, indent);
        out
    }
}

impl FromIterator<(String, Node)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        let mut map = Mapping::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Render a block list at `indent` (used for merging entries into recipe sections)
pub fn list_to_yaml(items: &[Node], indent: usize) -> String {
    let mut out = String::new();
    write_list(&mut out, items, indent);
    out
}

// ─── Serialization ──────────────────────────────────────────────────────────

fn write_map(out: &mut String, map: &Mapping, indent: usize) {
    for (key, value) in &map.entries {
        write_entry(out, key, value, indent);
    }
}

fn write_entry(out: &mut String, key: &str, value: &Node, indent: usize) {
    let pad = " ".repeat(indent);
    if let Some(scalar) = value.inline() {
        out.push_str(&format!("{}{}: {}\n", pad, key, scalar));
        return;
    }
    match value {
        Node::Map(m) => {
            out.push_str(&format!("{}{}:\n", pad, key));
            write_map(out, m, indent + INDENT);
        }
        Node::List(items) => {
            out.push_str(&format!("{}{}:\n", pad, key));
            write_list(out, items, indent + INDENT);
        }
        Node::Fragment(text) => {
            out.push_str(&format!("{}{}:\n", pad, key));
            out.push_str(&reindent(text, indent + INDENT));
        }
        Node::Lambda(code) => {
            out.push_str(&format!("{}{}: !lambda {}\n", pad, key, block_header(code)));
            write_block_lines(out, code, indent + INDENT);
        }
        Node::Str(text) | Node::Text(text) => {
            out.push_str(&format!("{}{}: {}\n", pad, key, block_header(text)));
            write_block_lines(out, text, indent + INDENT);
        }
        _ => {}
    }
}

fn write_list(out: &mut String, items: &[Node], indent: usize) {
    let pad = " ".repeat(indent);
    for item in items {
        if let Some(scalar) = item.inline() {
            out.push_str(&format!("{}- {}\n", pad, scalar));
            continue;
        }
        match item {
            Node::Map(m) => {
                let body = m.to_yaml_at(indent + INDENT);
                out.push_str(&pad);
                out.push_str("- ");
                out.push_str(&body[indent + INDENT..]);
            }
            Node::List(inner) => {
                out.push_str(&format!("{}-\n", pad));
                write_list(out, inner, indent + INDENT);
            }
            Node::Fragment(text) => out.push_str(&reindent(text, indent)),
            Node::Lambda(code) => {
                out.push_str(&format!("{}- !lambda {}\n", pad, block_header(code)));
                write_block_lines(out, code, indent + INDENT);
            }
            Node::Str(text) | Node::Text(text) => {
                out.push_str(&format!("{}- {}\n", pad, block_header(text)));
                write_block_lines(out, text, indent + INDENT);
            }
            _ => {}
        }
    }
}

/// Block scalars take their indentation from the first non-blank line, so an
/// indented first line needs an explicit indicator.
fn block_header(text: &str) -> &'static str {
    let first = text.lines().find(|l| !l.trim().is_empty());
    if first.is_some_and(|l| l.starts_with(|c: char| c.is_whitespace())) {
        "|2-"
    } else {
        "|-"
    }
}

fn write_block_lines(out: &mut String, text: &str, indent: usize) {
    let pad = " ".repeat(indent);
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
        } else {
            out.push_str(&pad);
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }
}

/// Strip the common leading indentation of `text` and re-indent it to `indent`.
/// Blank lines are dropped. Each leading whitespace character counts as one
/// column and is rewritten as a space.
pub fn reindent(text: &str, indent: usize) -> String {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| (leading_width(l), l.trim()))
        .collect();
    let common = lines.iter().map(|(width, _)| *width).min().unwrap_or(0);
    let mut out = String::new();
    for (width, body) in lines {
        out.push_str(&" ".repeat(indent + width - common));
        out.push_str(body);
        out.push('\n');
    }
    out
}

fn leading_width(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// JSON string quoting, which is also a valid YAML double-quoted scalar
pub fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// Shortest float text that still reads back as a float (`1.0`, not `1`)
pub fn format_float(f: f64) -> String {
    if f.is_finite() {
        format!("{:?}", f)
    } else {
        "0.0".to_string()
    }
}

fn lambda_is_inline(code: &str) -> bool {
    !code.contains('\n')
        && !code.contains(": ")
        && !code.contains(" #")
        && !code.ends_with(':')
        && !code.starts_with(['\'', '"', '|', '>', '[', '{', '&', '*', '!', '%', '@', '`', '-', '?', '#'])
}

/// `!lambda 'return x;'` is stored by some editors with its YAML quotes.
fn unquote_lambda(code: &str) -> String {
    let quoted = |q: char| code.len() >= 2 && code.starts_with(q) && code.ends_with(q);
    if quoted('\'') {
        code[1..code.len() - 1].replace("''", "'")
    } else if quoted('"') {
        serde_json::from_str::<String>(code).unwrap_or_else(|_| code[1..code.len() - 1].to_string())
    } else {
        code.to_string()
    }
}

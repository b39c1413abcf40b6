use regex::Regex;
use std::sync::OnceLock;

static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
static SLUG_RUNS: OnceLock<Regex> = OnceLock::new();
static ENTITY_ID: OnceLock<Regex> = OnceLock::new();

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn safe_id(raw: &str) -> String {
    let re = UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());
    re.replace_all(raw, "_").into_owned()
}

/// Lowercase slug of an entity reference, with runs of separators collapsed.
pub fn entity_slug(entity_id: &str) -> String {
    let re = SLUG_RUNS.get_or_init(|| Regex::new(r"[^a-z0-9_]+").unwrap());
    let lowered = entity_id.trim().to_lowercase();
    let replaced = re.replace_all(&lowered, "_");
    let mut slug = String::with_capacity(replaced.len());
    for ch in replaced.chars() {
        if ch == '_' && slug.ends_with('_') {
            continue;
        }
        slug.push(ch);
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "entity".to_string()
    } else {
        slug.to_string()
    }
}

/// `domain.object_id`, lowercase, as the home automation host defines it.
pub fn is_valid_entity_id(entity_id: &str) -> bool {
    let re = ENTITY_ID.get_or_init(|| Regex::new(r"^[a-z0-9_]+\.[a-z0-9_]+$").unwrap());
    re.is_match(entity_id)
}

/// Maps editor identifiers to the identifiers written into the document.
///
/// One value collides with the firmware entry point and is swapped for a
/// fixed alternative. Only the emitted text changes; the project is untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPolicy {
    reserved: String,
    replacement: String,
}

impl IdPolicy {
    pub fn new(reserved: &str, replacement: &str) -> Self {
        Self {
            reserved: reserved.to_string(),
            replacement: replacement.to_string(),
        }
    }

    pub fn output_id(&self, raw: &str) -> String {
        let id = safe_id(raw.trim());
        if id == self.reserved {
            self.replacement.clone()
        } else if id.is_empty() {
            "w".to_string()
        } else {
            id
        }
    }
}

impl Default for IdPolicy {
    fn default() -> Self {
        IdPolicy::new("main", "main_page")
    }
}

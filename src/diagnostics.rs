use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A non-fatal finding attached to a compilation result.
///
/// The document is still produced; the caller decides whether any of these
/// block a publish.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Diagnostic {
    #[error("Widget '{widget}' has unknown kind '{kind}'; emitted as a plain container")]
    UnknownWidgetKind { widget: String, kind: String },

    #[error("Widget id '{widget}' is declared more than once")]
    DuplicateWidgetId { widget: String },

    #[error("Page id '{page}' is declared more than once")]
    DuplicatePageId { page: String },

    #[error("Widget '{widget}' is emitted as '{id}', which a page already uses")]
    WidgetIdTakenByPage { widget: String, id: String },

    #[error("Widget '{widget}' references missing parent '{parent}'")]
    DanglingParent { widget: String, parent: String },

    #[error("Widget '{widget}' references parent '{parent}' on another page")]
    CrossPageParent { widget: String, parent: String },

    #[error("Widget '{widget}' is part of a parent cycle; placed at page root")]
    ParentCycle { widget: String },

    #[error("Invalid entity reference '{entity}' in {context}")]
    InvalidEntityReference { entity: String, context: String },

    #[error("Bindings {first} and {second} derive the same id '{id}'; the later one was dropped")]
    DerivedIdCollision {
        id: String,
        first: String,
        second: String,
    },

    #[error("Link #{index} targets missing widget '{widget}'")]
    DanglingLinkTarget { index: usize, widget: String },

    #[error("Link #{index} reads '{source_ref}' but no binding declares it")]
    UnbackedLink { index: usize, source_ref: String },

    #[error("Link #{index} uses unknown action '{action}'")]
    UnknownLinkAction { index: usize, action: String },

    #[error("Link #{index}: action '{action}' is not supported by '{kind}' widget '{widget}'")]
    UnsupportedLinkAction {
        index: usize,
        action: String,
        kind: String,
        widget: String,
    },

    #[error("Link #{index} has an empty visibility predicate")]
    EmptyPredicate { index: usize },

    #[error("Link #{index} hides '{widget}' but declares no predicate")]
    MissingPredicate { index: usize, widget: String },

    #[error("Links #{first} and #{second} both drive '{action}' on '{widget}'; the later one wins")]
    ConflictingLinks {
        first: usize,
        second: usize,
        widget: String,
        action: String,
    },

    #[error("Action binding #{index} targets missing widget '{widget}'")]
    DanglingActionWidget { index: usize, widget: String },

    #[error("Action binding #{index}: '{kind}' widget '{widget}' does not emit '{event}'")]
    UnknownEvent {
        index: usize,
        widget: String,
        kind: String,
        event: String,
    },

    #[error("Action binding #{index} on '{widget}' has no override and an incomplete call")]
    IncompleteCall { index: usize, widget: String },

    #[error("Action on '{widget}' moved from '{from}' to '{to}' to limit outbound calls")]
    CommitEventSubstituted {
        widget: String,
        from: String,
        to: String,
    },

    #[error("Action binding #{shadowed} on '{widget}.{event}' is replaced by #{winner}")]
    ShadowedAction {
        widget: String,
        event: String,
        shadowed: usize,
        winner: usize,
    },

    #[error("Widget '{widget}' references unknown style definition '{style}'")]
    UnknownStyleDefinition { widget: String, style: String },

    #[error("Recipe has no pages insertion point; page content was not inserted")]
    MissingPagesMarker,

    #[error("Recipe section '{section}' cannot absorb generated entries; they were dropped")]
    UnmergeableSection { section: String },

    #[error("Script '{script}' is invalid: {reason}")]
    InvalidScript { script: String, reason: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::CommitEventSubstituted { .. } => Severity::Info,
            _ => Severity::Warning,
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity() == Severity::Warning
    }
}

/// Ordered diagnostic list shared across compile stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity() {
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Info => log::info!("{}", diagnostic),
        }
        self.items.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.is_warning())
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings().next().is_some()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

use thiserror::Error;

pub type DesignerResult<T> = Result<T, DesignerError>;

#[derive(Error, Debug, Clone)]
pub enum DesignerError {
    #[error("Schema registry error: {0}")]
    SchemaError(String),

    #[error("Schema for '{kind}' is inconsistent: {reason}")]
    InconsistentSchema { kind: String, reason: String },

    #[error("Missing schema entry for widget kind '{kind}'")]
    MissingSchema { kind: String },

    #[error("Project parse error: {0}")]
    ProjectError(String),

    #[error("YAML error: {0}")]
    YamlError(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("I/O error on '{path}': {message}")]
    IoError { path: String, message: String },

    #[error("Export aborted: {0}")]
    ExportAborted(#[from] ExportAbort),
}

impl From<serde_yaml::Error> for DesignerError {
    fn from(err: serde_yaml::Error) -> Self {
        DesignerError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for DesignerError {
    fn from(err: serde_json::Error) -> Self {
        DesignerError::ProjectError(err.to_string())
    }
}

impl DesignerError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        DesignerError::IoError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reasons the safe-merge exporter refuses to touch a target file.
///
/// All of these are final: the file is left exactly as it was and retrying
/// without user intervention cannot succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportAbort {
    #[error("Target contains duplicated markers (begin={begin}, end={end})")]
    DuplicatedMarkers { begin: usize, end: usize },

    #[error("Target contains malformed markers: {reason}")]
    MalformedMarkers { reason: String },

    #[error("END marker appears before BEGIN marker")]
    InvertedMarkers,

    #[error("Target has no managed region to update")]
    MissingMarkers,

    #[error("Generated document contains a managed-region marker line")]
    GeneratedContainsMarkers,

    #[error("Target changed since preview (expected {expected}, found {actual})")]
    ExternallyModified { expected: String, actual: String },
}

impl ExportAbort {
    /// Stable machine-readable reason code, as reported to the host layer.
    pub fn code(&self) -> &'static str {
        match self {
            ExportAbort::DuplicatedMarkers { .. } => "marker_duplicated",
            ExportAbort::MalformedMarkers { .. } => "marker_malformed",
            ExportAbort::InvertedMarkers => "marker_order_invalid",
            ExportAbort::MissingMarkers => "marker_missing",
            ExportAbort::GeneratedContainsMarkers => "generated_block_has_markers",
            ExportAbort::ExternallyModified { .. } => "externally_modified",
        }
    }
}

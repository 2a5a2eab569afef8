//! Error types for pipewright.
//!
//! Every validation failure is detected before a document is handed to the
//! transport collaborator. Variants carry the offending names so callers
//! (CLIs, tool-dispatch layers) can point the author at the exact defect.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for pipewright operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of a copy-like activity a dataset stub describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Source,
    Sink,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Sink => write!(f, "sink"),
        }
    }
}

/// Kind of symbol an expression can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Parameter,
    Variable,
    Activity,
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Parameter => write!(f, "parameter"),
            SymbolKind::Variable => write!(f, "variable"),
            SymbolKind::Activity => write!(f, "activity"),
        }
    }
}

/// pipewright error types.
///
/// Each variant maps to a stable code (see [`Error::code`]).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Activity '{activity}' has unknown type '{activity_type}'")]
    UnknownActivityType {
        activity: String,
        activity_type: String,
    },

    #[error("Activity '{activity}' is missing required property '{key}'")]
    MissingRequiredProperty { activity: String, key: String },

    #[error("Activity '{activity}' property '{key}' expected {expected}, got {found}")]
    PropertyTypeMismatch {
        activity: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("Unsupported connector '{connector}'")]
    UnsupportedConnector { connector: String },

    #[error("Connector '{connector}' {role} is missing required keys: {}", .missing.join(", "))]
    IncompleteConnectorConfig {
        connector: String,
        role: Role,
        missing: Vec<String>,
    },

    #[error("Activity '{activity}' references unknown {kind} '{symbol}'")]
    DanglingReference {
        activity: String,
        kind: SymbolKind,
        symbol: String,
    },

    #[error("Activity '{activity}' references output of '{referenced}' without depending on it")]
    UnorderedReference { activity: String, referenced: String },

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Activity '{activity}' depends on non-existent activity '{missing}'")]
    DanglingDependency { activity: String, missing: String },

    #[error("Metadata set has no active rows")]
    EmptyMetadataSet,

    #[error("Duplicate {namespace} name: {name}")]
    DuplicateName { namespace: String, name: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Default value of '{name}' expected {declared}, got {found}")]
    InvalidDefaultValue {
        name: String,
        declared: String,
        found: String,
    },

    #[error("Activity '{activity}' has an invalid dependency: {reason}")]
    InvalidDependency { activity: String, reason: String },

    #[error("Metadata row '{source_id}' is invalid: {reason}")]
    InvalidMetadataRow { source_id: String, reason: String },

    #[error("Invalid expansion template: {0}")]
    InvalidTemplate(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownActivityType { .. } => "UNKNOWN_ACTIVITY_TYPE",
            Error::MissingRequiredProperty { .. } => "MISSING_REQUIRED_PROPERTY",
            Error::PropertyTypeMismatch { .. } => "PROPERTY_TYPE_MISMATCH",
            Error::UnsupportedConnector { .. } => "UNSUPPORTED_CONNECTOR",
            Error::IncompleteConnectorConfig { .. } => "INCOMPLETE_CONNECTOR_CONFIG",
            Error::DanglingReference { .. } => "DANGLING_REFERENCE",
            Error::UnorderedReference { .. } => "UNORDERED_REFERENCE",
            Error::CyclicDependency { .. } => "CYCLIC_DEPENDENCY",
            Error::DanglingDependency { .. } => "DANGLING_DEPENDENCY",
            Error::EmptyMetadataSet => "EMPTY_METADATA_SET",
            Error::DuplicateName { .. } => "DUPLICATE_NAME",
            Error::InvalidName { .. } => "INVALID_NAME",
            Error::InvalidDefaultValue { .. } => "INVALID_DEFAULT_VALUE",
            Error::InvalidDependency { .. } => "INVALID_DEPENDENCY",
            Error::InvalidMetadataRow { .. } => "INVALID_METADATA_ROW",
            Error::InvalidTemplate(_) => "INVALID_TEMPLATE",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this error was raised by one of the validation stages
    /// (as opposed to I/O or input decoding).
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Error::Parse(_) | Error::Config(_) | Error::Yaml(_) | Error::Json(_) | Error::Io(_)
        )
    }

    /// Convert to a JSON envelope for tool-dispatch callers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

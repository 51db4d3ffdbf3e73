//! Error types for zenc.
//!
//! Every failure surfaced to a caller of the CLI maps onto one [`Error`]
//! variant with:
//! - A stable numeric code for machine parsing
//! - A category for grouping
//! - A recoverability hint
//! - A remediation string for humans
//!
//! # Agent-Facing Output
//!
//! Errors serialize to structured JSON:
//! ```json
//! {
//!   "code": 40,
//!   "category": "query",
//!   "message": "property query failed for tank/data: cannot get `keystatus` property: ...",
//!   "recoverable": true,
//!   "suggested_action": "retry",
//!   "context": { "dataset": "tank/data" }
//! }
//! ```

use crate::dataset::DatasetNameError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for zenc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file and environment errors.
    Config,
    /// Malformed input such as dataset names.
    Validation,
    /// The zfs binary could not be run or did not terminate normally.
    Execution,
    /// Property query errors.
    Query,
    /// The zfs tool answered outside its documented contract.
    Integrity,
    /// Transfer preflight refusals.
    Transfer,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Execution => write!(f, "execution"),
            ErrorCategory::Query => write!(f, "query"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Transfer => write!(f, "transfer"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Suggested actions for automation reacting to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with a longer timeout).
    Retry,
    /// Fix the configuration and retry.
    FixConfig,
    /// Fix the input (dataset name) and retry.
    FixInput,
    /// Load the dataset key, then retry.
    LoadKey,
    /// Use a raw send instead of a live send.
    UseRawSend,
    /// Report a bug; the tool or this program violated an invariant.
    Report,
    /// Manual intervention required.
    ManualIntervention,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::FixConfig => write!(f, "fix_config"),
            SuggestedAction::FixInput => write!(f, "fix_input"),
            SuggestedAction::LoadKey => write!(f, "load_key"),
            SuggestedAction::UseRawSend => write!(f, "use_raw_send"),
            SuggestedAction::Report => write!(f, "report"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
        }
    }
}

/// Unified error type for zenc.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Validation errors (20-29)
    #[error("invalid dataset name {dataset:?}: {source}")]
    InvalidDataset {
        dataset: String,
        #[source]
        source: DatasetNameError,
    },

    // Execution errors (30-39)
    #[error("zfs execution failed: {0}")]
    Execution(String),

    #[error("operation timed out or was cancelled: {0}")]
    Timeout(String),

    // Query errors (40-49)
    #[error("property query failed for {dataset}: {message}")]
    Query { dataset: String, message: String },

    #[error("dataset does not exist: {dataset}")]
    DatasetNotFound { dataset: String },

    // Integrity errors (50-59)
    #[error("zfs returned inconsistent data for {dataset}: {message}")]
    DataIntegrity { dataset: String, message: String },

    #[error("zfs contract violation for {dataset}: {message}")]
    ContractViolation { dataset: String, message: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Transfer errors (70-79)
    #[error("live send from {dataset} refused: encryption key is not loaded")]
    KeyNotLoaded { dataset: String },
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Validation errors
    /// - 30-39: Execution errors
    /// - 40-49: Query errors
    /// - 50-59: Integrity errors
    /// - 60-69: I/O errors
    /// - 70-79: Transfer errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidDataset { .. } => 20,
            Error::Execution(_) => 30,
            Error::Timeout(_) => 31,
            Error::Query { .. } => 40,
            Error::DatasetNotFound { .. } => 41,
            Error::DataIntegrity { .. } => 50,
            Error::ContractViolation { .. } => 51,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::KeyNotLoaded { .. } => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,
            Error::InvalidDataset { .. } => ErrorCategory::Validation,
            Error::Execution(_) | Error::Timeout(_) => ErrorCategory::Execution,
            Error::Query { .. } | Error::DatasetNotFound { .. } => ErrorCategory::Query,
            Error::DataIntegrity { .. } | Error::ContractViolation { .. } => {
                ErrorCategory::Integrity
            }
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::KeyNotLoaded { .. } => ErrorCategory::Transfer,
        }
    }

    /// Returns whether this error is potentially recoverable.
    ///
    /// Contract violations are not: the tool reported a state this program
    /// has no sane reaction to.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => true,
            Error::InvalidDataset { .. } => true,
            Error::Execution(_) => true,
            Error::Timeout(_) => true,
            Error::Query { .. } => true,
            Error::DatasetNotFound { .. } => false,
            Error::DataIntegrity { .. } => false,
            Error::ContractViolation { .. } => false,
            Error::Io(_) => true,
            Error::Json(_) => true,
            Error::KeyNotLoaded { .. } => true,
        }
    }

    /// Whether the error stems from a broken invariant rather than an
    /// operational failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ContractViolation { .. })
    }

    /// Returns the suggested action for automation.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) => SuggestedAction::FixConfig,
            Error::InvalidDataset { .. } => SuggestedAction::FixInput,
            Error::Execution(_) => SuggestedAction::ManualIntervention,
            Error::Timeout(_) => SuggestedAction::Retry,
            Error::Query { .. } => SuggestedAction::Retry,
            Error::DatasetNotFound { .. } => SuggestedAction::FixInput,
            Error::DataIntegrity { .. } => SuggestedAction::Report,
            Error::ContractViolation { .. } => SuggestedAction::Report,
            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
            Error::KeyNotLoaded { .. } => SuggestedAction::LoadKey,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => "Check the config file and ZENC_* environment variables.",
            Error::InvalidDataset { .. } => {
                "Pass a filesystem or volume name such as 'pool/dataset' (no snapshots or bookmarks)."
            }
            Error::Execution(_) => {
                "Make sure the zfs binary is installed and reachable (see --zfs-bin / ZENC_ZFS_BIN)."
            }
            Error::Timeout(_) => "Retry with a longer '--timeout'.",
            Error::Query { .. } => "Retry the query. Check 'zfs get' manually if it keeps failing.",
            Error::DatasetNotFound { .. } => "Check the dataset name with 'zfs list'.",
            Error::DataIntegrity { .. } => {
                "zfs reported a value it documents as impossible. Report this with your zfs version."
            }
            Error::ContractViolation { .. } => {
                "zfs reported an unknown or missing state. Report this with your zfs version."
            }
            Error::Io(_) => "Check permissions and disk space, then retry.",
            Error::Json(_) => "Output could not be serialized. Report this as a bug.",
            Error::KeyNotLoaded { .. } => {
                "Load the key with 'zfs load-key', or use a raw send ('zfs send -w')."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidDataset { .. } => "Invalid Dataset Name",
            Error::Execution(_) => "zfs Execution Failed",
            Error::Timeout(_) => "Timed Out",
            Error::Query { .. } => "Property Query Failed",
            Error::DatasetNotFound { .. } => "Dataset Not Found",
            Error::DataIntegrity { .. } => "Inconsistent zfs Output",
            Error::ContractViolation { .. } => "zfs Contract Violation",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
            Error::KeyNotLoaded { .. } => "Encryption Key Not Loaded",
        }
    }

    fn dataset(&self) -> Option<&str> {
        match self {
            Error::InvalidDataset { dataset, .. }
            | Error::Query { dataset, .. }
            | Error::DatasetNotFound { dataset }
            | Error::DataIntegrity { dataset, .. }
            | Error::ContractViolation { dataset, .. }
            | Error::KeyNotLoaded { dataset } => Some(dataset),
            _ => None,
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action for automation.
    pub suggested_action: SuggestedAction,

    /// Additional structured context (e.g. dataset).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();
        if let Some(dataset) = err.dataset() {
            context.insert("dataset".to_string(), serde_json::json!(dataset));
        }
        if err.is_fatal() {
            context.insert("fatal".to_string(), serde_json::json!(true));
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }

    /// Serialize to pretty JSON string.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_json())
    }
}

/// Format an error for human consumption.
pub fn format_error_human(err: &Error) -> String {
    format!(
        "✗ {}\n  Reason: {}\n  Fix: {}",
        err.headline(),
        err,
        err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped() {
        assert_eq!(Error::Config("x".into()).code(), 10);
        assert_eq!(
            Error::InvalidDataset {
                dataset: "tank@x".into(),
                source: DatasetNameError::SnapshotOrBookmark('@'),
            }
            .code(),
            20
        );
        assert_eq!(Error::Execution("x".into()).code(), 30);
        assert_eq!(
            Error::KeyNotLoaded {
                dataset: "tank".into()
            }
            .code(),
            70
        );
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::ContractViolation {
                dataset: "tank".into(),
                message: "m".into()
            }
            .category(),
            ErrorCategory::Integrity
        );
        assert_eq!(
            Error::Timeout("t".into()).category(),
            ErrorCategory::Execution
        );
    }

    #[test]
    fn test_fatal_only_for_contract_violations() {
        let fatal = Error::ContractViolation {
            dataset: "tank".into(),
            message: "unknown keystatus".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_recoverable());
        assert!(!Error::DataIntegrity {
            dataset: "tank".into(),
            message: "m".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::KeyNotLoaded {
            dataset: "tank/secret".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 70);
        assert_eq!(structured.suggested_action, SuggestedAction::LoadKey);
        assert_eq!(
            structured.context.get("dataset"),
            Some(&serde_json::json!("tank/secret"))
        );

        let json = structured.to_json();
        assert!(json.contains("\"category\":\"transfer\""));
        assert!(json.contains("\"suggested_action\":\"load_key\""));
    }

    #[test]
    fn test_format_error_human() {
        let err = Error::Execution("zfs: not found".into());
        let text = format_error_human(&err);
        assert!(text.starts_with("✗ zfs Execution Failed"));
        assert!(text.contains("Reason: zfs execution failed: zfs: not found"));
        assert!(text.contains("Fix: "));
    }
}

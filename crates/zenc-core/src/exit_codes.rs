//! Exit codes for the zenc CLI.
//!
//! Exit codes communicate the outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes (the question was answered)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors and contract violations (should be reported)

use zenc_common::Error;

/// Exit codes for zenc operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-9)
    // ========================================================================
    /// An answer was produced
    Clean = 0,

    /// A live send was refused because the key is not loaded
    SendBlocked = 4,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments or configuration
    ArgsError = 10,

    /// The capability probe could not run or did not finish
    CapabilityError = 11,

    /// Malformed dataset name
    InvalidDataset = 12,

    /// Property query failed (including missing dataset)
    QueryError = 13,

    /// zfs reported a value it documents as impossible
    DataIntegrity = 14,

    // ========================================================================
    // Internal Errors (20-29)
    // ========================================================================
    /// Contract violation or bug
    InternalError = 20,

    /// I/O error
    IoError = 21,

    /// Operation timed out or was cancelled
    TimeoutError = 22,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Codes 0-9 are outcomes, not errors.
    pub fn is_operational(self) -> bool {
        (self as i32) < 10
    }

    /// Codes 10-19 can be resolved by user action.
    pub fn is_user_error(self) -> bool {
        (10..20).contains(&(self as i32))
    }

    /// Codes 20-29 indicate bugs or broken invariants.
    pub fn is_internal_error(self) -> bool {
        (self as i32) >= 20
    }

    /// Name for JSON output.
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK",
            ExitCode::SendBlocked => "BLOCKED_KEY_UNLOADED",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::InvalidDataset => "ERR_DATASET_NAME",
            ExitCode::QueryError => "ERR_QUERY",
            ExitCode::DataIntegrity => "ERR_DATA_INTEGRITY",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::TimeoutError => "ERR_TIMEOUT",
        }
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::Config(_) => ExitCode::ArgsError,
            Error::InvalidDataset { .. } => ExitCode::InvalidDataset,
            Error::Execution(_) => ExitCode::CapabilityError,
            Error::Timeout(_) => ExitCode::TimeoutError,
            Error::Query { .. } | Error::DatasetNotFound { .. } => ExitCode::QueryError,
            Error::DataIntegrity { .. } => ExitCode::DataIntegrity,
            Error::ContractViolation { .. } => ExitCode::InternalError,
            Error::Io(_) | Error::Json(_) => ExitCode::IoError,
            Error::KeyNotLoaded { .. } => ExitCode::SendBlocked,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges() {
        assert!(ExitCode::Clean.is_operational());
        assert!(ExitCode::SendBlocked.is_operational());
        assert!(ExitCode::QueryError.is_user_error());
        assert!(ExitCode::InternalError.is_internal_error());
        assert!(!ExitCode::TimeoutError.is_user_error());
    }

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::Config("x".into()), 10),
            (Error::Execution("x".into()), 11),
            (
                Error::DatasetNotFound {
                    dataset: "tank".into(),
                },
                13,
            ),
            (
                Error::DataIntegrity {
                    dataset: "tank".into(),
                    message: "m".into(),
                },
                14,
            ),
            (
                Error::ContractViolation {
                    dataset: "tank".into(),
                    message: "m".into(),
                },
                20,
            ),
            (Error::Timeout("x".into()), 22),
            (
                Error::KeyNotLoaded {
                    dataset: "tank".into(),
                },
                4,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(ExitCode::from(&err).as_i32(), code, "{err}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitCode::SendBlocked.to_string(), "BLOCKED_KEY_UNLOADED (4)");
    }
}

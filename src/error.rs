//! Exit codes and structured error output for the CLI.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: everything succeeded
/// - 1: unexpected failure
/// - 3: finished, but some artifacts could not be produced
/// - 130: interrupted by Ctrl+C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed normally.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// Completed with per-file failures.
    PartialSuccess = 3,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "RC000",
            Self::GeneralError => "RC001",
            Self::PartialSuccess => "RC003",
            Self::Interrupted => "RC130",
        }
    }
}

/// Error report printed under `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Machine-readable code, e.g. "RC001"
    pub code: String,
    /// Process exit code
    pub exit_code: i32,
    /// Human-readable message including the cause chain
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Build a report from an error and the exit code it maps to.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

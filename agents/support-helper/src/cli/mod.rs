//! CLI module for the Support Helper Agent
//!
//! Parses the command line, runs a single query and renders the result
//! document as JSON, YAML or a colored table.

pub mod commands;
pub mod output;

pub use commands::HelperCli;
pub use output::{ErrorOutput, OutputFormat, QueryOutput};

use crate::error::{Result, SupportError};
use crate::orchestrator::QueryOutcome;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Query completed with a validated response
    Success = 0,
    /// Query blocked by the safety screen
    Blocked = 1,
    /// Query failed (model API, schema or prompt size)
    Failed = 2,
    /// Invalid input, arguments or configuration
    InvalidInput = 3,
    /// File not found or inaccessible
    FileError = 4,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Exit code for a finished query
    pub fn from_outcome(outcome: &QueryOutcome) -> Self {
        match outcome {
            QueryOutcome::Completed(_) => ExitCode::Success,
            QueryOutcome::Blocked(_) => ExitCode::Blocked,
            QueryOutcome::Failed(_) => ExitCode::Failed,
        }
    }

    /// Exit code for a command line that did not parse.
    ///
    /// `--help` and `--version` are reported through the same error path
    /// and succeed.
    pub fn from_parse_error(error: &clap::Error) -> Self {
        if error.use_stderr() {
            ExitCode::InvalidInput
        } else {
            ExitCode::Success
        }
    }

    /// Exit code for an error that stopped the invocation
    pub fn from_error(error: &SupportError) -> Self {
        match error {
            e if e.is_user_error() => ExitCode::InvalidInput,
            SupportError::FileError(_) => ExitCode::FileError,
            _ => ExitCode::InternalError,
        }
    }
}

/// Run the CLI with the given arguments and return the exit code
pub fn run(cli: HelperCli) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| SupportError::InternalError(format!("Failed to start async runtime: {}", e)))?;

    runtime.block_on(commands::execute_query(cli))
}

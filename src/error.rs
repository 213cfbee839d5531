//! Error types for Fanout.
//!
//! Per-host failures (connection problems, timeouts, module failures) never
//! surface here: they become a `failed` or `unreachable` host result inside
//! the run report. This module covers the run-level failures that prevent a
//! report from being produced at all.

use thiserror::Error;
use uuid::Uuid;

use crate::executor::controller::RunState;
use crate::inventory::InventoryError;

/// Result type alias for Fanout operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Fanout.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Inventory Errors
    // ========================================================================
    /// Inventory could not be loaded or the pattern could not be resolved.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    // ========================================================================
    // Aggregation Errors
    // ========================================================================
    /// A second result was recorded for a host that already settled.
    #[error("Result for host '{0}' was recorded twice")]
    DuplicateResult(String),

    /// A result was recorded for a host outside the resolved target set.
    #[error("Result recorded for host '{0}' which is not part of this run")]
    UnexpectedHost(String),

    /// The run finished with hosts that never produced a result.
    #[error("Run finished without results for {} host(s): {}", missing.len(), missing.join(", "))]
    IncompleteRun {
        /// Hosts lacking a result
        missing: Vec<String>,
    },

    // ========================================================================
    // Task Errors
    // ========================================================================
    /// The task definition is invalid.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// The controller has already been used for a run.
    #[error("Execution controller already ran (state: {0})")]
    AlreadyStarted(RunState),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO / Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new incomplete run error.
    pub fn incomplete_run(missing: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::IncompleteRun {
            missing: missing.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if this error indicates a bug rather than bad input.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateResult(_)
                | Error::UnexpectedHost(_)
                | Error::IncompleteRun { .. }
                | Error::Internal(_)
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Inventory(_) => 5,
            Error::Config(_) | Error::TomlParse(_) => 6,
            _ => 1,
        }
    }
}

/// Top-level error surfaced by [`ExecutionController::run`].
///
/// Carries the run identifier and the controller state in which the run
/// stopped, so callers can tell a resolution failure from a dispatch bug.
///
/// [`ExecutionController::run`]: crate::executor::controller::ExecutionController::run
#[derive(Error, Debug)]
#[error("Run {run_id} failed while {state}: {source}")]
pub struct RunError {
    /// Identifier of the failed run
    pub run_id: Uuid,
    /// State the controller was in when the error occurred
    pub state: RunState,
    /// Underlying cause
    #[source]
    pub source: Error,
}

impl RunError {
    /// Creates a new run error.
    pub fn new(run_id: Uuid, state: RunState, source: impl Into<Error>) -> Self {
        Self {
            run_id,
            state,
            source: source.into(),
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

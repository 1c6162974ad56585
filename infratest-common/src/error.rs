//! Error taxonomy for lifecycle, inspection and validation failures.
//!
//! Every failure surfaces to the invoking test case. The only retry loop in
//! the crate is the bounded one inside [`crate::http::validate`], which
//! itself reports [`HarnessError::ValidationTimeout`] on exhaustion.

use std::path::PathBuf;
use std::time::Duration;

use crate::http::LastObservation;

/// Error type for harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The provisioning engine reported a non-zero outcome.
    #[error("terraform {command} failed with exit code {exit_code}:\n{output}")]
    Provisioning {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A required output is absent from the applied state.
    #[error("required output '{name}' not found in {dir}")]
    MissingOutput { name: String, dir: PathBuf },

    /// The probe never satisfied the predicate within the retry budget.
    #[error("'{target}' did not pass validation after {attempts} attempts (last: {last})")]
    ValidationTimeout {
        target: String,
        attempts: u32,
        last: LastObservation,
    },

    /// The plan report lacks a structural field the inspector needed.
    #[error("malformed plan report: {0}")]
    MalformedPlanReport(String),

    /// Teardown failed after an earlier failure. The earlier failure is the
    /// recorded cause.
    #[error("{cause} (teardown also failed: {teardown})")]
    TeardownFailed {
        cause: Box<HarnessError>,
        teardown: Box<HarnessError>,
    },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("configuration directory not found: {0}")]
    ConfigDirNotFound(PathBuf),

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("process failed to start: {0}")]
    ProcessStartFailed(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Stable label for each error variant, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Provisioning,
    MissingOutput,
    ValidationTimeout,
    MalformedPlanReport,
    TeardownFailed,
    InvalidState,
    ConfigDirNotFound,
    InvalidRetryPolicy,
    ProcessStartFailed,
    Timeout,
    Config,
    Io,
    Json,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Provisioning => "provisioning",
            Self::MissingOutput => "missing_output",
            Self::ValidationTimeout => "validation_timeout",
            Self::MalformedPlanReport => "malformed_plan_report",
            Self::TeardownFailed => "teardown_failed",
            Self::InvalidState => "invalid_state",
            Self::ConfigDirNotFound => "config_dir_not_found",
            Self::InvalidRetryPolicy => "invalid_retry_policy",
            Self::ProcessStartFailed => "process_start_failed",
            Self::Timeout => "timeout",
            Self::Config => "config",
            Self::Io => "io",
            Self::Json => "json",
        };
        write!(f, "{label}")
    }
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provisioning { .. } => ErrorKind::Provisioning,
            Self::MissingOutput { .. } => ErrorKind::MissingOutput,
            Self::ValidationTimeout { .. } => ErrorKind::ValidationTimeout,
            Self::MalformedPlanReport(_) => ErrorKind::MalformedPlanReport,
            Self::TeardownFailed { .. } => ErrorKind::TeardownFailed,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::ConfigDirNotFound(_) => ErrorKind::ConfigDirNotFound,
            Self::InvalidRetryPolicy(_) => ErrorKind::InvalidRetryPolicy,
            Self::ProcessStartFailed(_) => ErrorKind::ProcessStartFailed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// The failure recorded as the test's cause.
    ///
    /// For [`HarnessError::TeardownFailed`] this is the failure that preceded
    /// teardown; every other variant is its own cause.
    pub fn cause(&self) -> &HarnessError {
        match self {
            Self::TeardownFailed { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// Wrap `self` with a teardown failure, keeping `self` as the cause.
    pub fn with_teardown_failure(self, teardown: HarnessError) -> Self {
        Self::TeardownFailed {
            cause: Box::new(self),
            teardown: Box::new(teardown),
        }
    }

    /// True when teardown also failed while reporting this error.
    pub fn teardown_failed(&self) -> bool {
        matches!(self, Self::TeardownFailed { .. })
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedPlanReport(message.into())
    }
}

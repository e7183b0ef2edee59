//! Error taxonomy for the QA harness.
//!
//! Every fallible harness operation returns [`HarnessResult`]. Each variant
//! carries a stable code so log lines and CI reports can be grepped without
//! depending on message wording.
//!
//! | Code       | Variant               | Raised by                         |
//! |------------|-----------------------|-----------------------------------|
//! | WQA-E001   | `Config`              | configuration loading/validation  |
//! | WQA-E100   | `CommandFailure`      | local command runner              |
//! | WQA-E101   | `ConnectionFailure`   | SSH runner                        |
//! | WQA-E200   | `ProvisioningError`   | cloud client                      |
//! | WQA-E201   | `KeyNotFound`         | cloud client                      |
//! | WQA-E300   | `StatusQueryError`    | status poller                     |
//! | WQA-E301   | `ConvergenceTimeout`  | callers escalating a timed-out wait |
//! | WQA-E400   | `InvalidTransition`   | deployment controller             |
//! | WQA-E500   | `Io`                  | filesystem / process spawning     |

use std::time::Duration;

use crate::deploy::DeploymentState;

/// Boxed underlying cause carried by [`HarnessError::ProvisioningError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Every failure the library reports. Scenario verdicts are not errors.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("command `{command}` exited with status {exit_code}")]
    CommandFailure {
        command: String,
        exit_code: i32,
        /// Last few stderr lines, for the test report.
        stderr_tail: Vec<String>,
    },

    #[error("cannot reach {host}: {reason}")]
    ConnectionFailure { host: String, reason: String },

    #[error("cloud operation `{operation}` failed: {source}")]
    ProvisioningError {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("no default access key for {function_app}")]
    KeyNotFound { function_app: String },

    #[error("status query against {url} failed: {reason}")]
    StatusQueryError { url: String, reason: String },

    #[error("cluster did not converge within {budget:?} ({polls} polls)")]
    ConvergenceTimeout { budget: Duration, polls: u32 },

    #[error("deployment cannot move from {from} to {to}")]
    InvalidTransition {
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Stable code for logs and reports, grouped by subsystem.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "WQA-E001",
            Self::CommandFailure { .. } => "WQA-E100",
            Self::ConnectionFailure { .. } => "WQA-E101",
            Self::ProvisioningError { .. } => "WQA-E200",
            Self::KeyNotFound { .. } => "WQA-E201",
            Self::StatusQueryError { .. } => "WQA-E300",
            Self::ConvergenceTimeout { .. } => "WQA-E301",
            Self::InvalidTransition { .. } => "WQA-E400",
            Self::Io(_) => "WQA-E500",
        }
    }

    pub fn provisioning(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::ProvisioningError {
            operation,
            source: source.into(),
        }
    }

    pub fn status_query(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StatusQueryError {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

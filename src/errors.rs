//! Typed error hierarchy for remedy.
//!
//! Two top-level enums cover the subsystems callers match on:
//! - `ContractError`: document and task contract violations
//! - `SchedulerError`: job admission, lookup and launch failures
//!
//! Everything else propagates as `anyhow::Error` with context. The
//! [`crate::classifier`] module maps any of them onto an [`crate::classifier::ErrorKind`].

use thiserror::Error;

/// Errors raised at the store's contract boundary.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Contract violation for {entity}: {}", errors.join("; "))]
    Violation { entity: String, errors: Vec<String> },

    #[error("Contract violation for {label}: missing value at {}", paths.join(", "))]
    MissingValues { label: String, paths: Vec<String> },
}

impl ContractError {
    /// Stable code used by the classifier.
    pub fn code(&self) -> &'static str {
        "contract-violation"
    }
}

/// Errors from the job scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error("Job {id} is not running (status: {status})")]
    NotRunning { id: String, status: String },

    #[error("Job {id} is not queued (status: {status})")]
    NotQueued { id: String, status: String },

    #[error("Unsupported job type '{0}'. Supported types: workflow, implementation")]
    UnsupportedJobType(String),

    #[error("Failed to spawn job process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Failed to acquire job admission lock: {0}")]
    Admission(#[source] std::io::Error),

    #[error("Job record error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Job table lock poisoned")]
    LockPoisoned,
}

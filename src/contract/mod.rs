//! Contracts enforced before anything reaches the document store.
//!
//! - [`document`]: the missing-value scan every other check builds on
//! - [`task`]: the Remediation Task and Backlog schema

pub mod document;
pub mod task;

use serde::Serialize;

pub use document::{Document, find_missing_fields, validate};
pub use task::{
    BacklogReport, convert_to_task, filter_valid_tasks, validate_backlog, validate_task,
};

/// Outcome of a contract check. Errors accumulate; nothing short-circuits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Anything that can present itself to the contract as a store document.
pub trait AsDocument {
    fn as_document(&self) -> Document;
}

impl AsDocument for Document {
    fn as_document(&self) -> Document {
        self.clone()
    }
}

//! Remediation Task and Backlog contract.

use serde::Serialize;

use super::document::{self, Document};
use super::{AsDocument, ValidationReport};
use crate::backlog::models::{FixType, Priority, RiskLevel, TargetType};
use crate::classifier;
use crate::errors::ContractError;

/// Fields every task must carry with a non-null, non-empty value.
pub const REQUIRED_FIELDS: &[&str] = &[
    "id",
    "title",
    "description",
    "targetType",
    "targetPath",
    "fixType",
    "priority",
    "riskLevel",
    "requiresApproval",
    "dependencies",
    "status",
];

fn is_present(doc: &Document, key: &str) -> bool {
    match doc.get(key) {
        None | Some(Document::Missing) | Some(Document::Null) => false,
        Some(Document::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

fn render(value: &Document) -> String {
    match value {
        Document::String(s) => s.clone(),
        Document::Missing => "<missing>".to_string(),
        other => format!("{:?}", other),
    }
}

fn check_enum(doc: &Document, key: &str, domain: &[&str], errors: &mut Vec<String>) {
    if let Some(value) = doc.get(key).filter(|_| is_present(doc, key))
        && !value.as_str().is_some_and(|s| domain.contains(&s))
    {
        errors.push(format!(
            "Invalid {}: {} (expected one of: {})",
            key,
            render(value),
            domain.join(", ")
        ));
    }
}

/// Payload fields a fix type needs. Empty for `delete`.
pub fn required_payload(fix_type: &str) -> &'static [&'static str] {
    match fix_type {
        "patch" => &["patch"],
        "rewrite" | "create" => &["newContent"],
        "command" => &["command"],
        "config" => &["configKey", "newValue"],
        _ => &[],
    }
}

fn task_label(doc: &Document) -> String {
    doc.get("id")
        .and_then(Document::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Validate one task. Violations are logged as CONTRACT keyed by task id.
pub fn validate_task(task: &Document) -> ValidationReport {
    let mut errors = Vec::new();

    if !matches!(task, Document::Object(_)) {
        errors.push("Task must be an object".to_string());
    }

    for field in REQUIRED_FIELDS {
        if !is_present(task, field) {
            errors.push(format!("Missing required field: {}", field));
        }
    }

    check_enum(task, "targetType", TargetType::NAMES, &mut errors);
    check_enum(task, "fixType", FixType::NAMES, &mut errors);

    if let Some(fix_type) = task.get("fixType").and_then(Document::as_str) {
        for payload in required_payload(fix_type) {
            if !is_present(task, payload) {
                errors.push(format!(
                    "Missing required field for fixType '{}': {}",
                    fix_type, payload
                ));
            }
        }
    }

    check_enum(task, "priority", Priority::NAMES, &mut errors);
    check_enum(task, "riskLevel", RiskLevel::NAMES, &mut errors);

    if is_present(task, "requiresApproval")
        && !matches!(task.get("requiresApproval"), Some(Document::Bool(_)))
    {
        errors.push("Invalid requiresApproval: must be a boolean".to_string());
    }
    if is_present(task, "dependencies") && task.get("dependencies").and_then(Document::as_array).is_none() {
        errors.push("Invalid dependencies: must be a list".to_string());
    }

    let label = task_label(task);
    errors.extend(document::validate(task, &label).errors);

    if !errors.is_empty() {
        let err = anyhow::Error::new(ContractError::Violation {
            entity: label.clone(),
            errors: errors.clone(),
        });
        classifier::log_and_format(&err, "validateTask", Some(&label));
    }

    ValidationReport::from_errors(errors)
}

/// Outcome of validating a whole Backlog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogReport {
    pub valid: bool,
    pub errors: Vec<String>,
    /// Ids of failing tasks, or `tasks[i]` when a task has no id.
    pub invalid_tasks: Vec<String>,
}

/// Validate every task in a Backlog. An empty task list is valid.
pub fn validate_backlog(backlog: &Document) -> BacklogReport {
    let Some(tasks) = backlog.get("tasks").and_then(Document::as_array) else {
        return BacklogReport {
            valid: false,
            errors: vec!["Backlog tasks must be a list".to_string()],
            invalid_tasks: Vec::new(),
        };
    };

    let mut report = BacklogReport {
        valid: true,
        ..Default::default()
    };
    for (i, task) in tasks.iter().enumerate() {
        let result = validate_task(task);
        if !result.valid {
            let label = task
                .get("id")
                .and_then(Document::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("tasks[{}]", i));
            report
                .errors
                .extend(result.errors.iter().map(|e| format!("[{}] {}", label, e)));
            report.invalid_tasks.push(label);
        }
    }
    report.valid = report.invalid_tasks.is_empty();
    report
}

/// Return the candidate untouched when it satisfies the contract.
pub fn convert_to_task<T: AsDocument>(candidate: T) -> Option<T> {
    validate_task(&candidate.as_document()).valid.then_some(candidate)
}

/// Keep only valid candidates, in order.
pub fn filter_valid_tasks<T: AsDocument>(candidates: impl IntoIterator<Item = T>) -> Vec<T> {
    candidates.into_iter().filter_map(convert_to_task).collect()
}

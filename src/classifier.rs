//! Error classification.
//!
//! Every error surfaced to an operator is tagged with one of four kinds so a
//! malformed input, an unreachable backend and a failed fix application read
//! differently in logs:
//!
//! | Kind             | Meaning                                          |
//! |------------------|--------------------------------------------------|
//! | `CONTRACT`       | schema or enum-domain violation                  |
//! | `INFRASTRUCTURE` | remote dependency failure outside our control    |
//! | `VALIDATION`     | any other validation failure                     |
//! | `RUNTIME`        | default; execution failures                      |
//!
//! Classification walks [`CLASSIFIER_RULES`] in order and stops at the first
//! rule whose needle appears in the lower-cased message or code, so a message
//! matching two kinds takes the earlier one.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::errors::ContractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorKind {
    Contract,
    Infrastructure,
    Validation,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contract => "CONTRACT",
            Self::Infrastructure => "INFRASTRUCTURE",
            Self::Validation => "VALIDATION",
            Self::Runtime => "RUNTIME",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule: any needle present selects `kind`.
pub struct ClassifierRule {
    pub kind: ErrorKind,
    pub needles: &'static [&'static str],
}

/// Ordered by precedence. `RUNTIME` is the fallthrough and has no rule.
pub const CLASSIFIER_RULES: &[ClassifierRule] = &[
    ClassifierRule {
        kind: ErrorKind::Contract,
        needles: &[
            "contract violation",
            "contract-violation",
            "missing required field",
            "invalid targettype",
            "invalid fixtype",
            "invalid priority",
            "invalid risklevel",
            "missing value at",
            "cannot use \"undefined\"",
        ],
    },
    ClassifierRule {
        kind: ErrorKind::Infrastructure,
        needles: &[
            "permission-denied",
            "permission denied",
            "unavailable",
            "unauthenticated",
            "network",
            "connection refused",
            "connection reset",
            "timed out",
            "econnrefused",
            "deadline-exceeded",
        ],
    },
    ClassifierRule {
        kind: ErrorKind::Validation,
        needles: &["validation", "invalid", "must be", "is required", "malformed"],
    },
];

/// Classify a message/code pair. Total: anything unmatched is `Runtime`.
pub fn classify_message(message: &str, code: Option<&str>) -> ErrorKind {
    let message = message.to_lowercase();
    let code = code.map(str::to_lowercase).unwrap_or_default();
    CLASSIFIER_RULES
        .iter()
        .find(|rule| {
            rule.needles
                .iter()
                .any(|needle| message.contains(needle) || code.contains(needle))
        })
        .map(|rule| rule.kind)
        .unwrap_or(ErrorKind::Runtime)
}

/// Derive a code from the typed errors we know about anywhere in the chain.
fn error_code(err: &anyhow::Error) -> Option<&'static str> {
    err.chain().find_map(|cause| {
        if let Some(contract) = cause.downcast_ref::<ContractError>() {
            return Some(contract.code());
        }
        cause.downcast_ref::<std::io::Error>().and_then(|io| match io.kind() {
            std::io::ErrorKind::PermissionDenied => Some("permission-denied"),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => Some("network"),
            std::io::ErrorKind::TimedOut => Some("unavailable"),
            _ => None,
        })
    })
}

/// Classify any error. `context` and `entity_label` only feed the rendering
/// helpers; the kind depends on the error alone.
pub fn classify(err: &anyhow::Error, _context: &str, _entity_label: Option<&str>) -> ErrorKind {
    classify_message(&format!("{:#}", err), error_code(err))
}

/// Render `"<KIND> [<context>] [<entity>] <message>"`.
pub fn format(err: &anyhow::Error, context: &str, entity_label: Option<&str>) -> String {
    render(classify(err, context, entity_label), &format!("{:#}", err), context, entity_label)
}

fn render(kind: ErrorKind, message: &str, context: &str, entity_label: Option<&str>) -> String {
    match entity_label {
        Some(entity) => format!("{} [{}] [{}] {}", kind, context, entity, message),
        None => format!("{} [{}] {}", kind, context, message),
    }
}

/// Structured record emitted by [`log_and_format`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub original_message: String,
    pub stack_trace: String,
    pub timestamp: DateTime<Utc>,
    pub context: String,
    pub entity_label: Option<String>,
}

impl ClassifiedError {
    pub fn new(err: &anyhow::Error, context: &str, entity_label: Option<&str>) -> Self {
        let original_message = format!("{:#}", err);
        let kind = classify(err, context, entity_label);
        Self {
            kind,
            message: render(kind, &original_message, context, entity_label),
            original_message,
            stack_trace: format!("{:?}", err),
            timestamp: Utc::now(),
            context: context.to_string(),
            entity_label: entity_label.map(str::to_string),
        }
    }
}

/// Classify, emit a structured `tracing` event and return the formatted line.
pub fn log_and_format(err: &anyhow::Error, context: &str, entity_label: Option<&str>) -> String {
    let record = ClassifiedError::new(err, context, entity_label);
    let payload = serde_json::to_string(&record).unwrap_or_default();
    tracing::error!(
        kind = record.kind.as_str(),
        context = %record.context,
        entity = record.entity_label.as_deref().unwrap_or("-"),
        record = %payload,
        "{}",
        record.message
    );
    record.message
}

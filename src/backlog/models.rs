use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::{AsDocument, Document};

/// Generates `as_str`, `NAMES`, `Display` and `FromStr` for a unit enum whose
/// serde names match the listed strings.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub const NAMES: &'static [&'static str] = &[$($s),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    File,
    Function,
    Config,
    Doc,
    Command,
}

string_enum!(TargetType {
    File => "file",
    Function => "function",
    Config => "config",
    Doc => "doc",
    Command => "command",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixType {
    Patch,
    Rewrite,
    Command,
    Create,
    Delete,
    Config,
}

string_enum!(FixType {
    Patch => "patch",
    Rewrite => "rewrite",
    Command => "command",
    Create => "create",
    Delete => "delete",
    Config => "config",
});

/// Ordered most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

string_enum!(Priority {
    P0 => "P0",
    P1 => "P1",
    P2 => "P2",
    P3 => "P3",
});

impl Priority {
    /// Map an issue's declared priority or severity. Unknown values are P3.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" | "p0" => Self::P0,
            "high" | "p1" => Self::P1,
            "medium" | "p2" => Self::P2,
            _ => Self::P3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

string_enum!(RiskLevel {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Error,
}

string_enum!(TaskStatus {
    Todo => "todo",
    InProgress => "in-progress",
    Done => "done",
    Error => "error",
});

/// T-shirt effort estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Effort {
    XS,
    S,
    M,
    L,
    XL,
}

string_enum!(Effort {
    XS => "XS",
    S => "S",
    M => "M",
    L => "L",
    XL => "XL",
});

impl Effort {
    pub fn hours(&self) -> f64 {
        match self {
            Self::XS => 0.5,
            Self::S => 2.0,
            Self::M => 6.0,
            Self::L => 12.0,
            Self::XL => 24.0,
        }
    }

    pub fn for_fix_type(fix_type: FixType) -> Self {
        match fix_type {
            FixType::Command | FixType::Config => Self::XS,
            FixType::Create | FixType::Delete => Self::S,
            FixType::Patch => Self::M,
            FixType::Rewrite => Self::L,
        }
    }
}

/// A finding reported by an external analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "type")]
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl Issue {
    /// Location with surrounding whitespace removed; empty counts as absent.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// Snapshot of the issue a task was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalIssue {
    pub id: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Option<String>,
}

impl From<&Issue> for OriginalIssue {
    fn from(issue: &Issue) -> Self {
        Self {
            id: issue.id.clone(),
            issue_type: issue.category.clone(),
            severity: issue.severity.clone(),
        }
    }
}

/// A schema-valid, automatable repair unit derived from one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub target_type: TargetType,
    pub target_path: String,
    pub target_locator: Option<String>,
    pub fix_type: FixType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    pub priority: Priority,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub dependencies: Vec<String>,
    pub effort: Option<Effort>,
    pub category: String,
    pub agent: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub original_issue: OriginalIssue,
}

impl AsDocument for RemediationTask {
    fn as_document(&self) -> Document {
        // A task that cannot be rendered cannot be stored either.
        Document::from_serialize(self).unwrap_or(Document::Missing)
    }
}

/// Task-id indices derived from the task list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogGroups {
    pub by_priority: BTreeMap<String, Vec<String>>,
    pub by_type: BTreeMap<String, Vec<String>>,
    pub by_effort: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogSummary {
    pub total_tasks: usize,
    pub candidates_generated: usize,
    pub filtered_out: usize,
    /// Issues the auto-fixability predicate rejected.
    pub excluded: usize,
    /// Issues for which no fix could be derived.
    pub skipped: usize,
    pub by_priority: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub estimated_hours: f64,
    pub estimated_completion: NaiveDate,
}

/// The aggregate of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backlog {
    pub backlog_id: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub milestone: String,
    pub deadline: Option<String>,
    pub tasks: Vec<RemediationTask>,
    pub groups: BacklogGroups,
    pub summary: BacklogSummary,
}

impl AsDocument for Backlog {
    fn as_document(&self) -> Document {
        Document::from_serialize(self).unwrap_or(Document::Missing)
    }
}

//! Fix policy: which issues may be automated and how risky each fix is.
//!
//! Callers plug their own policy into the generator; [`DefaultFixPolicy`] is
//! what the CLI uses.

use super::models::{FixType, Issue, Priority, RiskLevel};

/// Risk verdict for one (issue, fix type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
}

pub trait FixPolicy: Send + Sync {
    /// Issues failing this are excluded from synthesis and routed elsewhere.
    fn is_auto_fixable(&self, issue: &Issue) -> bool;

    fn assess(&self, issue: &Issue, fix_type: FixType) -> RiskAssessment;
}

/// Phrases that mark an issue as needing a human.
const MANUAL_MARKERS: &[&str] = &[
    "manual review",
    "requires human",
    "revisão manual",
    "revisao manual",
    "needs discussion",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFixPolicy;

impl FixPolicy for DefaultFixPolicy {
    fn is_auto_fixable(&self, issue: &Issue) -> bool {
        let message = issue.message.to_lowercase();
        !message.trim().is_empty() && !MANUAL_MARKERS.iter().any(|m| message.contains(m))
    }

    fn assess(&self, issue: &Issue, fix_type: FixType) -> RiskAssessment {
        let critical = issue
            .priority
            .as_deref()
            .or(issue.severity.as_deref())
            .map(Priority::from_label)
            == Some(Priority::P0);

        let (risk_level, requires_approval) = match fix_type {
            FixType::Delete | FixType::Rewrite => (RiskLevel::High, true),
            FixType::Command => (RiskLevel::Medium, true),
            FixType::Config | FixType::Patch => (RiskLevel::Medium, critical),
            FixType::Create => (if critical { RiskLevel::Medium } else { RiskLevel::Low }, critical),
        };
        RiskAssessment {
            risk_level,
            requires_approval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(message: &str, severity: Option<&str>) -> Issue {
        Issue {
            message: message.into(),
            severity: severity.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_blank_and_manual_issues_are_not_auto_fixable() {
        let policy = DefaultFixPolicy;
        assert!(!policy.is_auto_fixable(&issue("   ", None)));
        assert!(!policy.is_auto_fixable(&issue("Needs manual review of auth flow", None)));
        assert!(policy.is_auto_fixable(&issue("README.md missing", None)));
    }

    #[test]
    fn test_destructive_fixes_need_approval() {
        let policy = DefaultFixPolicy;
        let verdict = policy.assess(&issue("x", None), FixType::Delete);
        assert_eq!(verdict.risk_level, RiskLevel::High);
        assert!(verdict.requires_approval);
        assert!(policy.assess(&issue("x", None), FixType::Command).requires_approval);
    }

    #[test]
    fn test_critical_create_escalates() {
        let policy = DefaultFixPolicy;
        let low = policy.assess(&issue("x", Some("low")), FixType::Create);
        assert_eq!(low.risk_level, RiskLevel::Low);
        assert!(!low.requires_approval);
        let critical = policy.assess(&issue("x", Some("critical")), FixType::Create);
        assert_eq!(critical.risk_level, RiskLevel::Medium);
        assert!(critical.requires_approval);
    }
}

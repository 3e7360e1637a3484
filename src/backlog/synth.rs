//! Task synthesis: issues in, validated Backlog out.
//!
//! Pure given its inputs: the caller supplies the first id sequence number
//! and the clock, so a run is reproducible in tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, Utc};
use tracing::debug;

use super::models::{
    Backlog, BacklogGroups, BacklogSummary, Effort, FixType, Issue, OriginalIssue, Priority,
    RemediationTask, TargetType, TaskStatus,
};
use super::policy::FixPolicy;
use super::rules::{self, Bucket, FixDecision};
use crate::contract::{Document, filter_valid_tasks};
use crate::util::truncate_title;

/// Hours of fix work assumed per calendar day.
pub const HOURS_PER_DAY: f64 = 4.0;

/// Characters of another task's title looked for in a description.
pub const DEPENDENCY_KEY_CHARS: usize = 20;

const NO_DESCRIPTION: &str = "No description provided.";

/// Everything a synthesis run needs besides the issues.
pub struct SynthesisContext<'a> {
    pub backlog_id: String,
    pub created_by: String,
    pub milestone: String,
    pub deadline: Option<String>,
    pub first_sequence: u32,
    pub now: DateTime<Utc>,
    pub policy: &'a dyn FixPolicy,
}

pub fn task_id(sequence: u32) -> String {
    format!("TASK-{:03}", sequence)
}

/// Largest numeric suffix among `tasks[*].id` in a stored Backlog.
pub fn max_task_sequence(backlog: &Document) -> u32 {
    backlog
        .get("tasks")
        .and_then(Document::as_array)
        .unwrap_or_default()
        .iter()
        .filter_map(|task| task.get("id").and_then(Document::as_str))
        .filter_map(|id| {
            let digits: String = id
                .chars()
                .rev()
                .take_while(char::is_ascii_digit)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Where and how a fix applies, before it becomes a task.
#[derive(Debug, Clone, PartialEq)]
pub struct FixPlan {
    pub fix_type: FixType,
    pub target_type: TargetType,
    pub target_path: String,
    pub target_locator: Option<String>,
    pub new_content: Option<String>,
    pub command: Option<String>,
    pub config_key: Option<String>,
    pub new_value: Option<String>,
}

impl FixPlan {
    fn new(fix_type: FixType, target_type: TargetType, target_path: String) -> Self {
        Self {
            fix_type,
            target_type,
            target_path,
            target_locator: None,
            new_content: None,
            command: None,
            config_key: None,
            new_value: None,
        }
    }

    /// Whether the payload the fix type needs was actually filled in.
    pub fn has_payload(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        match self.fix_type {
            FixType::Create | FixType::Rewrite => filled(&self.new_content),
            FixType::Command => filled(&self.command),
            FixType::Config => filled(&self.config_key) && filled(&self.new_value),
            FixType::Patch => false,
            FixType::Delete => true,
        }
    }
}

/// Derive a fix for one issue, or `None` when it cannot be automated.
pub fn plan_fix(issue: &Issue) -> Option<FixPlan> {
    let (rule, decision) = rules::decide_fix(issue);
    let fix_type = match decision {
        FixDecision::Fix(fix_type) => fix_type,
        FixDecision::Drop(reason) => {
            debug!(issue_id = %issue.id, rule, reason, "Issue dropped");
            return None;
        }
    };

    let (path, locator) = match issue.location() {
        Some(location) => {
            let (path, locator) = rules::split_location(location);
            (Some(path), locator)
        }
        None => (None, None),
    };

    let mut plan = match fix_type {
        FixType::Create => {
            let path = path.or_else(|| rules::file_token(&issue.message))?;
            let mut plan = FixPlan::new(fix_type, rules::target_type_for_path(&path), path);
            plan.new_content = Some(rules::template_for(&plan.target_path, &issue.message));
            plan
        }
        FixType::Command => {
            let package = rules::extract_package_name(&issue.message)?;
            let (command, manifest) = rules::install_command(&package, path.as_deref())?;
            let mut plan = FixPlan::new(fix_type, TargetType::Command, manifest);
            plan.command = Some(command);
            plan
        }
        FixType::Config => {
            let (key, value) = rules::extract_config_pair(&issue.message)?;
            let path = path.or_else(|| rules::file_token(&issue.message))?;
            let mut plan = FixPlan::new(fix_type, TargetType::Config, path);
            plan.config_key = Some(key);
            plan.new_value = Some(value);
            plan
        }
        FixType::Delete => {
            let path = path.or_else(|| rules::file_token(&issue.message))?;
            FixPlan::new(fix_type, TargetType::File, path)
        }
        // No rule produces these until patch generation exists.
        FixType::Patch | FixType::Rewrite => return None,
    };
    plan.target_locator = locator;
    Some(plan)
}

fn issue_priority(issue: &Issue) -> Priority {
    issue
        .priority
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .or(issue.severity.as_deref())
        .map(Priority::from_label)
        .unwrap_or(Priority::P3)
}

fn assemble(
    issue: &Issue,
    bucket: Bucket,
    plan: FixPlan,
    id: String,
    ctx: &SynthesisContext<'_>,
) -> RemediationTask {
    let assessment = ctx.policy.assess(issue, plan.fix_type);
    let message = issue.message.trim();
    RemediationTask {
        id,
        title: truncate_title(message),
        description: if message.is_empty() {
            NO_DESCRIPTION.to_string()
        } else {
            message.to_string()
        },
        target_type: plan.target_type,
        target_path: plan.target_path,
        target_locator: plan.target_locator,
        fix_type: plan.fix_type,
        patch: None,
        new_content: plan.new_content,
        command: plan.command,
        config_key: plan.config_key,
        new_value: plan.new_value,
        priority: issue_priority(issue),
        risk_level: assessment.risk_level,
        requires_approval: assessment.requires_approval,
        dependencies: Vec::new(),
        effort: Some(Effort::for_fix_type(plan.fix_type)),
        category: bucket.as_str().to_string(),
        agent: bucket.agent(),
        status: TaskStatus::Todo,
        created_at: ctx.now,
        original_issue: OriginalIssue::from(issue),
    }
}

/// Add an edge to every task whose title prefix appears in this task's
/// description. Best-effort: short or generic titles produce false edges.
pub fn infer_dependencies(tasks: &mut [RemediationTask]) {
    let keys: Vec<(String, String)> = tasks
        .iter()
        .map(|t| {
            let key: String = t.title.chars().take(DEPENDENCY_KEY_CHARS).collect();
            (t.id.clone(), key.to_lowercase())
        })
        .collect();

    for task in tasks.iter_mut() {
        let description = task.description.to_lowercase();
        for (id, key) in &keys {
            if *id != task.id
                && !key.trim().is_empty()
                && description.contains(key.as_str())
                && !task.dependencies.contains(id)
            {
                task.dependencies.push(id.clone());
            }
        }
    }
}

fn build_groups(tasks: &[RemediationTask]) -> BacklogGroups {
    let mut groups = BacklogGroups::default();
    for task in tasks {
        groups
            .by_priority
            .entry(task.priority.to_string())
            .or_default()
            .push(task.id.clone());
        groups
            .by_type
            .entry(task.fix_type.to_string())
            .or_default()
            .push(task.id.clone());
        if let Some(effort) = task.effort {
            groups
                .by_effort
                .entry(effort.to_string())
                .or_default()
                .push(task.id.clone());
        }
    }
    groups
}

/// Run the full synthesis pipeline.
pub fn synthesize(issues: &[Issue], ctx: &SynthesisContext<'_>) -> Backlog {
    // `None` once the id range is used up; later issues are skipped.
    let mut sequence = Some(ctx.first_sequence);
    let mut candidates = Vec::new();
    let mut excluded = 0;
    let mut skipped = 0;

    for (bucket, bucket_issues) in rules::bucket_issues(issues) {
        for issue in bucket_issues {
            if !ctx.policy.is_auto_fixable(issue) {
                excluded += 1;
                continue;
            }
            match (plan_fix(issue).filter(FixPlan::has_payload), sequence) {
                (Some(plan), Some(seq)) => {
                    candidates.push(assemble(issue, bucket, plan, task_id(seq), ctx));
                    sequence = seq.checked_add(1);
                }
                _ => skipped += 1,
            }
        }
    }

    let candidates_generated = candidates.len();
    candidates.sort_by_key(|t| (t.priority, t.effort.is_none(), t.effort));
    infer_dependencies(&mut candidates);

    let mut tasks = filter_valid_tasks(candidates);
    let kept: Vec<String> = tasks.iter().map(|t| t.id.clone()).collect();
    for task in &mut tasks {
        task.dependencies.retain(|id| kept.contains(id));
    }

    let estimated_hours: f64 = tasks.iter().filter_map(|t| t.effort).map(|e| e.hours()).sum();
    let days = (estimated_hours / HOURS_PER_DAY).ceil() as u64;
    let today = ctx.now.date_naive();

    let mut by_priority: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    for task in &tasks {
        *by_priority.entry(task.priority.to_string()).or_default() += 1;
        *by_category.entry(task.category.clone()).or_default() += 1;
    }

    let summary = BacklogSummary {
        total_tasks: tasks.len(),
        candidates_generated,
        filtered_out: candidates_generated - tasks.len(),
        excluded,
        skipped,
        by_priority,
        by_category,
        estimated_hours,
        estimated_completion: today.checked_add_days(Days::new(days)).unwrap_or(today),
    };

    Backlog {
        backlog_id: ctx.backlog_id.clone(),
        created_at: ctx.now,
        created_by: ctx.created_by.clone(),
        milestone: ctx.milestone.clone(),
        deadline: ctx.deadline.clone(),
        groups: build_groups(&tasks),
        tasks,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlog::policy::DefaultFixPolicy;
    use crate::contract::{AsDocument, validate_task};
    use chrono::TimeZone;

    fn ctx(policy: &dyn FixPolicy) -> SynthesisContext<'_> {
        SynthesisContext {
            backlog_id: "backlog-test".into(),
            created_by: "tests".into(),
            milestone: "m1".into(),
            deadline: None,
            first_sequence: 1,
            now: Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap(),
            policy,
        }
    }

    fn issue(category: &str, message: &str, location: Option<&str>, severity: Option<&str>) -> Issue {
        Issue {
            id: format!("issue-{}", message.len()),
            category: category.into(),
            message: message.into(),
            location: location.map(str::to_string),
            severity: severity.map(str::to_string),
            priority: None,
        }
    }

    #[test]
    fn test_firestore_rules_issue_becomes_create_task() {
        let policy = DefaultFixPolicy;
        let issues = vec![issue(
            "Security",
            "firestore.rules não encontrado",
            Some("test/firestore.rules"),
            Some("critical"),
        )];
        let backlog = synthesize(&issues, &ctx(&policy));
        assert_eq!(backlog.tasks.len(), 1);
        let task = &backlog.tasks[0];
        assert_eq!(task.fix_type, FixType::Create);
        assert!(!task.new_content.as_deref().unwrap_or("").is_empty());
        assert_eq!(task.priority, Priority::P0);
        assert_eq!(task.target_path, "test/firestore.rules");
        assert_eq!(task.category, "security");
    }

    #[test]
    fn test_missing_package_becomes_install_command() {
        let policy = DefaultFixPolicy;
        let issues = vec![issue("Dependency", "package express não encontrado", Some("package.json"), None)];
        let backlog = synthesize(&issues, &ctx(&policy));
        assert_eq!(backlog.tasks.len(), 1);
        let task = &backlog.tasks[0];
        assert_eq!(task.fix_type, FixType::Command);
        assert!(task.command.as_deref().unwrap().contains("express"));
        assert_eq!(task.priority, Priority::P3);
    }

    #[test]
    fn test_unlocated_architecture_issue_yields_nothing() {
        let policy = DefaultFixPolicy;
        let issues = vec![issue("Architecture", "Arquitetura precisa ser refatorada", None, Some("high"))];
        let backlog = synthesize(&issues, &ctx(&policy));
        assert!(backlog.tasks.is_empty());
        assert_eq!(backlog.summary.skipped, 1);
        assert_eq!(backlog.summary.candidates_generated, 0);
    }

    #[test]
    fn test_every_task_passes_contract_and_counts_add_up() {
        let policy = DefaultFixPolicy;
        let issues = vec![
            issue("Security", "firestore.rules não encontrado", Some("test/firestore.rules"), Some("critical")),
            issue("Dependency", "package express não encontrado", Some("package.json"), None),
            issue("Quality", "Unused variable foo", Some("src/a.js:3"), Some("low")),
            // Neither names a file, so there is no target path to plan for.
            issue("Quality", "Remove dead code in utils", None, Some("medium")),
            issue("Config", "config timeout should be 30", None, Some("medium")),
            issue("Imports", "Unused import of lodash", Some("src/b.js"), None),
            issue("Docs", "README.md missing", None, Some("high")),
        ];
        let backlog = synthesize(&issues, &ctx(&policy));
        for task in &backlog.tasks {
            assert!(validate_task(&task.as_document()).valid, "{:?}", task);
        }
        assert_eq!(backlog.summary.total_tasks, backlog.tasks.len());
        assert_eq!(
            backlog.summary.filtered_out,
            backlog.summary.candidates_generated - backlog.tasks.len()
        );
        assert_eq!(backlog.summary.filtered_out, 0);
        assert_eq!(backlog.summary.skipped, 3);
    }

    #[test]
    fn test_tasks_sorted_by_priority_then_effort() {
        let policy = DefaultFixPolicy;
        let issues = vec![
            issue("", "Something odd", Some("src/x.js"), Some("low")),
            issue("", "package lodash não encontrado", Some("package.json"), Some("low")),
            issue("", "docs/guide.md não encontrado", None, Some("critical")),
        ];
        let backlog = synthesize(&issues, &ctx(&policy));
        let order: Vec<_> = backlog.tasks.iter().map(|t| (t.priority, t.fix_type)).collect();
        assert_eq!(
            order,
            vec![
                (Priority::P0, FixType::Create),
                (Priority::P3, FixType::Command),
                (Priority::P3, FixType::Create),
            ]
        );
    }

    #[test]
    fn test_ids_continue_from_first_sequence() {
        let policy = DefaultFixPolicy;
        let mut context = ctx(&policy);
        context.first_sequence = 42;
        let issues = vec![issue("", "README.md missing", None, None)];
        let backlog = synthesize(&issues, &context);
        assert_eq!(backlog.tasks[0].id, "TASK-042");
    }

    #[test]
    fn test_id_range_exhaustion_skips_instead_of_wrapping() {
        let policy = DefaultFixPolicy;
        let mut context = ctx(&policy);
        context.first_sequence = u32::MAX;
        let issues = vec![
            issue("", "README.md missing", None, None),
            issue("", "CONTRIBUTING.md missing", None, None),
        ];
        let backlog = synthesize(&issues, &context);
        assert_eq!(backlog.tasks.len(), 1);
        assert_eq!(backlog.tasks[0].id, "TASK-4294967295");
        assert_eq!(backlog.summary.skipped, 1);
    }

    #[test]
    fn test_excluded_issues_are_counted() {
        let policy = DefaultFixPolicy;
        let issues = vec![issue("", "requires human decision on schema", Some("a.sql"), None)];
        let backlog = synthesize(&issues, &ctx(&policy));
        assert_eq!(backlog.summary.excluded, 1);
        assert!(backlog.tasks.is_empty());
    }

    #[test]
    fn test_dependency_inference_by_title_prefix() {
        let policy = DefaultFixPolicy;
        let issues = vec![
            issue("", "README.md missing", None, None),
            issue("", "docs/setup.md missing; link it from README.md missing section", None, None),
        ];
        let backlog = synthesize(&issues, &ctx(&policy));
        let first = backlog.tasks.iter().find(|t| t.title == "README.md missing").unwrap();
        let second = backlog.tasks.iter().find(|t| t.id != first.id).unwrap();
        assert_eq!(second.dependencies, vec![first.id.clone()]);
        assert!(first.dependencies.is_empty());
    }

    #[test]
    fn test_summary_estimates() {
        let policy = DefaultFixPolicy;
        let issues = vec![
            issue("", "README.md missing", None, None),
            issue("", "CONTRIBUTING.md missing", None, None),
            issue("", "package react não encontrado", Some("package.json"), None),
        ];
        let backlog = synthesize(&issues, &ctx(&policy));
        // S + S + XS
        assert_eq!(backlog.summary.estimated_hours, 4.5);
        assert_eq!(
            backlog.summary.estimated_completion,
            chrono::NaiveDate::from_ymd_opt(2026, 1, 7).unwrap()
        );
        assert_eq!(backlog.groups.by_type["create"].len(), 2);
        assert_eq!(backlog.groups.by_effort["XS"].len(), 1);
        assert_eq!(backlog.summary.by_priority["P3"], 3);
    }

    #[test]
    fn test_long_message_title_truncated() {
        let policy = DefaultFixPolicy;
        let message = format!("{} missing", "x".repeat(80));
        let issues = vec![issue("", &message, Some("src/long.js"), None)];
        let backlog = synthesize(&issues, &ctx(&policy));
        assert!(backlog.tasks[0].title.ends_with("..."));
        assert_eq!(backlog.tasks[0].description, message);
    }

    #[test]
    fn test_max_task_sequence() {
        let doc = Document::from(serde_json::json!({
            "tasks": [{"id": "TASK-007"}, {"id": "TASK-012"}, {"id": "weird"}]
        }));
        assert_eq!(max_task_sequence(&doc), 12);
        assert_eq!(max_task_sequence(&Document::from(serde_json::json!({}))), 0);
    }

    #[test]
    fn test_unlocated_config_and_delete_take_path_from_message() {
        let config = issue("Config", "Set timeout to 30 in app.config.json", None, None);
        let plan = plan_fix(&config).unwrap();
        assert_eq!(plan.fix_type, FixType::Config);
        assert_eq!(plan.target_path, "app.config.json");
        assert_eq!(plan.config_key.as_deref(), Some("timeout"));
        assert_eq!(plan.new_value.as_deref(), Some("30"));

        let delete = issue("Quality", "Remove dead helper src/old.js", None, None);
        let plan = plan_fix(&delete).unwrap();
        assert_eq!(plan.fix_type, FixType::Delete);
        assert_eq!(plan.target_path, "src/old.js");

        let unnamed = issue("Config", "config timeout should be 30", None, None);
        assert!(plan_fix(&unnamed).is_none());
        let unnamed = issue("Quality", "Remove dead code in utils", None, None);
        assert!(plan_fix(&unnamed).is_none());
    }

    #[test]
    fn test_plan_payload_check() {
        let mut plan = FixPlan::new(FixType::Config, TargetType::Config, "a.json".into());
        plan.config_key = Some("k".into());
        assert!(!plan.has_payload());
        plan.new_value = Some("v".into());
        assert!(plan.has_payload());
    }
}

//! Issue classification and remediation backlog generation.
//!
//! ## Module Map
//!
//! | Module   | Responsibility                                              |
//! |----------|-------------------------------------------------------------|
//! | `models` | `Issue`, `RemediationTask`, `Backlog` and their enums       |
//! | `rules`  | ordered keyword tables: buckets, fix types, payload helpers |
//! | `policy` | `FixPolicy` trait: auto-fixability and risk                  |
//! | `synth`  | pure synthesis pipeline (`synthesize`)                      |
//!
//! [`BacklogGenerator`] wires synthesis to the document store: it continues
//! task numbering from the current Backlog and guards every write with the
//! Backlog contract.

pub mod models;
pub mod policy;
pub mod rules;
pub mod synth;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::classifier;
use crate::contract::{AsDocument, validate_backlog};
use crate::errors::ContractError;
use crate::store::DocumentStore;
use models::{Backlog, Issue};
use policy::FixPolicy;
use synth::{SynthesisContext, max_task_sequence, synthesize, task_id};

/// Collection holding Backlog records.
pub const BACKLOG_COLLECTION: &str = "backlogs";

/// Key of the record that always holds the latest Backlog.
pub const CURRENT_KEY: &str = "current";

/// Per-run overrides. Unset fields fall back to the generator's defaults.
#[derive(Debug, Clone, Default)]
pub struct BacklogOptions {
    pub backlog_id: Option<String>,
    pub milestone: Option<String>,
    pub deadline: Option<String>,
}

/// Values used when a run does not override them.
#[derive(Debug, Clone)]
pub struct BacklogDefaults {
    pub created_by: String,
    pub milestone: String,
    pub deadline: Option<String>,
}

impl Default for BacklogDefaults {
    fn default() -> Self {
        Self {
            created_by: "remedy".to_string(),
            milestone: "auto-remediation".to_string(),
            deadline: None,
        }
    }
}

pub struct BacklogGenerator<'a> {
    store: &'a dyn DocumentStore,
    policy: &'a dyn FixPolicy,
    defaults: BacklogDefaults,
}

impl<'a> BacklogGenerator<'a> {
    pub fn new(store: &'a dyn DocumentStore, policy: &'a dyn FixPolicy, defaults: BacklogDefaults) -> Self {
        Self {
            store,
            policy,
            defaults,
        }
    }

    /// Read the current Backlog pointer, if any.
    pub fn load_current_backlog(&self) -> Result<Option<Backlog>> {
        let Some(doc) = self.store.get(BACKLOG_COLLECTION, CURRENT_KEY)? else {
            return Ok(None);
        };
        let json = doc.to_json("current backlog")?;
        let backlog = serde_json::from_value(json).context("Failed to parse current backlog")?;
        Ok(Some(backlog))
    }

    /// Next task sequence number: one past the current Backlog's highest.
    pub fn next_sequence(&self) -> Result<u32> {
        let current = self.store.get(BACKLOG_COLLECTION, CURRENT_KEY)?;
        let last = current.as_ref().map(max_task_sequence).unwrap_or(0);
        last.checked_add(1).ok_or_else(|| sequence_exhausted(last, 1))
    }

    /// Turn issues into a Backlog whose every task satisfies the contract.
    pub fn generate(&self, issues: &[Issue], options: BacklogOptions) -> Result<Backlog> {
        let now = Utc::now();
        let first_sequence = self.next_sequence()?;
        let last = first_sequence - 1;
        if u32::try_from(issues.len())
            .ok()
            .and_then(|n| last.checked_add(n))
            .is_none()
        {
            return Err(sequence_exhausted(last, issues.len()));
        }

        let ctx = SynthesisContext {
            backlog_id: options
                .backlog_id
                .unwrap_or_else(|| format!("backlog-{}", now.format("%Y%m%d-%H%M%S"))),
            created_by: self.defaults.created_by.clone(),
            milestone: options
                .milestone
                .unwrap_or_else(|| self.defaults.milestone.clone()),
            deadline: options.deadline.or_else(|| self.defaults.deadline.clone()),
            first_sequence,
            now,
            policy: self.policy,
        };

        let backlog = synthesize(issues, &ctx);
        info!(
            backlog_id = %backlog.backlog_id,
            issues = issues.len(),
            tasks = backlog.summary.total_tasks,
            filtered_out = backlog.summary.filtered_out,
            excluded = backlog.summary.excluded,
            "Backlog generated"
        );
        Ok(backlog)
    }

    /// Persist the run's record and overwrite the current pointer. Returns the
    /// key the run was stored under. Nothing is written unless the whole
    /// Backlog satisfies the contract.
    pub fn save_backlog(&self, backlog: &Backlog, filename: Option<&str>) -> Result<String> {
        let doc = backlog.as_document();
        let report = validate_backlog(&doc);
        if !report.valid {
            let err = anyhow::Error::new(ContractError::Violation {
                entity: backlog.backlog_id.clone(),
                errors: report.errors,
            });
            let line = classifier::log_and_format(&err, "saveBacklog", Some(&backlog.backlog_id));
            return Err(err.context(line));
        }

        let key = filename
            .map(|f| f.trim_end_matches(".json").to_string())
            .unwrap_or_else(|| backlog.backlog_id.clone());
        self.store
            .put(BACKLOG_COLLECTION, &key, &doc)
            .with_context(|| format!("Failed to store backlog {}", key))?;
        self.store
            .put(BACKLOG_COLLECTION, CURRENT_KEY, &doc)
            .context("Failed to update current backlog pointer")?;

        info!(backlog_id = %backlog.backlog_id, key = %key, "Backlog saved");
        Ok(key)
    }
}

/// Ids are `TASK-<u32>`; a stored Backlog near the top of that range cannot
/// be continued.
fn sequence_exhausted(last: u32, wanted: usize) -> anyhow::Error {
    let err = anyhow::Error::new(ContractError::Violation {
        entity: CURRENT_KEY.to_string(),
        errors: vec![format!(
            "Invalid task id sequence: {} leaves no room for {} more task id(s)",
            task_id(last),
            wanted
        )],
    });
    let line = classifier::log_and_format(&err, "generateBacklog", Some(CURRENT_KEY));
    err.context(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FsStore;
    use models::{FixType, Priority};
    use policy::DefaultFixPolicy;
    use tempfile::TempDir;

    fn issues() -> Vec<Issue> {
        vec![
            Issue {
                id: "i1".into(),
                category: "Security".into(),
                message: "firestore.rules não encontrado".into(),
                location: Some("test/firestore.rules".into()),
                severity: Some("critical".into()),
                priority: None,
            },
            Issue {
                id: "i2".into(),
                category: "Dependency".into(),
                message: "package express não encontrado".into(),
                location: Some("package.json".into()),
                severity: None,
                priority: None,
            },
        ]
    }

    #[test]
    fn test_generate_save_and_continue_numbering() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let policy = DefaultFixPolicy;
        let generator = BacklogGenerator::new(&store, &policy, BacklogDefaults::default());

        let first = generator
            .generate(&issues(), BacklogOptions {
                backlog_id: Some("run-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.tasks.len(), 2);
        assert_eq!(generator.save_backlog(&first, None).unwrap(), "run-1");

        let second = generator
            .generate(&issues(), BacklogOptions {
                backlog_id: Some("run-2".into()),
                ..Default::default()
            })
            .unwrap();
        let mut ids: Vec<_> = second.tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["TASK-003", "TASK-004"]);

        generator.save_backlog(&second, Some("custom.json")).unwrap();
        let current = generator.load_current_backlog().unwrap().unwrap();
        assert_eq!(current.backlog_id, "run-2");
        assert!(dir.path().join("backlogs/run-1.json").exists());
        assert!(dir.path().join("backlogs/custom.json").exists());
    }

    #[test]
    fn test_generate_applies_defaults_and_overrides() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let policy = DefaultFixPolicy;
        let generator = BacklogGenerator::new(&store, &policy, BacklogDefaults::default());

        let backlog = generator.generate(&issues(), BacklogOptions::default()).unwrap();
        assert_eq!(backlog.milestone, "auto-remediation");
        assert!(backlog.backlog_id.starts_with("backlog-"));

        let backlog = generator
            .generate(&issues(), BacklogOptions {
                milestone: Some("v2".into()),
                deadline: Some("2026-12-31".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(backlog.milestone, "v2");
        assert_eq!(backlog.deadline.as_deref(), Some("2026-12-31"));
        assert_eq!(backlog.tasks[0].priority, Priority::P0);
        assert_eq!(backlog.tasks[1].fix_type, FixType::Command);
    }

    #[test]
    fn test_exhausted_task_sequence_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let current = crate::contract::Document::from(serde_json::json!({
            "tasks": [{"id": "TASK-4294967295"}]
        }));
        store.put(BACKLOG_COLLECTION, CURRENT_KEY, &current).unwrap();
        let policy = DefaultFixPolicy;
        let generator = BacklogGenerator::new(&store, &policy, BacklogDefaults::default());

        let err = generator.next_sequence().unwrap_err();
        assert!(format!("{:#}", err).starts_with("CONTRACT [generateBacklog]"));
        assert!(generator.generate(&issues(), BacklogOptions::default()).is_err());
    }

    #[test]
    fn test_sequence_headroom_checked_against_issue_count() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let current = crate::contract::Document::from(serde_json::json!({
            "tasks": [{"id": "TASK-4294967294"}]
        }));
        store.put(BACKLOG_COLLECTION, CURRENT_KEY, &current).unwrap();
        let policy = DefaultFixPolicy;
        let generator = BacklogGenerator::new(&store, &policy, BacklogDefaults::default());

        assert_eq!(generator.next_sequence().unwrap(), u32::MAX);
        let err = generator
            .generate(&issues(), BacklogOptions::default())
            .unwrap_err();
        assert!(format!("{:#}", err).contains("no room for 2 more"));
        let one = generator
            .generate(&issues()[..1], BacklogOptions::default())
            .unwrap();
        assert_eq!(one.tasks[0].id, "TASK-4294967295");
    }

    #[test]
    fn test_save_refuses_invalid_backlog() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path());
        let policy = DefaultFixPolicy;
        let generator = BacklogGenerator::new(&store, &policy, BacklogDefaults::default());

        let mut backlog = generator.generate(&issues(), BacklogOptions::default()).unwrap();
        backlog.tasks[0].fix_type = FixType::Patch;
        let err = generator.save_backlog(&backlog, None).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.starts_with("CONTRACT [saveBacklog]"), "{}", msg);
        assert!(msg.contains("patch"));
        assert!(generator.load_current_backlog().unwrap().is_none());
    }
}

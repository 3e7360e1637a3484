//! Configuration for remedy, read from `.remedy/remedy.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "my-project"
//!
//! [backlog]
//! created_by = "remedy"
//! milestone = "auto-remediation"
//! deadline = "2026-12-31"
//!
//! [jobs.workflow]
//! program = "node"
//! args = ["scripts/run-workflow.js"]
//!
//! [jobs.implementation]
//! program = "node"
//! args = ["scripts/apply-remediation.js"]
//!
//! [store]
//! dir = ".remedy/store"
//! ```
//!
//! `REMEDY_WORKFLOW_CMD` and `REMEDY_IMPLEMENTATION_CMD` replace the matching
//! `[jobs.*]` command with a whitespace-separated command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backlog::BacklogDefaults;

pub const CONFIG_FILE: &str = "remedy.toml";
pub const WORKFLOW_CMD_ENV: &str = "REMEDY_WORKFLOW_CMD";
pub const IMPLEMENTATION_CMD_ENV: &str = "REMEDY_IMPLEMENTATION_CMD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
}

/// Defaults stamped onto every generated Backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacklogSection {
    #[serde(default = "default_created_by")]
    pub created_by: String,
    #[serde(default = "default_milestone")]
    pub milestone: String,
    #[serde(default)]
    pub deadline: Option<String>,
}

fn default_created_by() -> String {
    "remedy".to_string()
}

fn default_milestone() -> String {
    "auto-remediation".to_string()
}

impl Default for BacklogSection {
    fn default() -> Self {
        Self {
            created_by: default_created_by(),
            milestone: default_milestone(),
            deadline: None,
        }
    }
}

/// An external program and its fixed leading arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Parse a whitespace-separated command line. `None` when blank.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Commands behind the two supported job types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsSection {
    #[serde(default = "default_workflow")]
    pub workflow: CommandSpec,
    #[serde(default = "default_implementation")]
    pub implementation: CommandSpec,
}

fn default_workflow() -> CommandSpec {
    CommandSpec::new("node", &["scripts/run-workflow.js"])
}

fn default_implementation() -> CommandSpec {
    CommandSpec::new("node", &["scripts/apply-remediation.js"])
}

impl Default for JobsSection {
    fn default() -> Self {
        Self {
            workflow: default_workflow(),
            implementation: default_implementation(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Store root, relative to the project directory (default: `.remedy/store`)
    #[serde(default)]
    pub dir: Option<String>,
}

/// The complete remedy.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemedyToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub backlog: BacklogSection,
    #[serde(default)]
    pub jobs: JobsSection,
    #[serde(default)]
    pub store: StoreSection,
}

impl RemedyToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse remedy.toml")
    }

    /// Load `<remedy_dir>/remedy.toml`, or defaults when it doesn't exist.
    pub fn load_or_default(remedy_dir: &Path) -> Result<Self> {
        let config_path = remedy_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize remedy.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Workflow command (env → file → default).
    pub fn workflow_command(&self) -> CommandSpec {
        std::env::var(WORKFLOW_CMD_ENV)
            .ok()
            .and_then(|line| CommandSpec::parse_line(&line))
            .unwrap_or_else(|| self.jobs.workflow.clone())
    }

    /// Implementation command (env → file → default).
    pub fn implementation_command(&self) -> CommandSpec {
        std::env::var(IMPLEMENTATION_CMD_ENV)
            .ok()
            .and_then(|line| CommandSpec::parse_line(&line))
            .unwrap_or_else(|| self.jobs.implementation.clone())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, spec) in [
            ("workflow", &self.jobs.workflow),
            ("implementation", &self.jobs.implementation),
        ] {
            if spec.program.trim().is_empty() {
                warnings.push(format!("Empty program for [jobs.{}]", name));
            }
        }

        if self.backlog.milestone.trim().is_empty() {
            warnings.push("Empty milestone in [backlog]".to_string());
        }
        if self.backlog.created_by.trim().is_empty() {
            warnings.push("Empty created_by in [backlog]".to_string());
        }
        if let Some(ref deadline) = self.backlog.deadline
            && chrono::NaiveDate::parse_from_str(deadline, "%Y-%m-%d").is_err()
        {
            warnings.push(format!(
                "Invalid deadline '{}': expected YYYY-MM-DD",
                deadline
            ));
        }

        warnings
    }
}

/// Runtime configuration: the parsed file plus resolved paths and CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub remedy_dir: PathBuf,
    pub toml: RemedyToml,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let remedy_dir = project_dir.join(".remedy");
        let toml = RemedyToml::load_or_default(&remedy_dir)?;

        Ok(Self {
            project_dir,
            remedy_dir,
            toml,
            verbose,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.remedy_dir.join(CONFIG_FILE)
    }

    pub fn store_dir(&self) -> PathBuf {
        match self.toml.store.dir {
            Some(ref dir) => self.project_dir.join(dir),
            None => self.remedy_dir.join("store"),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.remedy_dir.join("logs")
    }

    pub fn backlog_defaults(&self) -> BacklogDefaults {
        BacklogDefaults {
            created_by: self.toml.backlog.created_by.clone(),
            milestone: self.toml.backlog.milestone.clone(),
            deadline: self.toml.backlog.deadline.clone(),
        }
    }

    /// Ensure the `.remedy` directory exists.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.remedy_dir).context("Failed to create .remedy directory")?;
        Ok(())
    }
}

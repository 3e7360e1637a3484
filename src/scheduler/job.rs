//! Job model: lifecycle state, captured output and the durable record shape.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::slugify;

/// Stdout lines kept in memory per job; the oldest are evicted first.
pub const OUTPUT_BUFFER_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => bail!(
                "Invalid job status '{}'. Valid values: queued, running, completed, failed, cancelled",
                s
            ),
        }
    }
}

/// Legal lifecycle moves. `queued → failed` covers faults before launch.
pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    matches!(
        (from, to),
        (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Completed)
            | (JobStatus::Running, JobStatus::Failed)
            | (JobStatus::Running, JobStatus::Cancelled)
    )
}

/// Where a job is in its lifecycle. Exit data only exists on terminal states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed {
        exit_code: i32,
        completed_at: DateTime<Utc>,
    },
    Failed {
        exit_code: Option<i32>,
        error: String,
        completed_at: DateTime<Utc>,
    },
    Cancelled {
        completed_at: DateTime<Utc>,
    },
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Queued => JobStatus::Queued,
            JobState::Running => JobStatus::Running,
            JobState::Completed { .. } => JobStatus::Completed,
            JobState::Failed { .. } => JobStatus::Failed,
            JobState::Cancelled { .. } => JobStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Bounded stdout capture.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
}

impl OutputBuffer {
    pub fn push(&mut self, line: String) {
        if self.lines.len() == OUTPUT_BUFFER_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// A job owned by this process's scheduler.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub started_at: DateTime<Utc>,
    pub options: JobOptions,
    pub output: OutputBuffer,
    pub state: JobState,
    /// Creation order, used to break `started_at` ties when draining.
    pub seq: u64,
}

impl Job {
    pub fn new(job_type: &str, options: JobOptions, seq: u64) -> Self {
        let started_at = Utc::now();
        Self {
            id: new_job_id(job_type, started_at),
            job_type: job_type.to_string(),
            started_at,
            options,
            output: OutputBuffer::default(),
            state: JobState::Queued,
            seq,
        }
    }

    /// Take ownership of a job another process recorded as queued.
    pub fn adopt(record: JobRecord, seq: u64) -> Option<Self> {
        if record.status != JobStatus::Queued {
            return None;
        }
        let mut output = OutputBuffer::default();
        for line in record.output {
            output.push(line);
        }
        Some(Self {
            id: record.id,
            job_type: record.job_type,
            started_at: record.started_at,
            options: record.options,
            output,
            state: JobState::Queued,
            seq,
        })
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    /// Move to `next`. Illegal lifecycle moves are refused and return false.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !is_valid_transition(self.status(), next.status()) {
            return false;
        }
        self.state = next;
        true
    }

    pub fn to_record(&self) -> JobRecord {
        let (completed_at, error, exit_code) = match &self.state {
            JobState::Queued | JobState::Running => (None, None, None),
            JobState::Completed {
                exit_code,
                completed_at,
            } => (Some(*completed_at), None, Some(*exit_code)),
            JobState::Failed {
                exit_code,
                error,
                completed_at,
            } => (Some(*completed_at), Some(error.clone()), *exit_code),
            JobState::Cancelled { completed_at } => (Some(*completed_at), None, None),
        };
        JobRecord {
            id: self.id.clone(),
            job_type: self.job_type.clone(),
            status: self.status(),
            started_at: self.started_at,
            completed_at,
            options: self.options.clone(),
            output: self.output.to_vec(),
            error,
            exit_code,
        }
    }
}

/// `<type-slug>-<unix millis>-<8 hex>`.
pub fn new_job_id(job_type: &str, at: DateTime<Utc>) -> String {
    let mut slug = slugify(job_type, 40);
    if slug.is_empty() {
        slug = "job".to_string();
    }
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", slug, at.timestamp_millis(), &suffix[..8])
}

/// Flat snapshot written to the `jobs` collection on every transition.
/// Unset optionals serialize as explicit null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub options: JobOptions,
    pub output: Vec<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

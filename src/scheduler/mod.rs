//! Admission-controlled launcher for external job processes.
//!
//! At most [`MAX_CONCURRENT_JOBS`] processes run at once across every
//! scheduler sharing a store. Every job gets a durable record in the `jobs`
//! collection, rewritten on each transition:
//!
//! ```text
//! queued ──► running ──► completed | failed | cancelled
//!    └─────► failed      (unsupported type, spawn fault)
//! ```
//!
//! Admission holds the job table mutex and an exclusive lock on
//! `<logs>/admission.lock` while it counts occupied slots and spawns, so no
//! two callers can take the last slot, in this process or another. A slot
//! stays occupied until the process is reaped, even after a cancel. Slots
//! held by other processes are read from their durable `running` records.
//!
//! Each running job has one supervising task that captures its output,
//! awaits exit or a kill signal, finalizes the record and then admits the
//! oldest queued job. A job can also be queued with [`JobScheduler::enqueue_job`]
//! and handed to another process, which adopts it with
//! [`JobScheduler::run_job`] and supervises it to the end.

pub mod command;
pub mod job;

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use fs2::FileExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::classifier;
use crate::config::RemedyToml;
use crate::contract::Document;
use crate::errors::SchedulerError;
use crate::store::DocumentStore;
pub use command::{JobCommands, SUPPORTED_JOB_TYPES};
pub use job::{Job, JobOptions, JobRecord, JobState, JobStatus};

pub const MAX_CONCURRENT_JOBS: usize = 3;

/// Collection holding job records.
pub const JOB_COLLECTION: &str = "jobs";

pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Lock file, under the logs directory, serializing admission.
pub const ADMISSION_LOCK_FILE: &str = "admission.lock";

/// How long a cancelled job's output pipes may take to close before capture
/// is abandoned.
const CANCEL_DRAIN_GRACE: Duration = Duration::from_secs(2);

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl JobCommands {
    pub fn from_config(toml: &RemedyToml) -> Self {
        Self {
            workflow: toml.workflow_command(),
            implementation: toml.implementation_command(),
        }
    }
}

/// Returned by [`JobScheduler::start_job`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<String, Job>,
    kills: HashMap<String, oneshot::Sender<()>>,
    /// Jobs whose process was spawned and has not been reaped yet.
    live: HashSet<String>,
    next_seq: u64,
}

impl JobTable {
    fn oldest_queued(&self) -> Option<String> {
        self.jobs
            .values()
            .filter(|job| job.status() == JobStatus::Queued)
            .min_by_key(|job| (job.started_at, job.seq))
            .map(|job| job.id.clone())
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Exclusive hold on the admission lock file, released on drop.
struct AdmissionGuard {
    _file: std::fs::File,
}

/// How a supervised process ended.
enum Exit {
    Code(Option<i32>),
    WaitFailed(String),
    Killed,
}

struct Inner {
    table: Mutex<JobTable>,
    store: Arc<dyn DocumentStore>,
    logs_dir: PathBuf,
    commands: JobCommands,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn DocumentStore>, logs_dir: &Path, commands: JobCommands) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: Mutex::new(JobTable::default()),
                store,
                logs_dir: logs_dir.to_path_buf(),
                commands,
            }),
        }
    }

    /// `(<logs>/<id>.out.log, <logs>/<id>.err.log)`.
    pub fn log_paths(&self, job_id: &str) -> (PathBuf, PathBuf) {
        (
            self.inner.logs_dir.join(format!("{}.out.log", job_id)),
            self.inner.logs_dir.join(format!("{}.err.log", job_id)),
        )
    }

    /// Create a job and launch it if a slot is free. Must be called from
    /// within a Tokio runtime.
    pub async fn start_job(&self, job_type: &str, options: JobOptions) -> Result<JobHandle, SchedulerError> {
        let mut guard = self.lock()?;
        let table = &mut *guard;
        let _admission = self.admission()?;
        let free = self.occupied_slots(table)? < MAX_CONCURRENT_JOBS;

        let seq = table.take_seq();
        let job = Job::new(job_type, options, seq);
        let id = job.id.clone();
        self.persist(&job.to_record())?;
        info!(job_id = %id, job_type, "Job queued");

        let resolved = command::resolve(job_type, &job.options, &self.inner.commands);
        table.jobs.insert(id.clone(), job);

        match resolved {
            Err(e) => self.fail_before_launch(table, &id, e),
            Ok(_) if free => self.launch(table, &id),
            Ok(_) => debug!(job_id = %id, "Concurrency ceiling reached, job stays queued"),
        }

        let status = table
            .jobs
            .get(&id)
            .map(Job::status)
            .unwrap_or(JobStatus::Queued);
        Ok(JobHandle { job_id: id, status })
    }

    /// Record a queued job without launching it, for a runner process to
    /// adopt with [`JobScheduler::run_job`]. Unsupported types still fail
    /// here.
    pub fn enqueue_job(&self, job_type: &str, options: JobOptions) -> Result<JobHandle, SchedulerError> {
        let mut job = Job::new(job_type, options, 0);
        self.persist(&job.to_record())?;
        info!(job_id = %job.id, job_type, "Job queued for hand-off");

        if let Err(e) = command::resolve(job_type, &job.options, &self.inner.commands) {
            let error = start_failure(&job.id, e);
            job.transition(JobState::Failed {
                exit_code: None,
                error,
                completed_at: Utc::now(),
            });
            self.persist(&job.to_record())?;
        }
        Ok(JobHandle {
            job_id: job.id.clone(),
            status: job.status(),
        })
    }

    /// Fail a queued job that no process owns, e.g. when its runner could
    /// not be started.
    pub fn fail_queued(&self, job_id: &str, err: SchedulerError) -> Result<JobRecord, SchedulerError> {
        let mut record = self
            .load_record(job_id)?
            .ok_or_else(|| SchedulerError::NotFound {
                id: job_id.to_string(),
            })?;
        if record.status != JobStatus::Queued {
            return Err(SchedulerError::NotQueued {
                id: job_id.to_string(),
                status: record.status.to_string(),
            });
        }
        record.status = JobStatus::Failed;
        record.error = Some(start_failure(job_id, err));
        record.completed_at = Some(Utc::now());
        self.persist(&record)?;
        Ok(record)
    }

    /// Adopt a queued job from its durable record, wait for a free slot,
    /// then supervise it until it reaches a terminal state and its process
    /// is reaped. A cancel written to the record by another process kills
    /// the job.
    pub async fn run_job(&self, job_id: &str) -> Result<JobRecord, SchedulerError> {
        let record = self
            .load_record(job_id)?
            .ok_or_else(|| SchedulerError::NotFound {
                id: job_id.to_string(),
            })?;
        let status = record.status;
        {
            let mut table = self.lock()?;
            let seq = table.take_seq();
            let job = Job::adopt(record, seq).ok_or_else(|| SchedulerError::NotQueued {
                id: job_id.to_string(),
                status: status.to_string(),
            })?;
            table.jobs.insert(job_id.to_string(), job);
        }
        info!(job_id, "Adopted queued job");

        while !self.try_admit(job_id)? {
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }

        loop {
            let record = self.get_job_status(job_id)?;
            if record.status.is_terminal() {
                if !self.lock()?.live.contains(job_id) {
                    return Ok(record);
                }
            } else if record.status == JobStatus::Running
                && self
                    .load_record(job_id)?
                    .is_some_and(|stored| stored.status == JobStatus::Cancelled)
            {
                debug!(job_id, "Cancel requested through the job record");
                if let Err(e) = self.cancel_job(job_id) {
                    debug!(job_id, error = %e, "Job ended before the cancel landed");
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// In-memory state first, else the durable record.
    pub fn get_job_status(&self, job_id: &str) -> Result<JobRecord, SchedulerError> {
        if let Some(job) = self.lock()?.jobs.get(job_id) {
            return Ok(job.to_record());
        }
        self.load_record(job_id)?.ok_or_else(|| SchedulerError::NotFound {
            id: job_id.to_string(),
        })
    }

    /// This process's jobs merged with durable-only ones, newest first.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, SchedulerError> {
        let mut records: Vec<JobRecord> = self.lock()?.jobs.values().map(Job::to_record).collect();
        let known: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        let stored = self
            .inner
            .store
            .list(JOB_COLLECTION)
            .map_err(SchedulerError::Store)?;
        for (key, doc) in stored {
            if known.contains(&key) {
                continue;
            }
            match parse_record(&key, &doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable job record"),
            }
        }

        if let Some(status) = filter.status {
            records.retain(|r| r.status == status);
        }
        records.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        records.truncate(filter.limit);
        Ok(records)
    }

    /// Cancel a running job and kill its process. A job this process does
    /// not own is only marked cancelled in its record; the process running
    /// it notices and kills it.
    pub fn cancel_job(&self, job_id: &str) -> Result<JobRecord, SchedulerError> {
        {
            let mut guard = self.lock()?;
            let table = &mut *guard;
            if let Some(job) = table.jobs.get_mut(job_id) {
                if job.status() != JobStatus::Running {
                    return Err(SchedulerError::NotRunning {
                        id: job_id.to_string(),
                        status: job.status().to_string(),
                    });
                }
                job.transition(JobState::Cancelled {
                    completed_at: Utc::now(),
                });
                self.persist_or_warn(job);
                if let Some(kill) = table.kills.remove(job_id) {
                    let _ = kill.send(());
                }
                info!(job_id, "Job cancelled");
                return Ok(job.to_record());
            }
        }

        let mut record = self
            .load_record(job_id)?
            .ok_or_else(|| SchedulerError::NotFound {
                id: job_id.to_string(),
            })?;
        if record.status != JobStatus::Running {
            return Err(SchedulerError::NotRunning {
                id: job_id.to_string(),
                status: record.status.to_string(),
            });
        }
        record.status = JobStatus::Cancelled;
        record.completed_at = Some(Utc::now());
        self.persist(&record)?;
        info!(job_id, "Cancelled job record owned by another process");
        Ok(record)
    }

    /// Poll until the job reaches a terminal state. While it is queued each
    /// poll retries admission, since slots held by other processes free up
    /// without a local exit to trigger a drain.
    pub async fn wait_for_job(&self, job_id: &str) -> Result<JobRecord, SchedulerError> {
        loop {
            let record = self.get_job_status(job_id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if record.status == JobStatus::Queued {
                let mut table = self.lock()?;
                self.drain(&mut table);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, JobTable>, SchedulerError> {
        self.inner
            .table
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned)
    }

    /// Take the cross-process admission lock. Callers hold the table mutex
    /// first.
    fn admission(&self) -> Result<AdmissionGuard, SchedulerError> {
        std::fs::create_dir_all(&self.inner.logs_dir).map_err(SchedulerError::Admission)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.inner.logs_dir.join(ADMISSION_LOCK_FILE))
            .map_err(SchedulerError::Admission)?;
        file.lock_exclusive().map_err(SchedulerError::Admission)?;
        Ok(AdmissionGuard { _file: file })
    }

    /// Unreaped processes of this scheduler plus jobs other processes have
    /// recorded as running.
    fn occupied_slots(&self, table: &JobTable) -> Result<usize, SchedulerError> {
        let stored = self
            .inner
            .store
            .list(JOB_COLLECTION)
            .map_err(SchedulerError::Store)?;
        let foreign = stored
            .iter()
            .filter(|(key, doc)| {
                !table.jobs.contains_key(key)
                    && doc.get("status").and_then(Document::as_str) == Some(JobStatus::Running.as_str())
            })
            .count();
        Ok(table.live.len() + foreign)
    }

    /// Launch an adopted job if a slot is free. Returns true once the job
    /// has left the queue, whether it launched or failed.
    fn try_admit(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let mut guard = self.lock()?;
        let table = &mut *guard;
        let _admission = self.admission()?;
        if self.occupied_slots(table)? >= MAX_CONCURRENT_JOBS {
            return Ok(false);
        }
        self.launch(table, job_id);
        Ok(table
            .jobs
            .get(job_id)
            .is_none_or(|job| job.status() != JobStatus::Queued))
    }

    fn persist(&self, record: &JobRecord) -> Result<(), SchedulerError> {
        let doc = Document::from_serialize(record)
            .context("Failed to encode job record")
            .map_err(SchedulerError::Store)?;
        self.inner
            .store
            .put(JOB_COLLECTION, &record.id, &doc)
            .map_err(SchedulerError::Store)
    }

    fn persist_or_warn(&self, job: &Job) {
        if let Err(e) = self.persist(&job.to_record()) {
            warn!(job_id = %job.id, error = %e, "Failed to persist job record");
        }
    }

    fn load_record(&self, job_id: &str) -> Result<Option<JobRecord>, SchedulerError> {
        let doc = self
            .inner
            .store
            .get(JOB_COLLECTION, job_id)
            .map_err(SchedulerError::Store)?;
        doc.map(|doc| parse_record(job_id, &doc))
            .transpose()
            .map_err(SchedulerError::Store)
    }

    fn fail_before_launch(&self, table: &mut JobTable, job_id: &str, err: SchedulerError) {
        let message = start_failure(job_id, err);
        if let Some(job) = table.jobs.get_mut(job_id)
            && job.transition(JobState::Failed {
                exit_code: None,
                error: message,
                completed_at: Utc::now(),
            })
        {
            self.persist_or_warn(job);
        }
    }

    /// Spawn a queued job's process. Caller holds the table lock and the
    /// admission lock, and has checked capacity.
    fn launch(&self, table: &mut JobTable, job_id: &str) {
        let Some(job) = table.jobs.get_mut(job_id) else {
            return;
        };
        let resolved = command::resolve(&job.job_type, &job.options, &self.inner.commands);
        let command = match resolved {
            Ok(command) => command,
            Err(e) => return self.fail_before_launch(table, job_id, e),
        };

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => {
                job.transition(JobState::Running);
                self.persist_or_warn(job);
                let (kill_tx, kill_rx) = oneshot::channel();
                table.kills.insert(job_id.to_string(), kill_tx);
                table.live.insert(job_id.to_string());
                info!(
                    job_id,
                    program = %command.program,
                    pid = child.id().unwrap_or(0),
                    "Job started"
                );
                tokio::spawn(self.clone().supervise(job_id.to_string(), child, kill_rx));
            }
            Err(e) => self.fail_before_launch(table, job_id, SchedulerError::SpawnFailed(e)),
        }
    }

    async fn supervise(self, job_id: String, mut child: Child, mut kill_rx: oneshot::Receiver<()>) {
        if let Err(e) = tokio::fs::create_dir_all(&self.inner.logs_dir).await {
            warn!(job_id = %job_id, error = %e, "Failed to create logs directory");
        }
        let (out_path, err_path) = self.log_paths(&job_id);

        let stdout_task = child.stdout.take().map(|stdout| {
            let scheduler = self.clone();
            let id = job_id.clone();
            tokio::spawn(async move {
                capture(stdout, &out_path, |line| scheduler.append_output(&id, line)).await;
            })
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                capture(stderr, &err_path, |_| {}).await;
            })
        });

        let exit = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Exit::Code(status.code()),
                Err(e) => Exit::WaitFailed(format!("Failed to wait for job process: {}", e)),
            },
            Ok(()) = &mut kill_rx => {
                if let Err(e) = child.kill().await {
                    warn!(job_id = %job_id, error = %e, "Failed to kill job process");
                }
                Exit::Killed
            }
        };

        let killed = matches!(exit, Exit::Killed);
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            if killed {
                let abort = task.abort_handle();
                if tokio::time::timeout(CANCEL_DRAIN_GRACE, task).await.is_err() {
                    abort.abort();
                }
            } else {
                let _ = task.await;
            }
        }

        self.finish(&job_id, exit);
    }

    fn append_output(&self, job_id: &str, line: &str) {
        if let Ok(mut table) = self.inner.table.lock()
            && let Some(job) = table.jobs.get_mut(job_id)
        {
            job.output.push(line.to_string());
        }
    }

    /// Record the exit, free the slot, then admit queued jobs while capacity
    /// allows.
    fn finish(&self, job_id: &str, exit: Exit) {
        let mut guard = match self.lock() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(job_id, error = %e, "Cannot finalize job");
                return;
            }
        };
        let table = &mut *guard;
        table.kills.remove(job_id);
        table.live.remove(job_id);

        if let Some(job) = table.jobs.get_mut(job_id) {
            if job.status() == JobStatus::Running {
                let completed_at = Utc::now();
                let next = match exit {
                    Exit::Code(Some(0)) => JobState::Completed {
                        exit_code: 0,
                        completed_at,
                    },
                    Exit::Code(Some(code)) => JobState::Failed {
                        exit_code: Some(code),
                        error: format!("Process exited with code {}", code),
                        completed_at,
                    },
                    Exit::Code(None) => JobState::Failed {
                        exit_code: None,
                        error: "Process terminated by signal".to_string(),
                        completed_at,
                    },
                    Exit::WaitFailed(error) => JobState::Failed {
                        exit_code: None,
                        error,
                        completed_at,
                    },
                    Exit::Killed => JobState::Cancelled { completed_at },
                };
                job.transition(next);
            }
            match &job.state {
                JobState::Completed { .. } => info!(job_id, "Job completed"),
                JobState::Failed { error, .. } => warn!(job_id, error = %error, "Job failed"),
                _ => debug!(job_id, status = %job.status(), "Job process exited"),
            }
            self.persist_or_warn(job);
        }

        self.drain(table);
    }

    fn drain(&self, table: &mut JobTable) {
        let _admission = match self.admission() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "Cannot admit queued jobs");
                return;
            }
        };
        while let Some(next) = table.oldest_queued() {
            match self.occupied_slots(table) {
                Ok(occupied) if occupied < MAX_CONCURRENT_JOBS => {}
                Ok(_) => break,
                Err(e) => {
                    warn!(error = %e, "Cannot count occupied job slots");
                    break;
                }
            }
            debug!(job_id = %next, "Admitting queued job");
            self.launch(table, &next);
        }
    }
}

/// Classified error line for a job that never got a process.
fn start_failure(job_id: &str, err: SchedulerError) -> String {
    classifier::log_and_format(&anyhow::Error::new(err), "startJob", Some(job_id))
}

fn parse_record(key: &str, doc: &Document) -> anyhow::Result<JobRecord> {
    let json = doc.to_json(key)?;
    serde_json::from_value(json).with_context(|| format!("Malformed job record {}", key))
}

/// Copy lines from a child pipe into a log file, handing each to `on_line`.
async fn capture<R: AsyncRead + Unpin>(pipe: R, log_path: &Path, mut on_line: impl FnMut(&str)) {
    let mut log = match File::create(log_path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "Failed to open job log");
            None
        }
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                if let Some(file) = log.as_mut()
                    && let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await
                {
                    warn!(path = %log_path.display(), error = %e, "Failed to write job log");
                    log = None;
                }
                on_line(line);
            }
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "Failed to read job output");
                break;
            }
        }
    }

    if let Some(mut file) = log
        && let Err(e) = file.flush().await
    {
        warn!(path = %log_path.display(), error = %e, "Failed to flush job log");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandSpec;
    use crate::store::FsStore;
    use tempfile::TempDir;

    /// Waits for `$RELEASE` to exist, then exits with `$CODE` (default 0).
    const GATED_SCRIPT: &str =
        r#"while [ ! -f "$RELEASE" ]; do sleep 0.05; done; echo "released"; exit "${CODE:-0}""#;

    fn scheduler(dir: &TempDir, workflow: CommandSpec) -> JobScheduler {
        let store: Arc<dyn DocumentStore> = Arc::new(FsStore::new(&dir.path().join("store")));
        let commands = JobCommands {
            workflow,
            implementation: CommandSpec::new("sh", &["-c", "echo applied"]),
        };
        JobScheduler::new(store, &dir.path().join("logs"), commands)
    }

    fn gated(dir: &TempDir) -> JobScheduler {
        scheduler(dir, CommandSpec::new("sh", &["-c", GATED_SCRIPT]))
    }

    fn gate(dir: &TempDir, name: &str) -> JobOptions {
        let mut options = JobOptions::default();
        options
            .env
            .insert("RELEASE".into(), dir.path().join(name).display().to_string());
        options
    }

    fn release(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), "").unwrap();
    }

    async fn wait_until_running(sched: &JobScheduler, job_id: &str) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while sched.get_job_status(job_id).unwrap().status != JobStatus::Running {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("job was never admitted");
    }

    #[tokio::test]
    async fn test_ceiling_queues_fourth_job_and_exit_promotes_one() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);

        let mut handles = Vec::new();
        for i in 0..4 {
            let handle = sched
                .start_job("workflow", gate(&dir, &format!("r{}", i)))
                .await
                .unwrap();
            handles.push(handle);
        }
        let statuses: Vec<_> = handles.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Running, JobStatus::Running, JobStatus::Running, JobStatus::Queued]
        );

        release(&dir, "r0");
        let done = sched.wait_for_job(&handles[0].job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.exit_code, Some(0));
        assert_eq!(
            sched.get_job_status(&handles[3].job_id).unwrap().status,
            JobStatus::Running
        );
        let running = sched
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Running),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(running.len(), 3);

        for i in 1..4 {
            release(&dir, &format!("r{}", i));
        }
        for handle in &handles[1..] {
            let record = sched.wait_for_job(&handle.job_id).await.unwrap();
            assert_eq!(record.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_output_ring_buffer_and_split_logs() {
        let dir = TempDir::new().unwrap();
        let script = r#"for i in $(seq 1 1005); do echo "line$i"; done; echo oops >&2"#;
        let sched = scheduler(&dir, CommandSpec::new("sh", &["-c", script]));

        let handle = sched.start_job("workflow", JobOptions::default()).await.unwrap();
        let record = sched.wait_for_job(&handle.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.output.len(), job::OUTPUT_BUFFER_LINES);
        assert_eq!(record.output[0], "line6");
        assert_eq!(record.output.last().unwrap(), "line1005");
        assert!(!record.output.iter().any(|l| l == "oops"));

        let (out_log, err_log) = sched.log_paths(&handle.job_id);
        let out = std::fs::read_to_string(out_log).unwrap();
        assert_eq!(out.lines().count(), 1005);
        assert!(out.starts_with("line1\n"));
        assert_eq!(std::fs::read_to_string(err_log).unwrap(), "oops\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_with_code() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, CommandSpec::new("sh", &["-c", "exit 3"]));
        let handle = sched.start_job("workflow", JobOptions::default()).await.unwrap();
        let record = sched.wait_for_job(&handle.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.exit_code, Some(3));
        assert!(record.error.unwrap().contains("code 3"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_recorded() {
        let dir = TempDir::new().unwrap();
        let sched = scheduler(&dir, CommandSpec::new("/nonexistent/remedy-test-binary", &[]));
        let handle = sched.start_job("workflow", JobOptions::default()).await.unwrap();
        assert_eq!(handle.status, JobStatus::Failed);

        let record = sched.get_job_status(&handle.job_id).unwrap();
        let error = record.error.unwrap();
        assert!(error.starts_with("RUNTIME [startJob]"), "{}", error);
        assert!(error.contains("Failed to spawn"));
        assert_eq!(record.exit_code, None);
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_without_launch() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        let handle = sched.start_job("deploy", JobOptions::default()).await.unwrap();
        assert_eq!(handle.status, JobStatus::Failed);
        assert!(handle.job_id.starts_with("deploy-"));

        let store = FsStore::new(&dir.path().join("store"));
        let doc = store.get(JOB_COLLECTION, &handle.job_id).unwrap().unwrap();
        let record = parse_record(&handle.job_id, &doc).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.starts_with("RUNTIME [startJob]"));
        assert!(error.contains("Unsupported job type 'deploy'"));
        assert!(!sched.log_paths(&handle.job_id).0.exists());
    }

    #[tokio::test]
    async fn test_cancel_kills_process_and_frees_slot() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);

        let mut handles = Vec::new();
        for i in 0..4 {
            let handle = sched
                .start_job("workflow", gate(&dir, &format!("c{}", i)))
                .await
                .unwrap();
            handles.push(handle);
        }
        assert_eq!(handles[3].status, JobStatus::Queued);

        let cancelled = sched.cancel_job(&handles[0].job_id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(matches!(
            sched.cancel_job(&handles[0].job_id),
            Err(SchedulerError::NotRunning { .. })
        ));
        assert!(matches!(
            sched.cancel_job(&handles[3].job_id),
            Err(SchedulerError::NotRunning { .. })
        ));

        wait_until_running(&sched, &handles[3].job_id).await;
        let record = sched.get_job_status(&handles[0].job_id).unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.exit_code, None);

        for i in 1..4 {
            release(&dir, &format!("c{}", i));
        }
        for handle in &handles[1..] {
            sched.wait_for_job(&handle.job_id).await.unwrap();
        }
    }

    /// A `running` record written by some other process.
    fn put_foreign_running(dir: &TempDir, id: &str) {
        let record = JobRecord {
            id: id.to_string(),
            job_type: "workflow".into(),
            status: JobStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            options: JobOptions::default(),
            output: vec![],
            error: None,
            exit_code: None,
        };
        let store = FsStore::new(&dir.path().join("store"));
        store
            .put(JOB_COLLECTION, id, &Document::from_serialize(&record).unwrap())
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_and_durable_only_jobs() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        let id = "workflow-1700000000000-deadbeef";

        assert!(matches!(sched.get_job_status(id), Err(SchedulerError::NotFound { .. })));
        assert!(matches!(sched.cancel_job(id), Err(SchedulerError::NotFound { .. })));

        put_foreign_running(&dir, id);

        assert_eq!(sched.get_job_status(id).unwrap().status, JobStatus::Running);
        let cancelled = sched.cancel_job(id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.completed_at.is_some());

        let listed = sched.list_jobs(&JobFilter::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_job_keeps_slot_until_reaped() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);

        let mut handles = Vec::new();
        for i in 0..3 {
            let handle = sched
                .start_job("workflow", gate(&dir, &format!("k{}", i)))
                .await
                .unwrap();
            assert_eq!(handle.status, JobStatus::Running);
            handles.push(handle);
        }

        // The killed process is reaped by its supervisor, which has not run yet.
        sched.cancel_job(&handles[0].job_id).unwrap();
        let fourth = sched.start_job("workflow", gate(&dir, "k3")).await.unwrap();
        assert_eq!(fourth.status, JobStatus::Queued);

        wait_until_running(&sched, &fourth.job_id).await;
        for i in 1..4 {
            release(&dir, &format!("k{}", i));
        }
        for handle in handles[1..].iter().chain([&fourth]) {
            let record = sched.wait_for_job(&handle.job_id).await.unwrap();
            assert_eq!(record.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_running_records_of_other_processes_fill_slots() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        for i in 0..3 {
            put_foreign_running(&dir, &format!("workflow-1700000000000-0000000{}", i));
        }

        let handle = sched.start_job("workflow", gate(&dir, "f0")).await.unwrap();
        assert_eq!(handle.status, JobStatus::Queued);

        // Cancelling a foreign record frees its slot; waiting retries admission.
        sched.cancel_job("workflow-1700000000000-00000000").unwrap();
        release(&dir, "f0");
        let record = sched.wait_for_job(&handle.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_enqueued_job_runs_in_adopting_scheduler() {
        let dir = TempDir::new().unwrap();
        let caller = gated(&dir);
        let runner = gated(&dir);

        let handle = caller
            .enqueue_job("implementation", JobOptions::default())
            .unwrap();
        assert_eq!(handle.status, JobStatus::Queued);
        assert_eq!(
            caller.get_job_status(&handle.job_id).unwrap().status,
            JobStatus::Queued
        );

        let record = runner.run_job(&handle.job_id).await.unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.output, vec!["applied".to_string()]);

        let stored = caller.get_job_status(&handle.job_id).unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.exit_code, Some(0));
        assert!(stored.completed_at.is_some());

        assert!(matches!(
            runner.run_job(&handle.job_id).await,
            Err(SchedulerError::NotQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_unsupported_type_fails_immediately() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        let handle = sched.enqueue_job("deploy", JobOptions::default()).unwrap();
        assert_eq!(handle.status, JobStatus::Failed);
        let record = sched.get_job_status(&handle.job_id).unwrap();
        assert!(record.error.unwrap().starts_with("RUNTIME [startJob]"));
    }

    #[tokio::test]
    async fn test_cancel_written_to_record_stops_adopted_job() {
        let dir = TempDir::new().unwrap();
        let caller = gated(&dir);
        let runner = gated(&dir);

        let handle = caller.enqueue_job("workflow", gate(&dir, "never")).unwrap();
        let id = handle.job_id.clone();
        let task = tokio::spawn({
            let runner = runner.clone();
            let id = id.clone();
            async move { runner.run_job(&id).await }
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while caller.get_job_status(&id).unwrap().status != JobStatus::Running {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("runner never launched the job");

        let cancelled = caller.cancel_job(&id).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);

        let record = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("runner kept the job alive")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_fail_queued_marks_orphaned_job() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        let handle = sched
            .enqueue_job("workflow", JobOptions::default())
            .unwrap();

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "runner missing");
        let record = sched
            .fail_queued(&handle.job_id, SchedulerError::SpawnFailed(io_err))
            .unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().starts_with("RUNTIME [startJob]"));
        assert!(record.completed_at.is_some());

        let again = std::io::Error::other("again");
        assert!(matches!(
            sched.fail_queued(&handle.job_id, SchedulerError::SpawnFailed(again)),
            Err(SchedulerError::NotQueued { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_rewritten_with_explicit_nulls() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        let handle = sched
            .start_job("implementation", JobOptions::default())
            .await
            .unwrap();
        sched.wait_for_job(&handle.job_id).await.unwrap();

        let store = FsStore::new(&dir.path().join("store"));
        let doc = store.get(JOB_COLLECTION, &handle.job_id).unwrap().unwrap();
        let value = doc.to_json("job").unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["exitCode"], 0);
        assert!(value["error"].is_null());
        assert!(value["completedAt"].is_string());
        assert_eq!(value["output"][0], "applied");
    }

    #[tokio::test]
    async fn test_list_jobs_filters_and_limits() {
        let dir = TempDir::new().unwrap();
        let sched = gated(&dir);
        for _ in 0..3 {
            let handle = sched
                .start_job("implementation", JobOptions::default())
                .await
                .unwrap();
            sched.wait_for_job(&handle.job_id).await.unwrap();
        }
        sched.start_job("deploy", JobOptions::default()).await.unwrap();

        let all = sched.list_jobs(&JobFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].started_at >= w[1].started_at));

        let failed = sched
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);

        let limited = sched
            .list_jobs(&JobFilter {
                status: None,
                limit: 2,
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}

//! Job commands: `remedy job`.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::debug;

use remedy::errors::SchedulerError;
use remedy::scheduler::{JobCommands as JobPrograms, JobFilter, JobOptions, JobRecord, JobScheduler, JobStatus};

use super::super::{Cli, JobCommands};
use super::open_store;

/// Output lines echoed after `--wait`.
const TAIL_LINES: usize = 20;

/// How long `job start` waits for the runner to admit the job before
/// reporting it as queued.
const HANDOFF_WAIT: Duration = Duration::from_secs(2);

pub async fn cmd_job(project_dir: &Path, cli: &Cli, command: JobCommands) -> Result<()> {
    let (config, store) = open_store(project_dir, cli.verbose)?;
    let scheduler = JobScheduler::new(store, &config.logs_dir(), JobPrograms::from_config(&config.toml));

    match command {
        JobCommands::Start {
            job_type,
            phase,
            env,
            wait,
        } => {
            let options = JobOptions {
                phase,
                env: parse_env(&env)?,
            };

            if wait {
                let handle = scheduler.start_job(&job_type, options).await?;
                println!("{} {} ({})", console::style("Job").bold().cyan(), handle.job_id, handle.status);
                if handle.status == JobStatus::Failed {
                    bail!(start_error(&scheduler, &handle.job_id)?);
                }

                let record = scheduler.wait_for_job(&handle.job_id).await?;
                print_record(&record);
                let tail = record.output.len().saturating_sub(TAIL_LINES);
                for line in &record.output[tail..] {
                    println!("  {}", line);
                }
                if record.status != JobStatus::Completed {
                    bail!(
                        "Job {} {}: {}",
                        record.id,
                        record.status,
                        record.error.as_deref().unwrap_or("no error recorded")
                    );
                }
                return Ok(());
            }

            let handle = scheduler.enqueue_job(&job_type, options)?;
            if handle.status == JobStatus::Failed {
                println!("{} {} ({})", console::style("Job").bold().cyan(), handle.job_id, handle.status);
                bail!(start_error(&scheduler, &handle.job_id)?);
            }
            if let Err(e) = spawn_runner(&config.project_dir, cli.verbose, &handle.job_id) {
                let record = scheduler.fail_queued(&handle.job_id, SchedulerError::SpawnFailed(e))?;
                bail!(record.error.unwrap_or_else(|| "Failed to start job runner".to_string()));
            }

            let record = await_handoff(&scheduler, &handle.job_id).await?;
            println!("{} {} ({})", console::style("Job").bold().cyan(), record.id, record.status);
            let (out_log, err_log) = scheduler.log_paths(&record.id);
            println!("Logs: {} / {}", out_log.display(), err_log.display());
            println!(
                "{}",
                console::style(format!(
                    "Running in the background. Check it with 'remedy job status {}'.",
                    record.id
                ))
                .dim()
            );
        }
        JobCommands::Run { job_id } => {
            let record = scheduler.run_job(&job_id).await?;
            print_record(&record);
        }
        JobCommands::Status { job_id } => {
            let record = scheduler.get_job_status(&job_id)?;
            print_record(&record);
        }
        JobCommands::List { status, limit } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()?;
            let records = scheduler.list_jobs(&JobFilter { status, limit })?;
            if records.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!("{:<45} {:<15} {:<10} {:<25} Exit", "Job", "Type", "Status", "Started");
            for record in &records {
                println!(
                    "{:<45} {:<15} {:<10} {:<25} {}",
                    record.id,
                    record.job_type,
                    style_status(record.status),
                    record.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    record
                        .exit_code
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        JobCommands::Cancel { job_id } => {
            let record = scheduler.cancel_job(&job_id)?;
            println!("{} {}", console::style("Cancelled").yellow(), record.id);
        }
    }

    Ok(())
}

/// Error text recorded for a job that failed before launch.
fn start_error(scheduler: &JobScheduler, job_id: &str) -> Result<String> {
    let record = scheduler.get_job_status(job_id)?;
    Ok(record.error.unwrap_or_else(|| "Job failed to start".to_string()))
}

/// Re-run this binary as `remedy job run <id>`, detached from the terminal,
/// so the job outlives this command.
fn spawn_runner(project_dir: &Path, verbose: bool, job_id: &str) -> std::io::Result<()> {
    let exe = std::env::current_exe()?;
    let mut runner = std::process::Command::new(exe);
    runner
        .arg("--project-dir")
        .arg(project_dir)
        .args(["job", "run", job_id])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if verbose {
        runner.arg("--verbose");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        runner.process_group(0);
    }
    let child = runner.spawn()?;
    debug!(job_id, pid = child.id(), "Job runner started");
    Ok(())
}

/// Give the runner a moment to admit the job so the printed status is real.
async fn await_handoff(scheduler: &JobScheduler, job_id: &str) -> Result<JobRecord> {
    let deadline = Instant::now() + HANDOFF_WAIT;
    loop {
        let record = scheduler.get_job_status(job_id)?;
        if record.status != JobStatus::Queued || Instant::now() >= deadline {
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| -> Result<(String, String)> {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("Invalid --env '{}': expected KEY=VALUE", pair))?;
            if key.is_empty() {
                bail!("Invalid --env '{}': empty key", pair);
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn style_status(status: JobStatus) -> String {
    let text = format!("{:<10}", status);
    match status {
        JobStatus::Completed => console::style(text).green().to_string(),
        JobStatus::Failed => console::style(text).red().to_string(),
        JobStatus::Cancelled => console::style(text).yellow().to_string(),
        JobStatus::Running => console::style(text).cyan().to_string(),
        JobStatus::Queued => text,
    }
}

fn print_record(record: &JobRecord) {
    println!();
    println!("Job:      {}", record.id);
    println!("Type:     {}", record.job_type);
    println!("Status:   {}", style_status(record.status));
    println!("Started:  {}", record.started_at);
    if let Some(completed_at) = record.completed_at {
        println!("Finished: {}", completed_at);
    }
    if let Some(code) = record.exit_code {
        println!("Exit:     {}", code);
    }
    if let Some(phase) = &record.options.phase {
        println!("Phase:    {}", phase);
    }
    if let Some(error) = &record.error {
        println!("Error:    {}", console::style(error).red());
    }
    println!("Output:   {} line(s)", record.output.len());
    println!();
}

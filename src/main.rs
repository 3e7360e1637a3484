use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "remedy")]
#[command(version, about = "Turn analyzer findings into remediation backlogs and run the jobs that apply them")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate, inspect or validate remediation backlogs
    Backlog {
        #[command(subcommand)]
        command: BacklogCommands,
    },
    /// Start, inspect or cancel background jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum BacklogCommands {
    /// Build a backlog from an issues JSON file and make it current
    Generate {
        /// JSON file holding an array of issues
        #[arg(long)]
        issues: PathBuf,

        #[arg(long)]
        backlog_id: Option<String>,

        #[arg(long)]
        milestone: Option<String>,

        /// Deadline (YYYY-MM-DD)
        #[arg(long)]
        deadline: Option<String>,

        /// Record name for this run (defaults to the backlog id)
        #[arg(long)]
        output: Option<String>,
    },
    /// Show the current backlog
    Show,
    /// Validate a backlog file, or the current backlog when omitted
    Validate { file: Option<PathBuf> },
}

#[derive(Subcommand, Clone)]
pub enum JobCommands {
    /// Start a job (workflow or implementation)
    Start {
        job_type: String,

        /// Workflow phase, passed as --phase
        #[arg(long)]
        phase: Option<String>,

        /// Extra environment for workflow jobs (KEY=VALUE, repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Stay attached until the job finishes instead of handing it to a
        /// background runner
        #[arg(long)]
        wait: bool,
    },
    /// Supervise a queued job until it ends (started by `job start`)
    #[command(hide = true)]
    Run { job_id: String },
    /// Show one job
    Status { job_id: String },
    /// List jobs, newest first
    List {
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Cancel a running job
    Cancel { job_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default remedy.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    remedy::logging::init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Backlog { command } => cmd::cmd_backlog(&project_dir, &cli, command.clone())?,
        Commands::Job { command } => cmd::cmd_job(&project_dir, &cli, command.clone()).await?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}

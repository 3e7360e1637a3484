//! Backlog generation and inspection commands: `remedy backlog`.

use anyhow::{Context, Result, bail};
use std::path::Path;

use remedy::backlog::models::{Backlog, Issue};
use remedy::backlog::policy::DefaultFixPolicy;
use remedy::backlog::{BACKLOG_COLLECTION, BacklogGenerator, BacklogOptions, CURRENT_KEY};
use remedy::contract::{BacklogReport, Document, validate_backlog};
use remedy::store::DocumentStore;

use super::super::{BacklogCommands, Cli};
use super::open_store;

pub fn cmd_backlog(project_dir: &Path, cli: &Cli, command: BacklogCommands) -> Result<()> {
    let (config, store) = open_store(project_dir, cli.verbose)?;
    let policy = DefaultFixPolicy;
    let generator = BacklogGenerator::new(store.as_ref(), &policy, config.backlog_defaults());

    match command {
        BacklogCommands::Generate {
            issues,
            backlog_id,
            milestone,
            deadline,
            output,
        } => {
            let issues = read_issues(&issues)?;
            let backlog = generator.generate(&issues, BacklogOptions {
                backlog_id,
                milestone,
                deadline,
            })?;
            let key = generator.save_backlog(&backlog, output.as_deref())?;

            println!();
            println!(
                "{} {} ({} issues in)",
                console::style("Backlog").bold().cyan(),
                backlog.backlog_id,
                issues.len()
            );
            print_summary(&backlog);
            println!("Saved as: {}/{}", BACKLOG_COLLECTION, key);
            println!();
        }
        BacklogCommands::Show => match generator.load_current_backlog()? {
            Some(backlog) => {
                println!();
                println!("{} {}", console::style("Backlog").bold().cyan(), backlog.backlog_id);
                println!("Created: {} by {}", backlog.created_at, backlog.created_by);
                println!("Milestone: {}", backlog.milestone);
                if let Some(deadline) = &backlog.deadline {
                    println!("Deadline: {}", deadline);
                }
                print_summary(&backlog);
                print_tasks(&backlog);
            }
            None => {
                println!();
                println!("No current backlog. Run 'remedy backlog generate --issues <file>' first.");
                println!();
            }
        },
        BacklogCommands::Validate { file } => {
            let (label, doc) = match file {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let value: serde_json::Value = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse {}", path.display()))?;
                    (path.display().to_string(), Document::from(value))
                }
                None => match store.get(BACKLOG_COLLECTION, CURRENT_KEY)? {
                    Some(doc) => ("current backlog".to_string(), doc),
                    None => bail!("No current backlog to validate"),
                },
            };
            let report = validate_backlog(&doc);
            print_report(&label, &report);
            if !report.valid {
                bail!("Backlog {} failed validation with {} error(s)", label, report.errors.len());
            }
        }
    }

    Ok(())
}

/// Accept either a bare array of issues or `{"issues": [...]}`.
fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read issues file {}", path.display()))?;
    let mut value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse issues file {}", path.display()))?;
    if let Some(inner) = value.get_mut("issues") {
        value = inner.take();
    }
    serde_json::from_value(value)
        .with_context(|| format!("Issues file {} is not an array of issues", path.display()))
}

fn print_summary(backlog: &Backlog) {
    let s = &backlog.summary;
    println!();
    println!(
        "Tasks: {}  (candidates {}, filtered out {}, excluded {}, skipped {})",
        console::style(s.total_tasks).bold(),
        s.candidates_generated,
        s.filtered_out,
        s.excluded,
        s.skipped
    );
    let by_priority: Vec<String> = s
        .by_priority
        .iter()
        .map(|(p, n)| format!("{}={}", p, n))
        .collect();
    if !by_priority.is_empty() {
        println!("By priority: {}", by_priority.join(" "));
    }
    println!(
        "Estimate: {:.1}h, completion {}",
        s.estimated_hours, s.estimated_completion
    );
}

fn print_tasks(backlog: &Backlog) {
    if backlog.tasks.is_empty() {
        println!();
        return;
    }
    println!();
    println!("{:<10} {:<4} {:<8} {:<7} Title", "Task", "Pri", "Fix", "Risk");
    println!("{:<10} {:<4} {:<8} {:<7} -----", "----------", "---", "-------", "------");
    for task in &backlog.tasks {
        let approval = if task.requires_approval {
            console::style(" (approval)").yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "{:<10} {:<4} {:<8} {:<7} {}{}",
            task.id, task.priority, task.fix_type, task.risk_level, task.title, approval
        );
        if !task.dependencies.is_empty() {
            println!(
                "{:<10} {}",
                "",
                console::style(format!("after {}", task.dependencies.join(", "))).dim()
            );
        }
    }
    println!();
}

fn print_report(label: &str, report: &BacklogReport) {
    println!();
    if report.valid {
        println!("{} {}", console::style("Valid:").green().bold(), label);
    } else {
        println!("{} {}", console::style("Invalid:").red().bold(), label);
        for error in &report.errors {
            println!("  - {}", error);
        }
        if !report.invalid_tasks.is_empty() {
            println!("Invalid tasks: {}", report.invalid_tasks.join(", "));
        }
    }
    println!();
}

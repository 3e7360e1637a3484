//! Whitelist of launchable job types.

use std::collections::BTreeMap;

use crate::config::CommandSpec;
use crate::errors::SchedulerError;

use super::job::JobOptions;

pub const SUPPORTED_JOB_TYPES: &[&str] = &["workflow", "implementation"];

/// Commands the scheduler is allowed to run, one per job type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommands {
    pub workflow: CommandSpec,
    pub implementation: CommandSpec,
}

/// A fully resolved launch: program, argv and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

pub fn resolve(
    job_type: &str,
    options: &JobOptions,
    commands: &JobCommands,
) -> Result<JobCommand, SchedulerError> {
    match job_type {
        "workflow" => {
            let mut args = commands.workflow.args.clone();
            if let Some(ref phase) = options.phase {
                args.push("--phase".to_string());
                args.push(phase.clone());
            }
            Ok(JobCommand {
                program: commands.workflow.program.clone(),
                args,
                env: options.env.clone(),
            })
        }
        "implementation" => Ok(JobCommand {
            program: commands.implementation.program.clone(),
            args: commands.implementation.args.clone(),
            env: BTreeMap::new(),
        }),
        other => Err(SchedulerError::UnsupportedJobType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> JobCommands {
        JobCommands {
            workflow: CommandSpec::new("node", &["scripts/run-workflow.js"]),
            implementation: CommandSpec::new("node", &["scripts/apply-remediation.js"]),
        }
    }

    #[test]
    fn test_workflow_with_phase_and_env() {
        let mut options = JobOptions {
            phase: Some("analysis".into()),
            ..Default::default()
        };
        options.env.insert("TARGET".into(), "api".into());
        let cmd = resolve("workflow", &options, &commands()).unwrap();
        assert_eq!(cmd.program, "node");
        assert_eq!(cmd.args, vec!["scripts/run-workflow.js", "--phase", "analysis"]);
        assert_eq!(cmd.env.get("TARGET").map(String::as_str), Some("api"));
    }

    #[test]
    fn test_implementation_ignores_workflow_options() {
        let options = JobOptions {
            phase: Some("analysis".into()),
            ..Default::default()
        };
        let cmd = resolve("implementation", &options, &commands()).unwrap();
        assert_eq!(cmd.args, vec!["scripts/apply-remediation.js"]);
    }

    #[test]
    fn test_unsupported_type() {
        let err = resolve("deploy", &JobOptions::default(), &commands()).unwrap_err();
        assert!(matches!(err, SchedulerError::UnsupportedJobType(ref t) if t == "deploy"));
    }
}

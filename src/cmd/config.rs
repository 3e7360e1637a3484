//! Configuration view and validation commands: `remedy config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use remedy::config::{CONFIG_FILE, Config, RemedyToml};

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("{}", console::style("Remedy Configuration").bold().cyan());
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let toml = &config.toml;
            if let Some(name) = &toml.project.name {
                println!("[project]");
                println!("  name = \"{}\"", name);
                println!();
            }

            println!("[backlog]");
            println!("  created_by = \"{}\"", toml.backlog.created_by);
            println!("  milestone = \"{}\"", toml.backlog.milestone);
            if let Some(deadline) = &toml.backlog.deadline {
                println!("  deadline = \"{}\"", deadline);
            }
            println!();

            println!("[jobs]");
            println!("  workflow = \"{}\"", toml.jobs.workflow.display());
            println!("  implementation = \"{}\"", toml.jobs.implementation.display());
            println!();

            println!("Effective values (with env overrides):");
            println!("  workflow = \"{}\"", toml.workflow_command().display());
            println!("  implementation = \"{}\"", toml.implementation_command().display());
            println!("  store = {}", config.store_dir().display());
            println!("  logs = {}", config.logs_dir().display());
            println!();

            if !config_path.exists() {
                println!("Run 'remedy config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            config.ensure_directories()?;
            RemedyToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [backlog] created_by, milestone, deadline");
            println!("  - [jobs.workflow] and [jobs.implementation] program, args");
            println!("  - [store] dir");
            println!();
        }
    }

    Ok(())
}

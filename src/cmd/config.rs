//! Configuration view and validation commands: `devflow config`.

use anyhow::{Context, Result};
use std::path::Path;

use devflow::EngineConfig;
use devflow::config::DEVFLOW_DIR;

use super::load_config;
use crate::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let devflow_dir = project_dir.join(DEVFLOW_DIR);
    let config_path = devflow_dir.join("devflow.toml");

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Devflow Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No devflow.toml found at {}; using defaults.", config_path.display());
            }
            println!();

            // File, .env and process environment already applied
            let config = load_config(cli, project_dir)?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            let executor = config.executor();
            println!("Effective executor ({} profile):", config.environment);
            println!("  command = \"{}\"", executor.command);
            println!("  model = \"{}\"", executor.model);
            println!("  max_tokens = {}", executor.max_tokens);
            println!("  temperature = {}", executor.temperature);
            println!("  timeout_secs = {}", executor.timeout_secs);
            println!();

            if !config_path.exists() {
                println!("Run 'devflow config init' to create a devflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No devflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = EngineConfig::load(&config_path)?;
            let warnings = config.validate();

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
                println!("devflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&devflow_dir)
                .with_context(|| format!("Failed to create {}", devflow_dir.display()))?;

            EngineConfig::default().save(&config_path)?;

            println!("Created devflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - environment and [executor] command, model, budgets");
            println!("  - [retry], [timeouts], [rate_limit] and [approval] policies");
            println!("  - [notification] channels and [workflow] template");
            println!();
        }
    }

    Ok(())
}

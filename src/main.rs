use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "devflow")]
#[command(version, about = "Durable multi-stage orchestrator for code-generation agent runs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Deployment profile (development, staging, production). Overrides DEVFLOW_ENV.
    #[arg(long, global = true)]
    pub env: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a stage pipeline against the project
    Run {
        /// Built-in template: llm-wrapper, api, frontend
        #[arg(short, long)]
        template: Option<String>,

        /// JSON file with an explicit stage list
        #[arg(long)]
        stages_file: Option<PathBuf>,

        /// Stages to leave out (comma-separated)
        #[arg(long, value_delimiter = ',')]
        skip: Vec<String>,

        /// Approve every gate automatically
        #[arg(long)]
        yes: bool,

        /// Prompt in this terminal when a gate is pending
        #[arg(short, long)]
        interactive: bool,
    },
    /// Iteratively fix an issue until the tests pass
    Fix {
        issue: String,

        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Develop independent features concurrently
    Parallel {
        #[arg(required = true)]
        features: Vec<String>,
    },
    /// Approve the pending gate of a run
    Approve { run_id: String },
    /// Reject the pending gate of a run
    Reject { run_id: String },
    /// Show a run's state, or list runs
    Status {
        run_id: Option<String>,

        /// Print the raw state view as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the stages a template expands to
    Stages {
        #[arg(short, long)]
        template: Option<String>,
    },
    /// View, validate or initialise configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default devflow.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    devflow::logging::init(cli.log_json, cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            template,
            stages_file,
            skip,
            yes,
            interactive,
        } => {
            let options = cmd::run::PipelineOptions {
                template: template.clone(),
                stages_file: stages_file.clone(),
                skip: skip.clone(),
                auto_approve: *yes,
                interactive: *interactive,
            };
            cmd::cmd_run(&cli, &project_dir, options).await?;
        }
        Commands::Fix { issue, max_iterations } => {
            cmd::cmd_fix(&cli, &project_dir, issue, *max_iterations).await?;
        }
        Commands::Parallel { features } => {
            cmd::cmd_parallel(&cli, &project_dir, features).await?;
        }
        Commands::Approve { run_id } => {
            cmd::cmd_signal(&project_dir, run_id, devflow::Decision::Approve)?;
        }
        Commands::Reject { run_id } => {
            cmd::cmd_signal(&project_dir, run_id, devflow::Decision::Reject)?;
        }
        Commands::Status { run_id, json } => cmd::cmd_status(&project_dir, run_id.as_deref(), *json)?,
        Commands::Stages { template } => cmd::cmd_stages(&cli, &project_dir, template.as_deref())?,
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}

//! CLI command implementations.
//!
//! | Module    | Commands handled                  |
//! |-----------|-----------------------------------|
//! | `run`     | `Run`, `Fix`, `Parallel`          |
//! | `signal`  | `Approve`, `Reject`, `Status`     |
//! | `stages`  | `Stages`                          |
//! | `config`  | `Config`                          |

pub mod config;
pub mod run;
pub mod signal;
pub mod stages;

pub use config::cmd_config;
pub use run::{cmd_fix, cmd_parallel, cmd_run};
pub use signal::{cmd_signal, cmd_status};
pub use stages::cmd_stages;

use anyhow::Result;
use devflow::EngineConfig;
use std::path::Path;

use super::Cli;

/// Effective configuration for a command: file, environment, then flags.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<EngineConfig> {
    let mut config = EngineConfig::resolve(project_dir)?;
    if let Some(ref env) = cli.env {
        config.environment = env.parse()?;
    }
    Ok(config)
}

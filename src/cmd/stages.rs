use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use devflow::stage::{StageConfig, StagesFile, TEMPLATE_NAMES};

use super::load_config;
use crate::Cli;

/// Print the pipeline `devflow run` would execute.
pub fn cmd_stages(cli: &Cli, project_dir: &Path, template: Option<&str>) -> Result<()> {
    let config = load_config(cli, project_dir)?;

    let (source, base) = match (template, &config.workflow.stages_file) {
        (None, Some(path)) => (
            path.display().to_string(),
            StageConfig::new(StagesFile::load(path)?.stages),
        ),
        _ => {
            let name = template.unwrap_or(&config.workflow.template);
            if !TEMPLATE_NAMES.contains(&name) {
                bail!("Unknown template '{}'. Available: {}", name, TEMPLATE_NAMES.join(", "));
            }
            (format!("template {name}"), StageConfig::for_template(name))
        }
    };

    let stages = base
        .skip(config.workflow.skip_stages.clone())
        .with_custom_prompts(config.workflow.custom_prompts.clone())
        .stages(project_dir);

    println!("{} ({} stages)", style(source).bold(), stages.len());
    for (index, stage) in stages.iter().enumerate() {
        let mut flags = Vec::new();
        if stage.critical_path {
            flags.push("critical");
        }
        if stage.requires_approval {
            flags.push("approval");
        }
        if stage.skip_tests {
            flags.push("no-tests");
        }
        println!(
            "  {}. {:<20} {:>6} tokens  {}",
            index + 1,
            stage.name,
            stage.max_tokens,
            style(flags.join(", ")).dim()
        );
    }
    Ok(())
}

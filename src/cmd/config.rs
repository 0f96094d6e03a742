//! Configuration view and validation: `stagegate config`.

use anyhow::Result;

use stagegate::config::{Config, LogFormat};

use super::Output;
use crate::ConfigCommands;

pub fn cmd_config(config: &Config, command: Option<ConfigCommands>, out: &Output) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            out.emit(config.toml(), |toml| {
                println!();
                println!("Stagegate Configuration");
                println!("=======================");
                println!();
                println!("[storage]");
                println!("  base_path = \"{}\"", config.base_path.display());
                println!("  database = \"{}\"", config.database_path.display());
                println!("  busy_timeout_secs = {}", toml.storage.busy_timeout_secs);
                println!();
                println!("[execution]");
                println!(
                    "  default_max_revision_iterations = {}",
                    config.limits.default_max_revision_iterations
                );
                println!(
                    "  max_revision_iterations_limit = {}",
                    config.limits.max_revision_iterations_limit
                );
                println!();
                println!("[artifacts]");
                println!("  preview_max_bytes = {}", config.limits.preview_max_bytes);
                println!(
                    "  inline_previous_max_bytes = {}",
                    config.limits.inline_previous_max_bytes
                );
                println!();
                println!("[logging]");
                println!("  level = \"{}\"", config.log_level);
                let format = match config.log_format {
                    LogFormat::Pretty => "pretty",
                    LogFormat::Json => "json",
                };
                println!("  format = \"{}\"", format);
                println!("  directory = \"{}\"", config.log_dir().display());
                println!();
            })?;
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            out.emit(&warnings, |warnings| {
                println!();
                if warnings.is_empty() {
                    println!("Configuration is valid.");
                } else {
                    println!("Configuration warnings:");
                    for warning in warnings {
                        println!("  - {}", warning);
                    }
                }
                println!();
            })?;
        }
    }
    Ok(())
}

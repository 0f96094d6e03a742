//! `stagegate init`.

use anyhow::Result;
use std::path::Path;

use stagegate::config::{CONFIG_FILE_NAME, Config, StagegateToml};
use stagegate::db::Store;

pub fn cmd_init(project_dir: &Path, config: &Config) -> Result<()> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let created = if config_path.exists() {
        false
    } else {
        StagegateToml::default().save(&config_path)?;
        true
    };

    config.ensure_directories()?;
    Store::open(&config.database_path, config.busy_timeout)?;

    if created {
        println!("Initialized stagegate project at {}", project_dir.display());
        println!();
        println!("Created:");
        println!("  {}", config_path.display());
        println!("  {}/", config.base_path.display());
        println!("  └── .pipeline_system/logs/");
        println!("  {}", config.database_path.display());
        println!();
        println!("Next steps:");
        println!("  1. Write a pipeline definition (TOML)");
        println!("  2. Run `stagegate pipeline import <file>`");
        println!("  3. Run `stagegate run create <pipeline-id>`");
    } else {
        println!(
            "Stagegate project already initialized at {}",
            project_dir.display()
        );
        println!("Storage layout and database verified.");
    }
    Ok(())
}

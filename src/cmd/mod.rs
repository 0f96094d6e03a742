//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled      |
//! |-------------|-----------------------|
//! | `init`      | `Init`                |
//! | `config`    | `Config`              |
//! | `pipeline`  | `Pipeline`            |
//! | `run`       | `Run`                 |
//! | `exec`      | `Exec`                |
//! | `rollback`  | `Rollback`            |

pub mod config;
pub mod exec;
pub mod init;
pub mod pipeline;
pub mod rollback;
pub mod run;

pub use config::cmd_config;
pub use exec::cmd_exec;
pub use init::cmd_init;
pub use pipeline::cmd_pipeline;
pub use rollback::cmd_rollback;
pub use run::cmd_run;

use anyhow::{Context, Result};
use serde::Serialize;

/// Output mode shared by every command.
pub struct Output {
    pub json: bool,
    pub yes: bool,
}

impl Output {
    /// Print `value` as JSON in `--json` mode, otherwise with `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{}", text);
        } else {
            human(value);
        }
        Ok(())
    }
}

/// Short form of a uuid for tables.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

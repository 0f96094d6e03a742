//! Configuration loading for stagegate.
//!
//! Values are layered: built-in defaults, then `stagegate.toml`, then
//! `STAGEGATE_*` environment variables (a `.env` file is honored by the
//! binary), then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "stagegate.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagegateToml {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// Root of the hierarchical file store.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// SQLite file; relative paths resolve against `base_path`.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./pipelines")
}

fn default_database() -> PathBuf {
    PathBuf::from("pipeline_system.db")
}

fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            database: default_database(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_max_revision_iterations")]
    pub default_max_revision_iterations: u32,
    /// Highest revision limit a checkpoint definition may declare.
    #[serde(default = "default_max_revision_iterations_limit")]
    pub max_revision_iterations_limit: u32,
}

fn default_max_revision_iterations() -> u32 {
    3
}

fn default_max_revision_iterations_limit() -> u32 {
    5
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            default_max_revision_iterations: default_max_revision_iterations(),
            max_revision_iterations_limit: default_max_revision_iterations_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_preview_max_bytes")]
    pub preview_max_bytes: u64,
    #[serde(default = "default_inline_previous_max_bytes")]
    pub inline_previous_max_bytes: u64,
}

fn default_preview_max_bytes() -> u64 {
    1024 * 1024
}

fn default_inline_previous_max_bytes() -> u64 {
    10 * 1024
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            preview_max_bytes: default_preview_max_bytes(),
            inline_previous_max_bytes: default_inline_previous_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl StagegateToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stagegate.toml")
    }

    /// Load `stagegate.toml` from `dir`, falling back to defaults when absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stagegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `STAGEGATE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("STAGEGATE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(base);
        }
        if let Some(db) = lookup("STAGEGATE_DATABASE") {
            self.storage.database = PathBuf::from(db);
        }
        if let Some(level) = lookup("STAGEGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(max) = lookup("STAGEGATE_MAX_REVISION_ITERATIONS") {
            self.execution.default_max_revision_iterations = max
                .parse()
                .with_context(|| format!("Invalid STAGEGATE_MAX_REVISION_ITERATIONS: {}", max))?;
        }
        Ok(())
    }
}

/// Limits consulted by the core while executing operations.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub default_max_revision_iterations: u32,
    pub max_revision_iterations_limit: u32,
    pub preview_max_bytes: u64,
    pub inline_previous_max_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            default_max_revision_iterations: default_max_revision_iterations(),
            max_revision_iterations_limit: default_max_revision_iterations_limit(),
            preview_max_bytes: default_preview_max_bytes(),
            inline_previous_max_bytes: default_inline_previous_max_bytes(),
        }
    }
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_path: PathBuf,
    pub database_path: PathBuf,
    pub busy_timeout: Duration,
    pub limits: Limits,
    pub log_level: String,
    pub log_format: LogFormat,
    pub verbose: bool,
    pub yes: bool,
    toml: StagegateToml,
}

impl Config {
    /// Resolve configuration from `project_dir/stagegate.toml`, the process
    /// environment and CLI overrides.
    pub fn load(
        project_dir: &Path,
        base_path: Option<PathBuf>,
        verbose: bool,
        yes: bool,
    ) -> Result<Self> {
        let mut toml = StagegateToml::load_or_default(project_dir)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        if let Some(base) = base_path {
            toml.storage.base_path = base;
        } else if toml.storage.base_path.is_relative() {
            toml.storage.base_path = project_dir.join(&toml.storage.base_path);
        }
        Ok(Self::from_toml(toml, verbose, yes))
    }

    pub fn from_toml(toml: StagegateToml, verbose: bool, yes: bool) -> Self {
        let base_path = toml.storage.base_path.clone();
        let database_path = if toml.storage.database.is_absolute() {
            toml.storage.database.clone()
        } else {
            base_path.join(&toml.storage.database)
        };
        let log_level = if verbose {
            "debug".to_string()
        } else {
            toml.logging.level.clone()
        };
        Self {
            base_path,
            database_path,
            busy_timeout: Duration::from_secs(toml.storage.busy_timeout_secs),
            limits: Limits {
                default_max_revision_iterations: toml.execution.default_max_revision_iterations,
                max_revision_iterations_limit: toml.execution.max_revision_iterations_limit,
                preview_max_bytes: toml.artifacts.preview_max_bytes,
                inline_previous_max_bytes: toml.artifacts.inline_previous_max_bytes,
            },
            log_level,
            log_format: toml.logging.format,
            verbose,
            yes,
            toml,
        }
    }

    /// Configuration rooted at `base_path` with every other value defaulted.
    pub fn for_base_path(base_path: impl Into<PathBuf>) -> Self {
        let mut toml = StagegateToml::default();
        toml.storage.base_path = base_path.into();
        Self::from_toml(toml, false, false)
    }

    pub fn toml(&self) -> &StagegateToml {
        &self.toml
    }

    /// Internal directory for logs and bookkeeping.
    pub fn system_dir(&self) -> PathBuf {
        self.base_path.join(".pipeline_system")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.system_dir().join("logs")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_path).with_context(|| {
            format!("Failed to create base directory: {}", self.base_path.display())
        })?;
        std::fs::create_dir_all(self.log_dir()).context("Failed to create log directory")?;
        Ok(())
    }

    /// Non-fatal configuration problems.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.limits.default_max_revision_iterations > self.limits.max_revision_iterations_limit
        {
            warnings.push(format!(
                "default_max_revision_iterations ({}) exceeds max_revision_iterations_limit ({})",
                self.limits.default_max_revision_iterations,
                self.limits.max_revision_iterations_limit
            ));
        }
        if self.busy_timeout.is_zero() {
            warnings.push(
                "busy_timeout_secs is 0: concurrent writers will fail immediately".to_string(),
            );
        }
        if tracing_subscriber::EnvFilter::try_new(&self.log_level).is_err() {
            warnings.push(format!("Invalid log level '{}'", self.log_level));
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_file_missing() -> Result<()> {
        let dir = tempdir()?;
        let toml = StagegateToml::load_or_default(dir.path())?;
        assert_eq!(toml.storage.base_path, PathBuf::from("./pipelines"));
        assert_eq!(toml.storage.busy_timeout_secs, 30);
        assert_eq!(toml.execution.default_max_revision_iterations, 3);
        assert_eq!(toml.artifacts.preview_max_bytes, 1024 * 1024);
        assert_eq!(toml.logging.format, LogFormat::Pretty);
        Ok(())
    }

    #[test]
    fn test_parse_partial_file() -> Result<()> {
        let toml = StagegateToml::parse(
            r#"
            [storage]
            base_path = "/srv/pipelines"

            [logging]
            format = "json"
            "#,
        )?;
        assert_eq!(toml.storage.base_path, PathBuf::from("/srv/pipelines"));
        assert_eq!(toml.storage.database, PathBuf::from("pipeline_system.db"));
        assert_eq!(toml.logging.format, LogFormat::Json);
        assert_eq!(toml.logging.level, "info");
        Ok(())
    }

    #[test]
    fn test_env_overrides_file() -> Result<()> {
        let mut toml = StagegateToml::parse("[execution]\ndefault_max_revision_iterations = 2")?;
        let env: HashMap<&str, &str> = [
            ("STAGEGATE_MAX_REVISION_ITERATIONS", "4"),
            ("STAGEGATE_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();
        toml.apply_env(|k| env.get(k).map(|v| v.to_string()))?;
        assert_eq!(toml.execution.default_max_revision_iterations, 4);
        assert_eq!(toml.logging.level, "warn");
        Ok(())
    }

    #[test]
    fn test_env_rejects_non_numeric_revisions() {
        let mut toml = StagegateToml::default();
        let result = toml.apply_env(|k| {
            (k == "STAGEGATE_MAX_REVISION_ITERATIONS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_database_resolves_against_base_path() {
        let config = Config::for_base_path("/data/pipes");
        assert_eq!(
            config.database_path,
            PathBuf::from("/data/pipes/pipeline_system.db")
        );
        assert_eq!(
            config.log_dir(),
            PathBuf::from("/data/pipes/.pipeline_system/logs")
        );
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = Config::from_toml(StagegateToml::default(), true, false);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validate_flags_default_above_limit() {
        let mut toml = StagegateToml::default();
        toml.execution.default_max_revision_iterations = 9;
        let config = Config::from_toml(toml, false, false);
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("exceeds"));
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let dir = tempdir()?;
        let mut toml = StagegateToml::default();
        toml.storage.busy_timeout_secs = 5;
        toml.save(&dir.path().join(CONFIG_FILE_NAME))?;
        let loaded = StagegateToml::load_or_default(dir.path())?;
        assert_eq!(loaded.storage.busy_timeout_secs, 5);
        Ok(())
    }
}

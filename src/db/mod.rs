//! SQLite persistence for definitions, runs, executions, artifacts and the
//! rollback ledger.
//!
//! Row functions take `&Connection` so they run unchanged inside a
//! [`Transaction`]. Mutating core operations open their transaction with
//! [`Store::begin_immediate`], which takes SQLite's write lock before any
//! state is read; two writers touching the same run can never interleave.

pub mod artifacts;
pub mod definitions;
pub mod events;
pub mod executions;
pub mod rollbacks;
pub mod runs;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("Failed to enable WAL journal")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction holding SQLite's reserved lock from the first
    /// statement on.
    pub fn begin_immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin immediate transaction")
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS pipelines (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    checkpoint_order TEXT NOT NULL DEFAULT '[]',
                    auto_advance INTEGER NOT NULL DEFAULT 0,
                    definition_version INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    execution_mode TEXT NOT NULL,
                    interaction_policy TEXT NOT NULL,
                    output_artifacts TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    run_version INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'not_started',
                    current_checkpoint_id TEXT,
                    current_checkpoint_position INTEGER,
                    previous_run_id TEXT,
                    extends_from_run_version INTEGER,
                    checkpoint_order TEXT NOT NULL,
                    definition_version INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    paused_at TEXT,
                    last_resumed_at TEXT,
                    completed_at TEXT,
                    failed_at TEXT,
                    UNIQUE(pipeline_id, run_version)
                );

                CREATE TABLE IF NOT EXISTS checkpoint_executions (
                    id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
                    checkpoint_id TEXT NOT NULL REFERENCES checkpoints(id),
                    checkpoint_position INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    attempt_number INTEGER NOT NULL DEFAULT 1,
                    max_attempts INTEGER NOT NULL DEFAULT 1,
                    revision_iteration INTEGER NOT NULL DEFAULT 0,
                    max_revision_iterations INTEGER NOT NULL,
                    temp_workspace_path TEXT NOT NULL,
                    permanent_output_path TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    failed_at TEXT,
                    UNIQUE(run_id, checkpoint_position)
                );

                CREATE TABLE IF NOT EXISTS artifacts (
                    id TEXT PRIMARY KEY,
                    execution_id TEXT NOT NULL REFERENCES checkpoint_executions(id) ON DELETE CASCADE,
                    artifact_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    format TEXT NOT NULL,
                    file_path TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL DEFAULT 0,
                    checksum TEXT NOT NULL,
                    promoted_to_permanent_at TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE(execution_id, name)
                );

                CREATE TABLE IF NOT EXISTS human_interactions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    execution_id TEXT NOT NULL REFERENCES checkpoint_executions(id) ON DELETE CASCADE,
                    interaction_type TEXT NOT NULL,
                    user_input TEXT,
                    system_response TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS rollback_events (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    rollback_type TEXT NOT NULL,
                    source_run_id TEXT NOT NULL,
                    source_run_version INTEGER NOT NULL,
                    target_run_id TEXT NOT NULL,
                    target_run_version INTEGER NOT NULL,
                    target_checkpoint_id TEXT NOT NULL,
                    target_checkpoint_position INTEGER NOT NULL,
                    archive_location TEXT NOT NULL,
                    trigger_type TEXT NOT NULL,
                    user_reason TEXT,
                    rolled_back_items TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS archived_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    rollback_event_id TEXT NOT NULL REFERENCES rollback_events(id) ON DELETE CASCADE,
                    item_type TEXT NOT NULL,
                    item_id TEXT NOT NULL,
                    original_path TEXT NOT NULL,
                    archived_path TEXT NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    checksum TEXT,
                    archived_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_type TEXT NOT NULL,
                    pipeline_id TEXT,
                    run_id TEXT,
                    execution_id TEXT,
                    checkpoint_id TEXT,
                    rollback_event_id TEXT,
                    description TEXT NOT NULL DEFAULT '',
                    metadata TEXT NOT NULL DEFAULT '{}',
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_checkpoints_pipeline ON checkpoints(pipeline_id);
                CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline_id, run_version);
                CREATE INDEX IF NOT EXISTS idx_executions_run ON checkpoint_executions(run_id);
                CREATE INDEX IF NOT EXISTS idx_artifacts_execution ON artifacts(execution_id);
                CREATE INDEX IF NOT EXISTS idx_interactions_execution ON human_interactions(execution_id);
                CREATE INDEX IF NOT EXISTS idx_rollback_events_pipeline ON rollback_events(pipeline_id);
                CREATE INDEX IF NOT EXISTS idx_archived_items_event ON archived_items(rollback_event_id);
                CREATE INDEX IF NOT EXISTS idx_events_pipeline ON events(pipeline_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

pub(crate) fn parse_enum<T>(value: &str, what: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    T::from_str(value)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Failed to parse {}", what))
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub(crate) fn to_path(value: String) -> PathBuf {
    PathBuf::from(value)
}

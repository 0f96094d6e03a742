use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::parse_enum;
use crate::models::Run;

const RUN_COLUMNS: &str = "id, pipeline_id, run_version, status, current_checkpoint_id, \
     current_checkpoint_position, previous_run_id, extends_from_run_version, checkpoint_order, \
     definition_version, created_at, started_at, paused_at, last_resumed_at, completed_at, failed_at";

pub fn insert_run(conn: &Connection, run: &Run) -> Result<()> {
    let order =
        serde_json::to_string(&run.checkpoint_order).context("Failed to serialize run order")?;
    conn.execute(
        &format!(
            "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            RUN_COLUMNS
        ),
        params![
            run.id,
            run.pipeline_id,
            run.run_version,
            run.status.as_str(),
            run.current_checkpoint_id,
            run.current_checkpoint_position,
            run.previous_run_id,
            run.extends_from_run_version,
            order,
            run.definition_version,
            run.created_at,
            run.started_at,
            run.paused_at,
            run.last_resumed_at,
            run.completed_at,
            run.failed_at,
        ],
    )
    .context("Failed to insert run")?;
    Ok(())
}

/// Write back the mutable state of a run: status, position pointer and stamps.
pub fn update_run(conn: &Connection, run: &Run) -> Result<()> {
    conn.execute(
        "UPDATE runs SET status = ?1, current_checkpoint_id = ?2, current_checkpoint_position = ?3, \
         started_at = ?4, paused_at = ?5, last_resumed_at = ?6, completed_at = ?7, failed_at = ?8 \
         WHERE id = ?9",
        params![
            run.status.as_str(),
            run.current_checkpoint_id,
            run.current_checkpoint_position,
            run.started_at,
            run.paused_at,
            run.last_resumed_at,
            run.completed_at,
            run.failed_at,
            run.id,
        ],
    )
    .context("Failed to update run")?;
    Ok(())
}

pub fn get_run(conn: &Connection, id: &str) -> Result<Option<Run>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
            params![id],
            RunRow::from_row,
        )
        .optional()
        .context("Failed to query run")?;
    row.map(RunRow::into_run).transpose()
}

/// All runs of a pipeline, newest version first.
pub fn list_runs(conn: &Connection, pipeline_id: &str) -> Result<Vec<Run>> {
    query_runs(
        conn,
        &format!(
            "SELECT {} FROM runs WHERE pipeline_id = ?1 ORDER BY run_version DESC",
            RUN_COLUMNS
        ),
        params![pipeline_id],
    )
}

/// Runs of a pipeline with a version strictly greater than `version`,
/// newest first.
pub fn runs_newer_than(conn: &Connection, pipeline_id: &str, version: i64) -> Result<Vec<Run>> {
    query_runs(
        conn,
        &format!(
            "SELECT {} FROM runs WHERE pipeline_id = ?1 AND run_version > ?2 \
             ORDER BY run_version DESC",
            RUN_COLUMNS
        ),
        params![pipeline_id, version],
    )
}

pub fn latest_run(conn: &Connection, pipeline_id: &str) -> Result<Option<Run>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM runs WHERE pipeline_id = ?1 ORDER BY run_version DESC LIMIT 1",
                RUN_COLUMNS
            ),
            params![pipeline_id],
            RunRow::from_row,
        )
        .optional()
        .context("Failed to query latest run")?;
    row.map(RunRow::into_run).transpose()
}

pub fn max_run_version(conn: &Connection, pipeline_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(run_version), 0) FROM runs WHERE pipeline_id = ?1",
        params![pipeline_id],
        |row| row.get(0),
    )
    .context("Failed to get max run version")
}

/// Delete a run row; executions, artifacts and interactions cascade.
pub fn delete_run(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM runs WHERE id = ?1", params![id])
        .context("Failed to delete run")?;
    Ok(())
}

fn query_runs(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Run>> {
    let mut stmt = conn.prepare(sql).context("Failed to prepare run query")?;
    let rows = stmt
        .query_map(params, RunRow::from_row)
        .context("Failed to query runs")?;
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row.context("Failed to read run row")?.into_run()?);
    }
    Ok(runs)
}

struct RunRow {
    id: String,
    pipeline_id: String,
    run_version: i64,
    status: String,
    current_checkpoint_id: Option<String>,
    current_checkpoint_position: Option<i64>,
    previous_run_id: Option<String>,
    extends_from_run_version: Option<i64>,
    checkpoint_order: String,
    definition_version: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    last_resumed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            run_version: row.get(2)?,
            status: row.get(3)?,
            current_checkpoint_id: row.get(4)?,
            current_checkpoint_position: row.get(5)?,
            previous_run_id: row.get(6)?,
            extends_from_run_version: row.get(7)?,
            checkpoint_order: row.get(8)?,
            definition_version: row.get(9)?,
            created_at: row.get(10)?,
            started_at: row.get(11)?,
            paused_at: row.get(12)?,
            last_resumed_at: row.get(13)?,
            completed_at: row.get(14)?,
            failed_at: row.get(15)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        Ok(Run {
            status: parse_enum(&self.status, "run status")?,
            checkpoint_order: serde_json::from_str(&self.checkpoint_order)
                .context("Failed to parse run checkpoint order JSON")?,
            id: self.id,
            pipeline_id: self.pipeline_id,
            run_version: self.run_version,
            current_checkpoint_id: self.current_checkpoint_id,
            current_checkpoint_position: self.current_checkpoint_position,
            previous_run_id: self.previous_run_id,
            extends_from_run_version: self.extends_from_run_version,
            definition_version: self.definition_version,
            created_at: self.created_at,
            started_at: self.started_at,
            paused_at: self.paused_at,
            last_resumed_at: self.last_resumed_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
        })
    }
}

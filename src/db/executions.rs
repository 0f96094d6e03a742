use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use super::{parse_enum, path_str, to_path};
use crate::models::{CheckpointExecution, HumanInteraction, InteractionType};

const EXECUTION_COLUMNS: &str = "id, run_id, checkpoint_id, checkpoint_position, status, \
     attempt_number, max_attempts, revision_iteration, max_revision_iterations, \
     temp_workspace_path, permanent_output_path, created_at, started_at, completed_at, failed_at";

pub fn insert_execution(conn: &Connection, execution: &CheckpointExecution) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO checkpoint_executions ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            EXECUTION_COLUMNS
        ),
        params![
            execution.id,
            execution.run_id,
            execution.checkpoint_id,
            execution.checkpoint_position,
            execution.status.as_str(),
            execution.attempt_number,
            execution.max_attempts,
            execution.revision_iteration,
            execution.max_revision_iterations,
            path_str(&execution.temp_workspace_path),
            path_str(&execution.permanent_output_path),
            execution.created_at,
            execution.started_at,
            execution.completed_at,
            execution.failed_at,
        ],
    )
    .with_context(|| {
        format!(
            "Failed to insert execution at position {} of run {}",
            execution.checkpoint_position, execution.run_id
        )
    })?;
    Ok(())
}

/// Write back status, counters and timestamps.
pub fn update_execution(conn: &Connection, execution: &CheckpointExecution) -> Result<()> {
    conn.execute(
        "UPDATE checkpoint_executions SET status = ?1, attempt_number = ?2, \
         revision_iteration = ?3, started_at = ?4, completed_at = ?5, failed_at = ?6 \
         WHERE id = ?7",
        params![
            execution.status.as_str(),
            execution.attempt_number,
            execution.revision_iteration,
            execution.started_at,
            execution.completed_at,
            execution.failed_at,
            execution.id,
        ],
    )
    .context("Failed to update execution")?;
    Ok(())
}

pub fn get_execution(conn: &Connection, id: &str) -> Result<Option<CheckpointExecution>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM checkpoint_executions WHERE id = ?1",
                EXECUTION_COLUMNS
            ),
            params![id],
            ExecutionRow::from_row,
        )
        .optional()
        .context("Failed to query execution")?;
    row.map(ExecutionRow::into_execution).transpose()
}

pub fn get_execution_at(
    conn: &Connection,
    run_id: &str,
    position: i64,
) -> Result<Option<CheckpointExecution>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM checkpoint_executions WHERE run_id = ?1 AND checkpoint_position = ?2",
                EXECUTION_COLUMNS
            ),
            params![run_id, position],
            ExecutionRow::from_row,
        )
        .optional()
        .context("Failed to query execution by position")?;
    row.map(ExecutionRow::into_execution).transpose()
}

/// Executions of a run ordered by position ascending.
pub fn list_executions(conn: &Connection, run_id: &str) -> Result<Vec<CheckpointExecution>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM checkpoint_executions WHERE run_id = ?1 ORDER BY checkpoint_position",
            EXECUTION_COLUMNS
        ))
        .context("Failed to prepare list_executions")?;
    let rows = stmt
        .query_map(params![run_id], ExecutionRow::from_row)
        .context("Failed to query executions")?;
    let mut executions = Vec::new();
    for row in rows {
        executions.push(row.context("Failed to read execution row")?.into_execution()?);
    }
    Ok(executions)
}

/// Executions of a run beyond `position`, highest position first.
pub fn executions_after(
    conn: &Connection,
    run_id: &str,
    position: i64,
) -> Result<Vec<CheckpointExecution>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM checkpoint_executions WHERE run_id = ?1 AND checkpoint_position > ?2 \
             ORDER BY checkpoint_position DESC",
            EXECUTION_COLUMNS
        ))
        .context("Failed to prepare executions_after")?;
    let rows = stmt
        .query_map(params![run_id, position], ExecutionRow::from_row)
        .context("Failed to query executions after position")?;
    let mut executions = Vec::new();
    for row in rows {
        executions.push(row.context("Failed to read execution row")?.into_execution()?);
    }
    Ok(executions)
}

/// Delete an execution row; artifacts and interactions cascade.
pub fn delete_execution(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM checkpoint_executions WHERE id = ?1", params![id])
        .context("Failed to delete execution")?;
    Ok(())
}

// ── Human interactions ───────────────────────────────────────────────

pub fn insert_interaction(
    conn: &Connection,
    execution_id: &str,
    interaction_type: InteractionType,
    user_input: Option<&Value>,
    system_response: &str,
) -> Result<HumanInteraction> {
    let input = match user_input {
        Some(v) => {
            Some(serde_json::to_string(v).context("Failed to serialize interaction input")?)
        }
        None => None,
    };
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO human_interactions (execution_id, interaction_type, user_input, \
         system_response, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            execution_id,
            interaction_type.as_str(),
            input,
            system_response,
            created_at
        ],
    )
    .context("Failed to insert human interaction")?;
    Ok(HumanInteraction {
        id: conn.last_insert_rowid(),
        execution_id: execution_id.to_string(),
        interaction_type,
        user_input: user_input.cloned(),
        system_response: system_response.to_string(),
        created_at,
    })
}

pub fn list_interactions(conn: &Connection, execution_id: &str) -> Result<Vec<HumanInteraction>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, execution_id, interaction_type, user_input, system_response, created_at \
             FROM human_interactions WHERE execution_id = ?1 ORDER BY id",
        )
        .context("Failed to prepare list_interactions")?;
    let rows = stmt
        .query_map(params![execution_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, DateTime<Utc>>(5)?,
            ))
        })
        .context("Failed to query interactions")?;
    let mut interactions = Vec::new();
    for row in rows {
        let (id, execution_id, kind, input, system_response, created_at) =
            row.context("Failed to read interaction row")?;
        let user_input = match input {
            Some(s) => Some(
                serde_json::from_str(&s).context("Failed to parse interaction input JSON")?,
            ),
            None => None,
        };
        interactions.push(HumanInteraction {
            id,
            execution_id,
            interaction_type: parse_enum(&kind, "interaction type")?,
            user_input,
            system_response,
            created_at,
        });
    }
    Ok(interactions)
}

struct ExecutionRow {
    id: String,
    run_id: String,
    checkpoint_id: String,
    checkpoint_position: i64,
    status: String,
    attempt_number: u32,
    max_attempts: u32,
    revision_iteration: u32,
    max_revision_iterations: u32,
    temp_workspace_path: String,
    permanent_output_path: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl ExecutionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            checkpoint_id: row.get(2)?,
            checkpoint_position: row.get(3)?,
            status: row.get(4)?,
            attempt_number: row.get(5)?,
            max_attempts: row.get(6)?,
            revision_iteration: row.get(7)?,
            max_revision_iterations: row.get(8)?,
            temp_workspace_path: row.get(9)?,
            permanent_output_path: row.get(10)?,
            created_at: row.get(11)?,
            started_at: row.get(12)?,
            completed_at: row.get(13)?,
            failed_at: row.get(14)?,
        })
    }

    fn into_execution(self) -> Result<CheckpointExecution> {
        Ok(CheckpointExecution {
            status: parse_enum(&self.status, "execution status")?,
            id: self.id,
            run_id: self.run_id,
            checkpoint_id: self.checkpoint_id,
            checkpoint_position: self.checkpoint_position,
            attempt_number: self.attempt_number,
            max_attempts: self.max_attempts,
            revision_iteration: self.revision_iteration,
            max_revision_iterations: self.max_revision_iterations,
            temp_workspace_path: to_path(self.temp_workspace_path),
            permanent_output_path: to_path(self.permanent_output_path),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
        })
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::definitions::{CheckpointDefinition, PipelineDefinition};

const PIPELINE_COLUMNS: &str =
    "id, name, description, checkpoint_order, auto_advance, definition_version, created_at, updated_at";

const CHECKPOINT_COLUMNS: &str = "id, pipeline_id, name, description, execution_mode, \
     interaction_policy, output_artifacts, created_at, updated_at";

pub fn insert_pipeline(conn: &Connection, pipeline: &PipelineDefinition) -> Result<()> {
    let order = serde_json::to_string(&pipeline.checkpoint_order)
        .context("Failed to serialize checkpoint order")?;
    conn.execute(
        "INSERT INTO pipelines (id, name, description, checkpoint_order, auto_advance, \
         definition_version, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            pipeline.id,
            pipeline.name,
            pipeline.description,
            order,
            pipeline.auto_advance,
            pipeline.definition_version,
            pipeline.created_at,
            pipeline.updated_at,
        ],
    )
    .context("Failed to insert pipeline")?;
    Ok(())
}

/// Persist a new checkpoint order together with the bumped definition version.
pub fn update_checkpoint_order(conn: &Connection, pipeline: &PipelineDefinition) -> Result<()> {
    let order = serde_json::to_string(&pipeline.checkpoint_order)
        .context("Failed to serialize checkpoint order")?;
    conn.execute(
        "UPDATE pipelines SET checkpoint_order = ?1, definition_version = ?2, updated_at = ?3 \
         WHERE id = ?4",
        params![
            order,
            pipeline.definition_version,
            pipeline.updated_at,
            pipeline.id
        ],
    )
    .context("Failed to update checkpoint order")?;
    Ok(())
}

pub fn get_pipeline(conn: &Connection, id: &str) -> Result<Option<PipelineDefinition>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM pipelines WHERE id = ?1", PIPELINE_COLUMNS),
            params![id],
            PipelineRow::from_row,
        )
        .optional()
        .context("Failed to query pipeline")?;
    row.map(PipelineRow::into_pipeline).transpose()
}

pub fn list_pipelines(conn: &Connection) -> Result<Vec<PipelineDefinition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM pipelines ORDER BY created_at, name",
            PIPELINE_COLUMNS
        ))
        .context("Failed to prepare list_pipelines")?;
    let rows = stmt
        .query_map([], PipelineRow::from_row)
        .context("Failed to query pipelines")?;
    let mut pipelines = Vec::new();
    for row in rows {
        pipelines.push(row.context("Failed to read pipeline row")?.into_pipeline()?);
    }
    Ok(pipelines)
}

pub fn insert_checkpoint(conn: &Connection, checkpoint: &CheckpointDefinition) -> Result<()> {
    let mode = serde_json::to_string(&checkpoint.execution)
        .context("Failed to serialize execution mode")?;
    let policy = serde_json::to_string(&checkpoint.policy)
        .context("Failed to serialize interaction policy")?;
    let outputs = serde_json::to_string(&checkpoint.outputs)
        .context("Failed to serialize output artifacts")?;
    conn.execute(
        "INSERT INTO checkpoints (id, pipeline_id, name, description, execution_mode, \
         interaction_policy, output_artifacts, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            checkpoint.id,
            checkpoint.pipeline_id,
            checkpoint.name,
            checkpoint.description,
            mode,
            policy,
            outputs,
            checkpoint.created_at,
            checkpoint.updated_at,
        ],
    )
    .context("Failed to insert checkpoint")?;
    Ok(())
}

pub fn get_checkpoint(conn: &Connection, id: &str) -> Result<Option<CheckpointDefinition>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM checkpoints WHERE id = ?1", CHECKPOINT_COLUMNS),
            params![id],
            CheckpointRow::from_row,
        )
        .optional()
        .context("Failed to query checkpoint")?;
    row.map(CheckpointRow::into_checkpoint).transpose()
}

pub fn list_checkpoints(conn: &Connection, pipeline_id: &str) -> Result<Vec<CheckpointDefinition>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM checkpoints WHERE pipeline_id = ?1 ORDER BY created_at",
            CHECKPOINT_COLUMNS
        ))
        .context("Failed to prepare list_checkpoints")?;
    let rows = stmt
        .query_map(params![pipeline_id], CheckpointRow::from_row)
        .context("Failed to query checkpoints")?;
    let mut checkpoints = Vec::new();
    for row in rows {
        checkpoints.push(row.context("Failed to read checkpoint row")?.into_checkpoint()?);
    }
    Ok(checkpoints)
}

struct PipelineRow {
    id: String,
    name: String,
    description: String,
    checkpoint_order: String,
    auto_advance: bool,
    definition_version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PipelineRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            checkpoint_order: row.get(3)?,
            auto_advance: row.get(4)?,
            definition_version: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_pipeline(self) -> Result<PipelineDefinition> {
        let checkpoint_order: Vec<String> = serde_json::from_str(&self.checkpoint_order)
            .context("Failed to parse checkpoint order JSON")?;
        Ok(PipelineDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            checkpoint_order,
            auto_advance: self.auto_advance,
            definition_version: self.definition_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct CheckpointRow {
    id: String,
    pipeline_id: String,
    name: String,
    description: String,
    execution_mode: String,
    interaction_policy: String,
    output_artifacts: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            execution_mode: row.get(4)?,
            interaction_policy: row.get(5)?,
            output_artifacts: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_checkpoint(self) -> Result<CheckpointDefinition> {
        Ok(CheckpointDefinition {
            execution: serde_json::from_str(&self.execution_mode)
                .context("Failed to parse execution mode JSON")?,
            policy: serde_json::from_str(&self.interaction_policy)
                .context("Failed to parse interaction policy JSON")?,
            outputs: serde_json::from_str(&self.output_artifacts)
                .context("Failed to parse output artifacts JSON")?,
            id: self.id,
            pipeline_id: self.pipeline_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{parse_enum, path_str, to_path};
use crate::models::Artifact;

const ARTIFACT_COLUMNS: &str = "a.id, a.execution_id, a.artifact_id, a.name, a.format, a.file_path, \
     a.size_bytes, a.checksum, a.promoted_to_permanent_at, a.created_at, a.updated_at";

pub fn insert_artifact(conn: &Connection, artifact: &Artifact) -> Result<()> {
    conn.execute(
        "INSERT INTO artifacts (id, execution_id, artifact_id, name, format, file_path, \
         size_bytes, checksum, promoted_to_permanent_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            artifact.id,
            artifact.execution_id,
            artifact.artifact_id,
            artifact.name,
            artifact.format.as_str(),
            path_str(&artifact.file_path),
            artifact.size_bytes as i64,
            artifact.checksum,
            artifact.promoted_to_permanent_at,
            artifact.created_at,
            artifact.updated_at,
        ],
    )
    .context("Failed to insert artifact")?;
    Ok(())
}

/// Overwrite the mutable columns of an artifact record. Identity columns
/// (`id`, `execution_id`, `artifact_id`, `name`) never change.
pub fn update_artifact(conn: &Connection, artifact: &Artifact) -> Result<()> {
    conn.execute(
        "UPDATE artifacts SET format = ?1, file_path = ?2, size_bytes = ?3, checksum = ?4, \
         promoted_to_permanent_at = ?5, updated_at = ?6 WHERE id = ?7",
        params![
            artifact.format.as_str(),
            path_str(&artifact.file_path),
            artifact.size_bytes as i64,
            artifact.checksum,
            artifact.promoted_to_permanent_at,
            artifact.updated_at,
            artifact.id,
        ],
    )
    .context("Failed to update artifact")?;
    Ok(())
}

pub fn get_artifact(conn: &Connection, id: &str) -> Result<Option<Artifact>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM artifacts a WHERE a.id = ?1", ARTIFACT_COLUMNS),
            params![id],
            ArtifactRow::from_row,
        )
        .optional()
        .context("Failed to query artifact")?;
    row.map(ArtifactRow::into_artifact).transpose()
}

pub fn find_artifact_by_name(
    conn: &Connection,
    execution_id: &str,
    name: &str,
) -> Result<Option<Artifact>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM artifacts a WHERE a.execution_id = ?1 AND a.name = ?2",
                ARTIFACT_COLUMNS
            ),
            params![execution_id, name],
            ArtifactRow::from_row,
        )
        .optional()
        .context("Failed to query artifact by name")?;
    row.map(ArtifactRow::into_artifact).transpose()
}

pub fn list_artifacts(conn: &Connection, execution_id: &str) -> Result<Vec<Artifact>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM artifacts a WHERE a.execution_id = ?1 ORDER BY a.created_at, a.name",
            ARTIFACT_COLUMNS
        ))
        .context("Failed to prepare list_artifacts")?;
    let rows = stmt
        .query_map(params![execution_id], ArtifactRow::from_row)
        .context("Failed to query artifacts")?;
    let mut artifacts = Vec::new();
    for row in rows {
        artifacts.push(row.context("Failed to read artifact row")?.into_artifact()?);
    }
    Ok(artifacts)
}

/// Promoted artifacts from the most recent run older than `before_version`
/// that has an execution at `position`, tagged with that run's version.
pub fn previous_promoted_at_position(
    conn: &Connection,
    pipeline_id: &str,
    before_version: i64,
    position: i64,
) -> Result<Vec<(i64, Artifact)>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT r.run_version, {} FROM artifacts a \
             JOIN checkpoint_executions e ON a.execution_id = e.id \
             JOIN runs r ON e.run_id = r.id \
             WHERE r.pipeline_id = ?1 AND r.run_version < ?2 AND e.checkpoint_position = ?3 \
               AND a.promoted_to_permanent_at IS NOT NULL \
             ORDER BY r.run_version DESC, a.name",
            ARTIFACT_COLUMNS
        ))
        .context("Failed to prepare previous_promoted_at_position")?;
    let rows = stmt
        .query_map(params![pipeline_id, before_version, position], |row| {
            let version: i64 = row.get(0)?;
            let artifact = ArtifactRow::from_row_offset(row, 1)?;
            Ok((version, artifact))
        })
        .context("Failed to query previous artifacts")?;

    let mut found = Vec::new();
    let mut newest: Option<i64> = None;
    for row in rows {
        let (version, artifact) = row.context("Failed to read previous artifact row")?;
        match newest {
            None => newest = Some(version),
            Some(v) if v != version => break,
            Some(_) => {}
        }
        found.push((version, artifact.into_artifact()?));
    }
    Ok(found)
}

struct ArtifactRow {
    id: String,
    execution_id: String,
    artifact_id: String,
    name: String,
    format: String,
    file_path: String,
    size_bytes: i64,
    checksum: String,
    promoted_to_permanent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ArtifactRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Self::from_row_offset(row, 0)
    }

    fn from_row_offset(row: &rusqlite::Row<'_>, o: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(o)?,
            execution_id: row.get(o + 1)?,
            artifact_id: row.get(o + 2)?,
            name: row.get(o + 3)?,
            format: row.get(o + 4)?,
            file_path: row.get(o + 5)?,
            size_bytes: row.get(o + 6)?,
            checksum: row.get(o + 7)?,
            promoted_to_permanent_at: row.get(o + 8)?,
            created_at: row.get(o + 9)?,
            updated_at: row.get(o + 10)?,
        })
    }

    fn into_artifact(self) -> Result<Artifact> {
        Ok(Artifact {
            format: parse_enum(&self.format, "artifact format")?,
            id: self.id,
            execution_id: self.execution_id,
            artifact_id: self.artifact_id,
            name: self.name,
            file_path: to_path(self.file_path),
            size_bytes: self.size_bytes.max(0) as u64,
            checksum: self.checksum,
            promoted_to_permanent_at: self.promoted_to_permanent_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

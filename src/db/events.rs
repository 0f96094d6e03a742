use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::events::NewEvent;
use crate::models::EventRecord;

pub fn insert_event(conn: &Connection, event: &NewEvent<'_>) -> Result<i64> {
    let metadata =
        serde_json::to_string(&event.metadata).context("Failed to serialize event metadata")?;
    conn.execute(
        "INSERT INTO events (event_type, pipeline_id, run_id, execution_id, checkpoint_id, \
         rollback_event_id, description, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_type.as_str(),
            event.pipeline_id,
            event.run_id,
            event.execution_id,
            event.checkpoint_id,
            event.rollback_event_id,
            event.description,
            metadata,
            Utc::now(),
        ],
    )
    .context("Failed to insert event")?;
    Ok(conn.last_insert_rowid())
}

/// Events of a pipeline, newest first.
pub fn list_events(conn: &Connection, pipeline_id: &str, limit: u32) -> Result<Vec<EventRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, event_type, pipeline_id, run_id, execution_id, checkpoint_id, \
             rollback_event_id, description, metadata, created_at FROM events \
             WHERE pipeline_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .context("Failed to prepare list_events")?;
    let rows = stmt
        .query_map(params![pipeline_id, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, DateTime<Utc>>(9)?,
            ))
        })
        .context("Failed to query events")?;
    let mut events = Vec::new();
    for row in rows {
        let (id, event_type, pipeline_id, run_id, execution_id, checkpoint_id, rollback, description, metadata, created_at) =
            row.context("Failed to read event row")?;
        events.push(EventRecord {
            id,
            event_type,
            pipeline_id,
            run_id,
            execution_id,
            checkpoint_id,
            rollback_event_id: rollback,
            description,
            metadata: serde_json::from_str(&metadata)
                .with_context(|| format!("Corrupt event metadata JSON: {}", metadata))?,
            created_at,
        });
    }
    Ok(events)
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{parse_enum, path_str, to_path};
use crate::models::{ArchivedItem, RollbackEvent};

const EVENT_COLUMNS: &str = "id, pipeline_id, rollback_type, source_run_id, source_run_version, \
     target_run_id, target_run_version, target_checkpoint_id, target_checkpoint_position, \
     archive_location, trigger_type, user_reason, rolled_back_items, created_at";

pub fn insert_rollback_event(conn: &Connection, event: &RollbackEvent) -> Result<()> {
    let manifest =
        serde_json::to_string(&event.manifest).context("Failed to serialize rollback manifest")?;
    conn.execute(
        &format!(
            "INSERT INTO rollback_events ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            EVENT_COLUMNS
        ),
        params![
            event.id,
            event.pipeline_id,
            event.rollback_type.as_str(),
            event.source_run_id,
            event.source_run_version,
            event.target_run_id,
            event.target_run_version,
            event.target_checkpoint_id,
            event.target_checkpoint_position,
            path_str(&event.archive_location),
            event.trigger.as_str(),
            event.user_reason,
            manifest,
            event.created_at,
        ],
    )
    .context("Failed to insert rollback event")?;
    Ok(())
}

/// Insert an archived item and return it with its assigned row id.
pub fn insert_archived_item(conn: &Connection, item: &ArchivedItem) -> Result<ArchivedItem> {
    conn.execute(
        "INSERT INTO archived_items (rollback_event_id, item_type, item_id, original_path, \
         archived_path, size_bytes, checksum, archived_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            item.rollback_event_id,
            item.item_type.as_str(),
            item.item_id,
            path_str(&item.original_path),
            path_str(&item.archived_path),
            item.size_bytes as i64,
            item.checksum,
            item.archived_at,
        ],
    )
    .context("Failed to insert archived item")?;
    Ok(ArchivedItem {
        id: conn.last_insert_rowid(),
        ..item.clone()
    })
}

pub fn get_rollback_event(conn: &Connection, id: &str) -> Result<Option<RollbackEvent>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM rollback_events WHERE id = ?1", EVENT_COLUMNS),
            params![id],
            RollbackEventRow::from_row,
        )
        .optional()
        .context("Failed to query rollback event")?;
    row.map(RollbackEventRow::into_event).transpose()
}

/// Rollback events of a pipeline, newest first. With `run_id`, only events
/// where that run was the source or the target.
pub fn list_rollback_events(
    conn: &Connection,
    pipeline_id: &str,
    run_id: Option<&str>,
    limit: u32,
) -> Result<Vec<RollbackEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM rollback_events WHERE pipeline_id = ?1 \
             AND (?2 IS NULL OR source_run_id = ?2 OR target_run_id = ?2) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
            EVENT_COLUMNS
        ))
        .context("Failed to prepare list_rollback_events")?;
    let rows = stmt
        .query_map(
            params![pipeline_id, run_id, limit],
            RollbackEventRow::from_row,
        )
        .context("Failed to query rollback events")?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row.context("Failed to read rollback event row")?.into_event()?);
    }
    Ok(events)
}

pub fn list_archived_items(conn: &Connection, rollback_event_id: &str) -> Result<Vec<ArchivedItem>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, rollback_event_id, item_type, item_id, original_path, archived_path, \
             size_bytes, checksum, archived_at FROM archived_items \
             WHERE rollback_event_id = ?1 ORDER BY id",
        )
        .context("Failed to prepare list_archived_items")?;
    let rows = stmt
        .query_map(params![rollback_event_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, DateTime<Utc>>(8)?,
            ))
        })
        .context("Failed to query archived items")?;
    let mut items = Vec::new();
    for row in rows {
        let (id, event_id, kind, item_id, original, archived, size, checksum, archived_at) =
            row.context("Failed to read archived item row")?;
        items.push(ArchivedItem {
            id,
            rollback_event_id: event_id,
            item_type: parse_enum(&kind, "archived item type")?,
            item_id,
            original_path: to_path(original),
            archived_path: to_path(archived),
            size_bytes: size.max(0) as u64,
            checksum,
            archived_at,
        });
    }
    Ok(items)
}

struct RollbackEventRow {
    id: String,
    pipeline_id: String,
    rollback_type: String,
    source_run_id: String,
    source_run_version: i64,
    target_run_id: String,
    target_run_version: i64,
    target_checkpoint_id: String,
    target_checkpoint_position: i64,
    archive_location: String,
    trigger: String,
    user_reason: Option<String>,
    rolled_back_items: String,
    created_at: DateTime<Utc>,
}

impl RollbackEventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline_id: row.get(1)?,
            rollback_type: row.get(2)?,
            source_run_id: row.get(3)?,
            source_run_version: row.get(4)?,
            target_run_id: row.get(5)?,
            target_run_version: row.get(6)?,
            target_checkpoint_id: row.get(7)?,
            target_checkpoint_position: row.get(8)?,
            archive_location: row.get(9)?,
            trigger: row.get(10)?,
            user_reason: row.get(11)?,
            rolled_back_items: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_event(self) -> Result<RollbackEvent> {
        Ok(RollbackEvent {
            rollback_type: parse_enum(&self.rollback_type, "rollback type")?,
            trigger: parse_enum(&self.trigger, "rollback trigger")?,
            manifest: serde_json::from_str(&self.rolled_back_items)
                .context("Failed to parse rollback manifest JSON")?,
            id: self.id,
            pipeline_id: self.pipeline_id,
            source_run_id: self.source_run_id,
            source_run_version: self.source_run_version,
            target_run_id: self.target_run_id,
            target_run_version: self.target_run_version,
            target_checkpoint_id: self.target_checkpoint_id,
            target_checkpoint_position: self.target_checkpoint_position,
            archive_location: to_path(self.archive_location),
            user_reason: self.user_reason,
            created_at: self.created_at,
        })
    }
}

//! Append-only ledger of state changes, written in the same transaction as
//! the change it describes.

use anyhow::Result;
use rusqlite::Connection;
use serde_json::{Value, json};

use crate::context::PipelineContext;
use crate::db;
use crate::errors::PipelineError;
use crate::models::EventRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RunCreated,
    RunStarted,
    RunPaused,
    RunResumed,
    ExecutionStarted,
    FormSubmitted,
    OutputStaged,
    RevisionRequested,
    CheckpointCompleted,
    CheckpointFailed,
    PipelineCompleted,
    RollbackInitiated,
    CheckpointsReordered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunCreated => "run_created",
            Self::RunStarted => "run_started",
            Self::RunPaused => "run_paused",
            Self::RunResumed => "run_resumed",
            Self::ExecutionStarted => "execution_started",
            Self::FormSubmitted => "form_submitted",
            Self::OutputStaged => "output_staged",
            Self::RevisionRequested => "revision_requested",
            Self::CheckpointCompleted => "checkpoint_completed",
            Self::CheckpointFailed => "checkpoint_failed",
            Self::PipelineCompleted => "pipeline_completed",
            Self::RollbackInitiated => "rollback_initiated",
            Self::CheckpointsReordered => "checkpoints_reordered",
        }
    }
}

/// Event to be written to the ledger.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub event_type: EventType,
    pub pipeline_id: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub execution_id: Option<&'a str>,
    pub checkpoint_id: Option<&'a str>,
    pub rollback_event_id: Option<&'a str>,
    pub description: String,
    pub metadata: Value,
}

impl<'a> NewEvent<'a> {
    pub fn new(event_type: EventType, description: impl Into<String>) -> Self {
        Self {
            event_type,
            pipeline_id: None,
            run_id: None,
            execution_id: None,
            checkpoint_id: None,
            rollback_event_id: None,
            description: description.into(),
            metadata: json!({}),
        }
    }

    pub fn pipeline(mut self, id: &'a str) -> Self {
        self.pipeline_id = Some(id);
        self
    }

    pub fn run(mut self, id: &'a str) -> Self {
        self.run_id = Some(id);
        self
    }

    pub fn execution(mut self, id: &'a str) -> Self {
        self.execution_id = Some(id);
        self
    }

    pub fn checkpoint(mut self, id: &'a str) -> Self {
        self.checkpoint_id = Some(id);
        self
    }

    pub fn rollback(mut self, id: &'a str) -> Self {
        self.rollback_event_id = Some(id);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn record(self, conn: &Connection) -> Result<i64> {
        db::events::insert_event(conn, &self)
    }
}

pub const DEFAULT_EVENT_LIMIT: u32 = 100;

impl PipelineContext {
    pub fn list_events(&self, pipeline_id: &str, limit: u32) -> Result<Vec<EventRecord>, PipelineError> {
        Ok(db::events::list_events(self.store().conn(), pipeline_id, limit)?)
    }
}

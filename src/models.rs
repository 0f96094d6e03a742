use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use crate::definitions::{
    CheckpointDefinition, ExecutionMode, FieldType, FormArtifactConfig, HumanOnlyConfig,
    InputField, InteractionPolicy, OutputArtifact, PipelineDefinition,
};

/// Serialize an entity into the JSON document stored on disk and returned by
/// detail views.
pub trait ToDocument {
    fn to_document(&self) -> Value;
}

fn rfc3339(ts: &Option<DateTime<Utc>>) -> Value {
    match ts {
        Some(t) => Value::String(t.to_rfc3339()),
        None => Value::Null,
    }
}

// ── Status enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one checkpoint execution.
///
/// `Pending` only exists between insertion and the first transition, which
/// happens inside the creating transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    WaitingApprovalToStart,
    InProgress,
    WaitingApprovalToComplete,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::WaitingApprovalToStart => "waiting_approval_to_start",
            Self::InProgress => "in_progress",
            Self::WaitingApprovalToComplete => "waiting_approval_to_complete",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting_approval_to_start" => Ok(Self::WaitingApprovalToStart),
            "in_progress" => Ok(Self::InProgress),
            "waiting_approval_to_complete" => Ok(Self::WaitingApprovalToComplete),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid execution status: {}", s)),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    ApprovalToStart,
    FormSubmission,
    OutputStaged,
    ApprovalToComplete,
    AutoCompletion,
    RevisionRequest,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalToStart => "approval_to_start",
            Self::FormSubmission => "form_submission",
            Self::OutputStaged => "output_staged",
            Self::ApprovalToComplete => "approval_to_complete",
            Self::AutoCompletion => "auto_completion",
            Self::RevisionRequest => "revision_request",
        }
    }
}

impl FromStr for InteractionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval_to_start" => Ok(Self::ApprovalToStart),
            "form_submission" => Ok(Self::FormSubmission),
            "output_staged" => Ok(Self::OutputStaged),
            "approval_to_complete" => Ok(Self::ApprovalToComplete),
            "auto_completion" => Ok(Self::AutoCompletion),
            "revision_request" => Ok(Self::RevisionRequest),
            _ => Err(format!("Invalid interaction type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    Json,
    Md,
    Mmd,
    Txt,
    Py,
    Html,
    Csv,
}

impl ArtifactFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Md => "md",
            Self::Mmd => "mmd",
            Self::Txt => "txt",
            Self::Py => "py",
            Self::Html => "html",
            Self::Csv => "csv",
        }
    }

    /// File extension, without the dot. Every supported format is its own extension.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl FromStr for ArtifactFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "md" => Ok(Self::Md),
            "mmd" => Ok(Self::Mmd),
            "txt" => Ok(Self::Txt),
            "py" => Ok(Self::Py),
            "html" => Ok(Self::Html),
            "csv" => Ok(Self::Csv),
            _ => Err(format!("Invalid artifact format: {}", s)),
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackType {
    CheckpointLevel,
    RunLevel,
}

impl RollbackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckpointLevel => "checkpoint_level",
            Self::RunLevel => "run_level",
        }
    }
}

impl FromStr for RollbackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkpoint_level" => Ok(Self::CheckpointLevel),
            "run_level" => Ok(Self::RunLevel),
            _ => Err(format!("Invalid rollback type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTrigger {
    #[default]
    UserRequest,
    CheckpointFailure,
}

impl RollbackTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequest => "user_request",
            Self::CheckpointFailure => "checkpoint_failure",
        }
    }
}

impl FromStr for RollbackTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_request" => Ok(Self::UserRequest),
            "checkpoint_failure" => Ok(Self::CheckpointFailure),
            _ => Err(format!("Invalid rollback trigger: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArchivedItemType {
    Run,
    CheckpointExecution,
    Artifact,
}

impl ArchivedItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::CheckpointExecution => "checkpoint_execution",
            Self::Artifact => "artifact",
        }
    }
}

impl FromStr for ArchivedItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "run" => Ok(Self::Run),
            "checkpoint_execution" => Ok(Self::CheckpointExecution),
            "artifact" => Ok(Self::Artifact),
            _ => Err(format!("Invalid archived item type: {}", s)),
        }
    }
}

// ── Runtime entities ─────────────────────────────────────────────────

/// One full attempt at executing a pipeline.
///
/// `checkpoint_order` is the pipeline's order frozen when the run was created;
/// every position lookup for this run resolves against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub pipeline_id: String,
    pub run_version: i64,
    pub status: RunStatus,
    pub current_checkpoint_id: Option<String>,
    pub current_checkpoint_position: Option<i64>,
    pub previous_run_id: Option<String>,
    pub extends_from_run_version: Option<i64>,
    pub checkpoint_order: Vec<String>,
    pub definition_version: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub last_resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Checkpoint id at `position` in this run's frozen order.
    pub fn checkpoint_at(&self, position: i64) -> Option<&str> {
        usize::try_from(position)
            .ok()
            .and_then(|p| self.checkpoint_order.get(p))
            .map(String::as_str)
    }
}

impl ToDocument for Run {
    fn to_document(&self) -> Value {
        json!({
            "run_id": self.id,
            "pipeline_id": self.pipeline_id,
            "run_version": self.run_version,
            "status": self.status.as_str(),
            "current_checkpoint_id": self.current_checkpoint_id,
            "current_checkpoint_position": self.current_checkpoint_position,
            "previous_run_id": self.previous_run_id,
            "extends_from_run_version": self.extends_from_run_version,
            "checkpoint_order": self.checkpoint_order,
            "definition_version": self.definition_version,
            "created_at": self.created_at.to_rfc3339(),
            "started_at": rfc3339(&self.started_at),
            "paused_at": rfc3339(&self.paused_at),
            "last_resumed_at": rfc3339(&self.last_resumed_at),
            "completed_at": rfc3339(&self.completed_at),
            "failed_at": rfc3339(&self.failed_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointExecution {
    pub id: String,
    pub run_id: String,
    pub checkpoint_id: String,
    pub checkpoint_position: i64,
    pub status: ExecutionStatus,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub revision_iteration: u32,
    pub max_revision_iterations: u32,
    pub temp_workspace_path: PathBuf,
    pub permanent_output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl ToDocument for CheckpointExecution {
    fn to_document(&self) -> Value {
        json!({
            "execution_id": self.id,
            "run_id": self.run_id,
            "checkpoint_id": self.checkpoint_id,
            "checkpoint_position": self.checkpoint_position,
            "status": self.status.as_str(),
            "attempt_number": self.attempt_number,
            "max_attempts": self.max_attempts,
            "revision_iteration": self.revision_iteration,
            "max_revision_iterations": self.max_revision_iterations,
            "temp_workspace_path": self.temp_workspace_path.display().to_string(),
            "permanent_output_path": self.permanent_output_path.display().to_string(),
            "created_at": self.created_at.to_rfc3339(),
            "started_at": rfc3339(&self.started_at),
            "completed_at": rfc3339(&self.completed_at),
            "failed_at": rfc3339(&self.failed_at),
        })
    }
}

/// A produced file. `artifact_id` names the role and survives revisions and
/// promotion; `id` is the storage record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub execution_id: String,
    pub artifact_id: String,
    pub name: String,
    pub format: ArtifactFormat,
    pub file_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: String,
    pub promoted_to_permanent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn is_promoted(&self) -> bool {
        self.promoted_to_permanent_at.is_some()
    }
}

impl ToDocument for Artifact {
    fn to_document(&self) -> Value {
        json!({
            "artifact_record_id": self.id,
            "artifact_id": self.artifact_id,
            "execution_id": self.execution_id,
            "name": self.name,
            "format": self.format.as_str(),
            "file_path": self.file_path.display().to_string(),
            "size_bytes": self.size_bytes,
            "checksum": self.checksum,
            "is_promoted": self.is_promoted(),
            "promoted_to_permanent_at": rfc3339(&self.promoted_to_permanent_at),
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInteraction {
    pub id: i64,
    pub execution_id: String,
    pub interaction_type: InteractionType,
    pub user_input: Option<Value>,
    pub system_response: String,
    pub created_at: DateTime<Utc>,
}

impl ToDocument for HumanInteraction {
    fn to_document(&self) -> Value {
        json!({
            "interaction_id": self.id,
            "execution_id": self.execution_id,
            "interaction_type": self.interaction_type.as_str(),
            "user_input": self.user_input,
            "system_response": self.system_response,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

/// Itemized record of everything one rollback removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RollbackManifest {
    pub deleted_runs: Vec<String>,
    pub deleted_checkpoint_executions: Vec<String>,
    pub archived_artifacts: Vec<String>,
    /// Artifact records whose file was already gone when the rollback ran.
    #[serde(default)]
    pub missing_artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub id: String,
    pub pipeline_id: String,
    pub rollback_type: RollbackType,
    pub source_run_id: String,
    pub source_run_version: i64,
    pub target_run_id: String,
    pub target_run_version: i64,
    pub target_checkpoint_id: String,
    pub target_checkpoint_position: i64,
    pub archive_location: PathBuf,
    pub trigger: RollbackTrigger,
    pub user_reason: Option<String>,
    pub manifest: RollbackManifest,
    pub created_at: DateTime<Utc>,
}

impl ToDocument for RollbackEvent {
    fn to_document(&self) -> Value {
        json!({
            "rollback_id": self.id,
            "pipeline_id": self.pipeline_id,
            "rollback_type": self.rollback_type.as_str(),
            "source_run_id": self.source_run_id,
            "source_run_version": self.source_run_version,
            "target_run_id": self.target_run_id,
            "target_run_version": self.target_run_version,
            "target_checkpoint_id": self.target_checkpoint_id,
            "target_checkpoint_position": self.target_checkpoint_position,
            "archive_location": self.archive_location.display().to_string(),
            "trigger": self.trigger.as_str(),
            "user_reason": self.user_reason,
            "rolled_back_items": self.manifest,
            "created_at": self.created_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedItem {
    pub id: i64,
    pub rollback_event_id: String,
    pub item_type: ArchivedItemType,
    pub item_id: String,
    pub original_path: PathBuf,
    pub archived_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub archived_at: DateTime<Utc>,
}

impl ToDocument for ArchivedItem {
    fn to_document(&self) -> Value {
        json!({
            "item_type": self.item_type.as_str(),
            "item_id": self.item_id,
            "original_path": self.original_path.display().to_string(),
            "archived_path": self.archived_path.display().to_string(),
            "size_bytes": self.size_bytes,
            "checksum": self.checksum,
            "archived_at": self.archived_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub event_type: String,
    pub pipeline_id: Option<String>,
    pub run_id: Option<String>,
    pub execution_id: Option<String>,
    pub checkpoint_id: Option<String>,
    pub rollback_event_id: Option<String>,
    pub description: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

// ── Views ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactView {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub file_exists: bool,
}

/// Promoted artifact from an earlier run at the same checkpoint position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousArtifact {
    pub run_version: i64,
    #[serde(flatten)]
    pub artifact: Artifact,
    pub file_exists: bool,
    pub inline_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: CheckpointExecution,
    pub checkpoint_name: String,
    pub interactions: Vec<HumanInteraction>,
    pub artifacts: Vec<ArtifactView>,
    pub previous_version_artifacts: Vec<PreviousArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: Run,
    pub executions: Vec<CheckpointExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MissingArtifact {
    pub name: String,
    pub reason: String,
}

/// Result of driving an execution to `completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub execution: CheckpointExecution,
    pub promoted: Vec<Artifact>,
    pub missing: Vec<MissingArtifact>,
    pub next_execution: Option<CheckpointExecution>,
    pub run_completed: bool,
}

/// Result of `submit_form_data`: either waiting for approval or already completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub execution: CheckpointExecution,
    pub artifact: Option<Artifact>,
    pub completion: Option<CompletionOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackPoint {
    pub position: i64,
    pub checkpoint_id: String,
    pub checkpoint_name: String,
    pub execution_id: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackDetail {
    #[serde(flatten)]
    pub event: RollbackEvent,
    pub archived_items: Vec<ArchivedItem>,
}

/// A rollback either removed something or found nothing to remove.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    RolledBack(RollbackDetail),
    NoOp { run_id: String, position: i64 },
}

impl RollbackOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPreview {
    pub artifact_record_id: String,
    pub name: String,
    pub format: ArtifactFormat,
    pub size_bytes: u64,
    pub file_exists: bool,
    pub content: Option<String>,
    pub truncated: bool,
}

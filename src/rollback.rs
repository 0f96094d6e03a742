//! Rollback and archival.
//!
//! A rollback removes executions (checkpoint level) or whole runs (run level)
//! and keeps a verified copy of everything it removes. Within one
//! `BEGIN IMMEDIATE` transaction it archives, deletes rows, records the
//! rollback event with its archived items and moves the pointers. Originals on
//! disk are deleted only after commit; a failure before commit removes the new
//! archive directory and leaves the store untouched.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{self, ArtifactStore, FsJournal};
use crate::context::PipelineContext;
use crate::db;
use crate::errors::{PipelineError, Result};
use crate::events::{EventType, NewEvent};
use crate::models::{
    ArchivedItem, ArchivedItemType, CheckpointExecution, ExecutionStatus, RollbackDetail,
    RollbackEvent, RollbackManifest, RollbackOutcome, RollbackPoint, RollbackTrigger, RollbackType,
    Run, RunStatus, ToDocument,
};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MANIFEST_FILE: &str = "rollback_manifest.json";
const RUN_RECORD_FILE: &str = "run_record.json";

/// Why a rollback was requested.
#[derive(Debug, Clone, Default)]
pub struct RollbackRequest {
    pub trigger: RollbackTrigger,
    pub user_reason: Option<String>,
}

impl RollbackRequest {
    pub fn user(reason: Option<String>) -> Self {
        Self {
            trigger: RollbackTrigger::UserRequest,
            user_reason: reason,
        }
    }
}

/// Copies victims into one rollback's archive directory and collects the
/// archived items and the manifest.
struct Archiver {
    archive_dir: PathBuf,
    data_dir: PathBuf,
    items: Vec<ArchivedItem>,
    manifest: RollbackManifest,
}

impl Archiver {
    fn new(
        files: &ArtifactStore,
        pipeline_id: &str,
        rollback_id: &str,
        journal: &mut FsJournal,
    ) -> Result<Self> {
        let archive_dir = files.archive_dir(pipeline_id, rollback_id, Utc::now());
        let data_dir = archive_dir.join("archived_data");
        std::fs::create_dir_all(&data_dir).map_err(|e| PipelineError::ArchiveFailure {
            path: data_dir.clone(),
            source: e.into(),
        })?;
        journal.created(&archive_dir);
        debug!(path = %archive_dir.display(), "Created archive directory");
        Ok(Self {
            archive_dir,
            data_dir,
            items: Vec::new(),
            manifest: RollbackManifest::default(),
        })
    }

    fn push(
        &mut self,
        item_type: ArchivedItemType,
        item_id: &str,
        original_path: &Path,
        archived_path: PathBuf,
        size_bytes: u64,
        checksum: Option<String>,
    ) {
        self.items.push(ArchivedItem {
            id: 0,
            rollback_event_id: String::new(),
            item_type,
            item_id: item_id.to_string(),
            original_path: original_path.to_path_buf(),
            archived_path,
            size_bytes,
            checksum,
            archived_at: Utc::now(),
        });
    }

    /// Archive an execution's artifact files and a JSON record of the
    /// execution, its interactions and its artifacts.
    fn archive_execution(
        &mut self,
        conn: &Connection,
        execution: &CheckpointExecution,
        run_version: i64,
    ) -> Result<()> {
        let records = db::artifacts::list_artifacts(conn, &execution.id)?;
        let interactions = db::executions::list_interactions(conn, &execution.id)?;

        for artifact in &records {
            if !artifact.file_path.is_file() {
                warn!(
                    artifact_id = %artifact.artifact_id,
                    path = %artifact.file_path.display(),
                    "Artifact file missing at archive time"
                );
                self.manifest.missing_artifacts.push(artifact.id.clone());
                continue;
            }
            let dest = self.data_dir.join("artifacts").join(artifacts::versioned_file_name(
                &artifact.name,
                &artifact.artifact_id,
                run_version,
                artifact.format,
            ));
            let stat = verified_copy(&artifact.file_path, &dest)?;
            self.push(
                ArchivedItemType::Artifact,
                &artifact.id,
                &artifact.file_path,
                dest,
                stat.size_bytes,
                Some(stat.checksum),
            );
            self.manifest.archived_artifacts.push(artifact.id.clone());
        }

        let record = json!({
            "execution": execution.to_document(),
            "interactions": interactions.iter().map(ToDocument::to_document).collect::<Vec<Value>>(),
            "artifacts": records.iter().map(ToDocument::to_document).collect::<Vec<Value>>(),
        });
        let dest = self
            .data_dir
            .join("executions")
            .join(format!("{}.json", execution.id));
        let stat = artifacts::write_json(&dest, &record).map_err(|e| {
            PipelineError::ArchiveFailure {
                path: dest.clone(),
                source: e,
            }
        })?;
        self.push(
            ArchivedItemType::CheckpointExecution,
            &execution.id,
            &execution.permanent_output_path,
            dest,
            stat.size_bytes,
            Some(stat.checksum),
        );
        self.manifest
            .deleted_checkpoint_executions
            .push(execution.id.clone());
        debug!(execution_id = %execution.id, artifacts = records.len(), "Archived execution");
        Ok(())
    }

    /// Copy a run's whole directory and write its record next to the copy.
    fn archive_run(&mut self, run: &Run, run_dir: &Path) -> Result<()> {
        let dest = self.data_dir.join(format!("v{}", run.run_version));
        let archive_failure = |source: anyhow::Error| PipelineError::ArchiveFailure {
            path: dest.clone(),
            source,
        };
        if run_dir.is_dir() {
            artifacts::copy_tree(run_dir, &dest).map_err(archive_failure)?;
        } else {
            warn!(run_id = %run.id, path = %run_dir.display(), "Run directory missing at archive time");
        }
        artifacts::write_json(&dest.join(RUN_RECORD_FILE), &run.to_document())
            .map_err(archive_failure)?;
        let size = artifacts::tree_size(&dest).map_err(archive_failure)?;
        self.push(ArchivedItemType::Run, &run.id, run_dir, dest.clone(), size, None);
        self.manifest.deleted_runs.push(run.id.clone());
        debug!(run_id = %run.id, size, "Archived run directory");
        Ok(())
    }

    /// Record the event and its items, then write the manifest file.
    fn finish(self, conn: &Connection, event: &RollbackEvent) -> Result<Vec<ArchivedItem>> {
        db::rollbacks::insert_rollback_event(conn, event)?;
        let mut items = Vec::with_capacity(self.items.len());
        for mut item in self.items {
            item.rollback_event_id = event.id.clone();
            items.push(db::rollbacks::insert_archived_item(conn, &item)?);
        }
        let manifest_path = self.data_dir.join(MANIFEST_FILE);
        let document = json!({
            "rollback": event.to_document(),
            "archived_items": items.iter().map(ToDocument::to_document).collect::<Vec<Value>>(),
        });
        artifacts::write_json(&manifest_path, &document).map_err(|e| {
            PipelineError::ArchiveFailure {
                path: manifest_path.clone(),
                source: e,
            }
        })?;
        Ok(items)
    }
}

/// Copy `src` to `dest` and check the copy against the source's checksum.
fn verified_copy(src: &Path, dest: &Path) -> Result<artifacts::FileStat> {
    let archive_failure = |source: anyhow::Error| PipelineError::ArchiveFailure {
        path: dest.to_path_buf(),
        source,
    };
    let expected = artifacts::checksum_file(src).map_err(archive_failure)?;
    let stat = artifacts::copy_file(src, dest).map_err(archive_failure)?;
    if stat.checksum != expected {
        return Err(archive_failure(anyhow!(
            "checksum mismatch: source {} archived {}",
            expected,
            stat.checksum
        )));
    }
    Ok(stat)
}

/// Reopen a finished run at `position`.
fn reset_pointer(run: &mut Run, position: i64, checkpoint_id: &str) {
    if matches!(run.status, RunStatus::Completed | RunStatus::Failed) {
        run.status = RunStatus::InProgress;
        run.completed_at = None;
        run.failed_at = None;
    }
    run.current_checkpoint_position = Some(position);
    run.current_checkpoint_id = Some(checkpoint_id.to_string());
}

/// The execution at `position` when it failed; it is redone on resume.
fn failed_execution_at(
    conn: &Connection,
    run_id: &str,
    position: i64,
) -> Result<Option<CheckpointExecution>> {
    Ok(db::executions::get_execution_at(conn, run_id, position)?
        .filter(|execution| execution.status == ExecutionStatus::Failed))
}

/// Resolve `position` in `run` and reject positions it has not reached.
fn target_checkpoint(run: &Run, position: i64) -> Result<String> {
    let checkpoint_id = run.checkpoint_at(position).ok_or_else(|| {
        PipelineError::Validation(format!(
            "run v{} has no checkpoint at position {}",
            run.run_version, position
        ))
    })?;
    match run.current_checkpoint_position {
        None => Err(PipelineError::Validation(format!(
            "run v{} has not started; there is nothing to roll back",
            run.run_version
        ))),
        Some(current) if position > current => Err(PipelineError::Validation(format!(
            "cannot roll run v{} forward from position {} to {}",
            run.run_version, current, position
        ))),
        Some(_) => Ok(checkpoint_id.to_string()),
    }
}

impl PipelineContext {
    /// Undo every execution of `run_id` beyond `target_position`, newest first.
    ///
    /// A failed execution at `target_position` is archived too, so resuming
    /// the run starts that checkpoint afresh.
    #[instrument(skip(self, request), fields(trigger = request.trigger.as_str()))]
    pub fn checkpoint_level_rollback(
        &self,
        run_id: &str,
        target_position: i64,
        request: RollbackRequest,
    ) -> Result<RollbackOutcome> {
        let tx = self.store().begin_immediate()?;
        let mut run = db::runs::get_run(&tx, run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", run_id))?;
        let target_checkpoint_id = target_checkpoint(&run, target_position)?;

        let mut victims = db::executions::executions_after(&tx, &run.id, target_position)?;
        victims.extend(failed_execution_at(&tx, &run.id, target_position)?);
        if victims.is_empty() {
            info!(run_id, target_position, "Nothing to roll back");
            return Ok(RollbackOutcome::NoOp {
                run_id: run.id,
                position: target_position,
            });
        }

        let rollback_id = Uuid::new_v4().to_string();
        let mut journal = FsJournal::new();
        let mut archiver = Archiver::new(self.files(), &run.pipeline_id, &rollback_id, &mut journal)?;
        for victim in &victims {
            archiver.archive_execution(&tx, victim, run.run_version)?;
            journal.remove_after_commit(&victim.temp_workspace_path);
            journal.remove_after_commit(&victim.permanent_output_path);
        }
        for victim in &victims {
            db::executions::delete_execution(&tx, &victim.id)?;
        }

        reset_pointer(&mut run, target_position, &target_checkpoint_id);
        db::runs::update_run(&tx, &run)?;

        let event = RollbackEvent {
            id: rollback_id,
            pipeline_id: run.pipeline_id.clone(),
            rollback_type: RollbackType::CheckpointLevel,
            source_run_id: run.id.clone(),
            source_run_version: run.run_version,
            target_run_id: run.id.clone(),
            target_run_version: run.run_version,
            target_checkpoint_id,
            target_checkpoint_position: target_position,
            archive_location: archiver.archive_dir.clone(),
            trigger: request.trigger,
            user_reason: request.user_reason,
            manifest: archiver.manifest.clone(),
            created_at: Utc::now(),
        };
        let archived_items = archiver.finish(&tx, &event)?;
        NewEvent::new(
            EventType::RollbackInitiated,
            format!(
                "Run v{} rolled back to position {}",
                run.run_version, target_position
            ),
        )
        .pipeline(&run.pipeline_id)
        .run(&run.id)
        .checkpoint(&event.target_checkpoint_id)
        .rollback(&event.id)
        .metadata(json!({
            "rollback_type": event.rollback_type.as_str(),
            "deleted_checkpoint_executions": event.manifest.deleted_checkpoint_executions.len(),
        }))
        .record(&tx)?;

        tx.commit().context("Failed to commit checkpoint rollback")?;
        journal.commit();
        info!(
            rollback_id = %event.id,
            removed = victims.len(),
            archive = %event.archive_location.display(),
            "Checkpoint rollback complete"
        );
        Ok(RollbackOutcome::RolledBack(RollbackDetail {
            event,
            archived_items,
        }))
    }

    /// Return a pipeline to `target_run_id` at `target_position`.
    ///
    /// Every run newer than the target is archived (executions, artifacts and
    /// its whole directory) and deleted, newest first. The target's own
    /// executions beyond `target_position` go the same way, as does a failed
    /// execution at `target_position`. The current run may be older than the
    /// target. The latest pointer moves to the target's version.
    #[instrument(skip(self, request), fields(trigger = request.trigger.as_str()))]
    pub fn run_level_rollback(
        &self,
        current_run_id: &str,
        target_run_id: &str,
        target_position: i64,
        request: RollbackRequest,
    ) -> Result<RollbackOutcome> {
        let tx = self.store().begin_immediate()?;
        let current = db::runs::get_run(&tx, current_run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", current_run_id))?;
        let mut target = db::runs::get_run(&tx, target_run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", target_run_id))?;
        if current.pipeline_id != target.pipeline_id {
            return Err(PipelineError::Validation(
                "current and target runs belong to different pipelines".to_string(),
            ));
        }
        let target_checkpoint_id = target_checkpoint(&target, target_position)?;

        let victim_runs = db::runs::runs_newer_than(&tx, &target.pipeline_id, target.run_version)?;
        let mut pruned = db::executions::executions_after(&tx, &target.id, target_position)?;
        pruned.extend(failed_execution_at(&tx, &target.id, target_position)?);
        if victim_runs.is_empty() && pruned.is_empty() {
            info!(target_run_id, target_position, "Nothing to roll back");
            return Ok(RollbackOutcome::NoOp {
                run_id: target.id,
                position: target_position,
            });
        }

        let rollback_id = Uuid::new_v4().to_string();
        let mut journal = FsJournal::new();
        let mut archiver =
            Archiver::new(self.files(), &target.pipeline_id, &rollback_id, &mut journal)?;
        for run in &victim_runs {
            let mut executions = db::executions::list_executions(&tx, &run.id)?;
            executions.reverse();
            for execution in &executions {
                archiver.archive_execution(&tx, execution, run.run_version)?;
                journal.remove_after_commit(&execution.temp_workspace_path);
            }
            let run_dir = self.files().run_dir(&run.pipeline_id, run.run_version);
            archiver.archive_run(run, &run_dir)?;
            journal.remove_after_commit(&run_dir);
        }
        for execution in &pruned {
            archiver.archive_execution(&tx, execution, target.run_version)?;
            journal.remove_after_commit(&execution.temp_workspace_path);
            journal.remove_after_commit(&execution.permanent_output_path);
        }

        for execution in &pruned {
            db::executions::delete_execution(&tx, &execution.id)?;
        }
        for run in &victim_runs {
            db::runs::delete_run(&tx, &run.id)?;
        }
        reset_pointer(&mut target, target_position, &target_checkpoint_id);
        db::runs::update_run(&tx, &target)?;

        let event = RollbackEvent {
            id: rollback_id,
            pipeline_id: target.pipeline_id.clone(),
            rollback_type: RollbackType::RunLevel,
            source_run_id: current.id.clone(),
            source_run_version: current.run_version,
            target_run_id: target.id.clone(),
            target_run_version: target.run_version,
            target_checkpoint_id,
            target_checkpoint_position: target_position,
            archive_location: archiver.archive_dir.clone(),
            trigger: request.trigger,
            user_reason: request.user_reason,
            manifest: archiver.manifest.clone(),
            created_at: Utc::now(),
        };
        let archived_items = archiver.finish(&tx, &event)?;
        NewEvent::new(
            EventType::RollbackInitiated,
            format!(
                "Pipeline rolled back from run v{} to run v{} position {}",
                current.run_version, target.run_version, target_position
            ),
        )
        .pipeline(&target.pipeline_id)
        .run(&target.id)
        .checkpoint(&event.target_checkpoint_id)
        .rollback(&event.id)
        .metadata(json!({
            "rollback_type": event.rollback_type.as_str(),
            "deleted_runs": event.manifest.deleted_runs,
            "deleted_checkpoint_executions": event.manifest.deleted_checkpoint_executions.len(),
        }))
        .record(&tx)?;

        tx.commit().context("Failed to commit run rollback")?;
        journal.commit();
        if let Err(e) = self
            .files()
            .update_latest_pointer(&target.pipeline_id, target.run_version)
        {
            warn!(error = %e, "Failed to repoint latest run");
        }
        info!(
            rollback_id = %event.id,
            runs_removed = victim_runs.len(),
            executions_pruned = pruned.len(),
            "Run rollback complete"
        );
        Ok(RollbackOutcome::RolledBack(RollbackDetail {
            event,
            archived_items,
        }))
    }

    /// Completed executions of a run, in position order.
    pub fn get_available_rollback_points(&self, run_id: &str) -> Result<Vec<RollbackPoint>> {
        let conn = self.store().conn();
        let run = self.get_run(run_id)?;
        let mut points = Vec::new();
        for execution in db::executions::list_executions(conn, &run.id)? {
            if execution.status != ExecutionStatus::Completed {
                continue;
            }
            let checkpoint_name = db::definitions::get_checkpoint(conn, &execution.checkpoint_id)?
                .map(|c| c.name)
                .unwrap_or_default();
            points.push(RollbackPoint {
                position: execution.checkpoint_position,
                is_current: run.current_checkpoint_position == Some(execution.checkpoint_position),
                checkpoint_id: execution.checkpoint_id,
                checkpoint_name,
                execution_id: execution.id,
                completed_at: execution.completed_at,
            });
        }
        Ok(points)
    }

    /// Rollback events of a pipeline, newest first, optionally limited to the
    /// events a run took part in.
    pub fn get_rollback_history(
        &self,
        pipeline_id: &str,
        run_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RollbackEvent>> {
        self.get_pipeline(pipeline_id)?;
        Ok(db::rollbacks::list_rollback_events(
            self.store().conn(),
            pipeline_id,
            run_id,
            limit,
        )?)
    }

    pub fn get_rollback_event(&self, rollback_id: &str) -> Result<RollbackDetail> {
        let conn = self.store().conn();
        let event = db::rollbacks::get_rollback_event(conn, rollback_id)?
            .ok_or_else(|| PipelineError::not_found("Rollback", rollback_id))?;
        let archived_items = db::rollbacks::list_archived_items(conn, rollback_id)?;
        Ok(RollbackDetail {
            event,
            archived_items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{
        CheckpointSpec, ExecutionMode, FormArtifactConfig, HumanOnlyConfig, InteractionPolicy,
    };
    use anyhow::Result;
    use tempfile::tempdir;

    fn spec(name: &str) -> CheckpointSpec {
        CheckpointSpec {
            name: name.to_string(),
            description: String::new(),
            execution: ExecutionMode::HumanOnly(HumanOnlyConfig {
                instructions: String::new(),
                input_fields: Vec::new(),
                save_form_as_artifact: Some(FormArtifactConfig::default()),
            }),
            policy: InteractionPolicy {
                requires_approval_to_complete: false,
                ..InteractionPolicy::default()
            },
            outputs: Vec::new(),
        }
    }

    /// A started run of a three-checkpoint pipeline with `completed` positions done.
    fn run_through(ctx: &PipelineContext, completed: usize) -> Result<Run> {
        let pipeline = ctx.create_pipeline("Rollback", "", true)?;
        for name in ["one", "two", "three"] {
            ctx.add_checkpoint(&pipeline.id, spec(name))?;
        }
        let run = ctx.create_run(&pipeline.id, None)?;
        let (_, mut execution) = ctx.start_run(&run.id)?;
        for i in 0..completed {
            let outcome = ctx.submit_form_data(&execution.id, json!({"step": i}))?;
            match outcome.completion.and_then(|c| c.next_execution) {
                Some(next) => execution = next,
                None => break,
            }
        }
        Ok(ctx.get_run(&run.id)?)
    }

    #[test]
    fn test_rollback_to_current_position_is_noop() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let run = run_through(&ctx, 1)?;

        let outcome = ctx.checkpoint_level_rollback(&run.id, 1, RollbackRequest::default())?;
        assert!(outcome.is_noop());
        assert!(ctx.get_rollback_history(&run.pipeline_id, None, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_rollback_forward_and_unknown_position_rejected() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let run = run_through(&ctx, 1)?;

        let err = ctx.checkpoint_level_rollback(&run.id, 2, RollbackRequest::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = ctx.checkpoint_level_rollback(&run.id, 7, RollbackRequest::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        let err = ctx.checkpoint_level_rollback("nope", 0, RollbackRequest::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { entity: "Run", .. }));
        Ok(())
    }

    #[test]
    fn test_checkpoint_rollback_archives_and_reopens() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let run = run_through(&ctx, 3)?;
        assert_eq!(run.status, RunStatus::Completed);
        let before = ctx.get_run_detail(&run.id)?.executions;
        let removed: Vec<_> = before.iter().filter(|e| e.checkpoint_position > 0).cloned().collect();

        let outcome = ctx.checkpoint_level_rollback(
            &run.id,
            0,
            RollbackRequest::user(Some("redo".to_string())),
        )?;
        let RollbackOutcome::RolledBack(detail) = outcome else {
            panic!("expected a rollback");
        };
        assert_eq!(detail.event.manifest.deleted_checkpoint_executions.len(), 2);
        assert_eq!(detail.event.manifest.archived_artifacts.len(), 2);
        assert_eq!(detail.event.user_reason.as_deref(), Some("redo"));
        for item in &detail.archived_items {
            assert!(item.archived_path.is_file(), "{}", item.archived_path.display());
            assert!(item.archived_path.starts_with(&detail.event.archive_location));
        }
        assert!(
            detail
                .event
                .archive_location
                .join("archived_data")
                .join(MANIFEST_FILE)
                .is_file()
        );

        let reopened = ctx.get_run_detail(&run.id)?;
        assert_eq!(reopened.run.status, RunStatus::InProgress);
        assert_eq!(reopened.run.current_checkpoint_position, Some(0));
        assert!(reopened.run.completed_at.is_none());
        assert_eq!(reopened.executions.len(), 1);
        for execution in removed {
            assert!(!execution.permanent_output_path.exists());
        }

        let again = ctx.checkpoint_level_rollback(&run.id, 0, RollbackRequest::default())?;
        assert!(again.is_noop());

        let resumed = ctx.resume_run(&run.id)?;
        assert_eq!(resumed.executions.len(), 2);
        assert_eq!(resumed.executions[1].status, ExecutionStatus::InProgress);
        Ok(())
    }

    #[test]
    fn test_archive_failure_leaves_state_untouched() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let run = run_through(&ctx, 2)?;

        // A file where the archive root should be makes the archive directory uncreatable.
        let archive_root = ctx.files().archive_root(&run.pipeline_id);
        std::fs::write(&archive_root, b"blocker")?;
        let err = ctx.checkpoint_level_rollback(&run.id, 0, RollbackRequest::default()).unwrap_err();
        assert!(matches!(err, PipelineError::ArchiveFailure { .. }));

        let detail = ctx.get_run_detail(&run.id)?;
        assert_eq!(detail.executions.len(), 3);
        assert_eq!(detail.run.current_checkpoint_position, Some(2));
        for execution in &detail.executions {
            assert!(execution.permanent_output_path.exists());
        }
        Ok(())
    }

    #[test]
    fn test_rollback_points_list_completed_executions() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let run = run_through(&ctx, 2)?;

        let points = ctx.get_available_rollback_points(&run.id)?;
        let positions: Vec<i64> = points.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1]);
        assert_eq!(points[1].checkpoint_name, "two");
        assert!(points.iter().all(|p| !p.is_current));
        Ok(())
    }
}

//! Run lineage: versioned runs of a pipeline, their position pointer and the
//! `latest` pointer.

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{self, FsJournal, RUN_INFO_FILE};
use crate::context::PipelineContext;
use crate::db;
use crate::errors::{PipelineError, Result};
use crate::events::{EventType, NewEvent};
use crate::execution::{self, StartGate};
use crate::models::{CheckpointExecution, ExecutionStatus, Run, RunDetail, RunStatus, ToDocument};

impl PipelineContext {
    /// Create the next version of a pipeline's run.
    ///
    /// The new run links to `extends_from_run_id` when given, otherwise to the
    /// pipeline's latest run. It freezes the pipeline's current checkpoint order.
    #[instrument(skip(self))]
    pub fn create_run(&self, pipeline_id: &str, extends_from_run_id: Option<&str>) -> Result<Run> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let pipeline = db::definitions::get_pipeline(&tx, pipeline_id)?
            .ok_or_else(|| PipelineError::not_found("Pipeline", pipeline_id))?;
        if pipeline.checkpoint_order.is_empty() {
            return Err(PipelineError::Validation(format!(
                "pipeline '{}' has no checkpoints",
                pipeline.name
            )));
        }

        let previous = match extends_from_run_id {
            Some(id) => {
                let run = db::runs::get_run(&tx, id)?
                    .ok_or_else(|| PipelineError::not_found("Run", id))?;
                if run.pipeline_id != pipeline.id {
                    return Err(PipelineError::Validation(format!(
                        "run {} belongs to a different pipeline",
                        id
                    )));
                }
                Some(run)
            }
            None => db::runs::latest_run(&tx, &pipeline.id)?,
        };

        let run = Run {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline.id.clone(),
            run_version: db::runs::max_run_version(&tx, &pipeline.id)? + 1,
            status: RunStatus::NotStarted,
            current_checkpoint_id: None,
            current_checkpoint_position: None,
            previous_run_id: previous.as_ref().map(|r| r.id.clone()),
            extends_from_run_version: previous.as_ref().map(|r| r.run_version),
            checkpoint_order: pipeline.checkpoint_order.clone(),
            definition_version: pipeline.definition_version,
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            last_resumed_at: None,
            completed_at: None,
            failed_at: None,
        };
        db::runs::insert_run(&tx, &run)?;

        let run_dir = self.files().run_dir(&pipeline.id, run.run_version);
        if !run_dir.exists() {
            journal.created(&run_dir);
        }
        artifacts::write_json(&run_dir.join(RUN_INFO_FILE), &run.to_document())?;

        NewEvent::new(EventType::RunCreated, format!("Run v{} created", run.run_version))
            .pipeline(&pipeline.id)
            .run(&run.id)
            .metadata(json!({
                "run_version": run.run_version,
                "extends_from_run_version": run.extends_from_run_version,
            }))
            .record(&tx)?;
        tx.commit().context("Failed to commit run creation")?;
        journal.commit();

        if let Err(e) = self.files().update_latest_pointer(&pipeline.id, run.run_version) {
            warn!(error = %e, "Failed to update latest run pointer");
        }
        info!(run_id = %run.id, run_version = run.run_version, "Created run");
        Ok(run)
    }

    /// Start a `not_started` run at position 0.
    #[instrument(skip(self))]
    pub fn start_run(&self, run_id: &str) -> Result<(Run, CheckpointExecution)> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let mut run = db::runs::get_run(&tx, run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", run_id))?;
        if run.status != RunStatus::NotStarted {
            return Err(PipelineError::invalid_state(
                "Run",
                &run.id,
                run.status,
                RunStatus::NotStarted,
            ));
        }

        let now = Utc::now();
        run.status = RunStatus::InProgress;
        run.started_at = Some(now);
        run.current_checkpoint_position = Some(0);
        run.current_checkpoint_id = run.checkpoint_at(0).map(str::to_string);
        db::runs::update_run(&tx, &run)?;
        let execution = execution::create_execution(
            &tx,
            self.files(),
            self.limits(),
            &run,
            0,
            StartGate::Policy,
            &mut journal,
        )?;
        NewEvent::new(EventType::RunStarted, format!("Run v{} started", run.run_version))
            .pipeline(&run.pipeline_id)
            .run(&run.id)
            .execution(&execution.id)
            .record(&tx)?;
        tx.commit().context("Failed to commit run start")?;
        journal.commit();
        info!(run_id = %run.id, execution_id = %execution.id, "Started run");
        Ok((run, execution))
    }

    #[instrument(skip(self))]
    pub fn pause_run(&self, run_id: &str) -> Result<Run> {
        let tx = self.store().begin_immediate()?;
        let mut run = db::runs::get_run(&tx, run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", run_id))?;
        if run.status != RunStatus::InProgress {
            return Err(PipelineError::invalid_state(
                "Run",
                &run.id,
                run.status,
                RunStatus::InProgress,
            ));
        }
        run.status = RunStatus::Paused;
        run.paused_at = Some(Utc::now());
        db::runs::update_run(&tx, &run)?;
        NewEvent::new(EventType::RunPaused, format!("Run v{} paused", run.run_version))
            .pipeline(&run.pipeline_id)
            .run(&run.id)
            .record(&tx)?;
        tx.commit().context("Failed to commit run pause")?;
        info!(run_id = %run.id, "Paused run");
        Ok(run)
    }

    /// Resume a paused run, or pick up a run left at a completed position.
    ///
    /// A run whose current execution is completed with no successor (the state
    /// a checkpoint rollback leaves behind) gets its successor created, or is
    /// completed when no later position exists. A position with no execution
    /// left (its failed execution was rolled back) gets a fresh one.
    #[instrument(skip(self))]
    pub fn resume_run(&self, run_id: &str) -> Result<RunDetail> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let mut run = db::runs::get_run(&tx, run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", run_id))?;
        match run.status {
            RunStatus::Paused => {
                run.status = RunStatus::InProgress;
                run.last_resumed_at = Some(Utc::now());
                db::runs::update_run(&tx, &run)?;
                NewEvent::new(EventType::RunResumed, format!("Run v{} resumed", run.run_version))
                    .pipeline(&run.pipeline_id)
                    .run(&run.id)
                    .record(&tx)?;
            }
            RunStatus::InProgress => {}
            other => {
                return Err(PipelineError::invalid_state(
                    "Run",
                    &run.id,
                    other,
                    "paused or in_progress",
                ));
            }
        }

        if let Some(position) = run.current_checkpoint_position {
            let current = db::executions::get_execution_at(&tx, &run.id, position)?;
            let successor = db::executions::get_execution_at(&tx, &run.id, position + 1)?;
            match (current, successor) {
                (None, _) => {
                    execution::create_execution(
                        &tx,
                        self.files(),
                        self.limits(),
                        &run,
                        position,
                        StartGate::Policy,
                        &mut journal,
                    )?;
                }
                (Some(current), None) if current.status == ExecutionStatus::Completed => {
                    execution::advance_run(
                        &tx,
                        self.files(),
                        self.limits(),
                        &mut run,
                        &current,
                        &mut journal,
                    )?;
                }
                _ => {}
            }
        }

        let executions = db::executions::list_executions(&tx, &run.id)?;
        tx.commit().context("Failed to commit run resume")?;
        journal.commit();
        info!(run_id = %run.id, status = %run.status, "Resumed run");
        Ok(RunDetail { run, executions })
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        db::runs::get_run(self.store().conn(), run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", run_id))
    }

    pub fn get_run_detail(&self, run_id: &str) -> Result<RunDetail> {
        let run = self.get_run(run_id)?;
        let executions = db::executions::list_executions(self.store().conn(), &run.id)?;
        Ok(RunDetail { run, executions })
    }

    /// Runs of a pipeline, newest version first.
    pub fn list_runs(&self, pipeline_id: &str) -> Result<Vec<Run>> {
        self.get_pipeline(pipeline_id)?;
        Ok(db::runs::list_runs(self.store().conn(), pipeline_id)?)
    }

    pub fn get_latest_run(&self, pipeline_id: &str) -> Result<Option<Run>> {
        self.get_pipeline(pipeline_id)?;
        Ok(db::runs::latest_run(self.store().conn(), pipeline_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{CheckpointSpec, ExecutionMode, HumanOnlyConfig, InteractionPolicy};
    use anyhow::Result;
    use serde_json::json;
    use tempfile::tempdir;

    fn spec(name: &str) -> CheckpointSpec {
        CheckpointSpec {
            name: name.to_string(),
            description: String::new(),
            execution: ExecutionMode::HumanOnly(HumanOnlyConfig::default()),
            policy: InteractionPolicy {
                requires_approval_to_complete: false,
                ..InteractionPolicy::default()
            },
            outputs: Vec::new(),
        }
    }

    fn pipeline_with(ctx: &PipelineContext, names: &[&str]) -> Result<String> {
        let pipeline = ctx.create_pipeline("Lineage", "", true)?;
        for name in names {
            ctx.add_checkpoint(&pipeline.id, spec(name))?;
        }
        Ok(pipeline.id)
    }

    #[test]
    fn test_versions_increase_and_link_to_latest() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let pipeline_id = pipeline_with(&ctx, &["a"])?;

        let v1 = ctx.create_run(&pipeline_id, None)?;
        let v2 = ctx.create_run(&pipeline_id, None)?;
        let v3 = ctx.create_run(&pipeline_id, Some(&v1.id))?;
        assert_eq!((v1.run_version, v2.run_version, v3.run_version), (1, 2, 3));
        assert_eq!(v1.previous_run_id, None);
        assert_eq!(v2.previous_run_id.as_deref(), Some(v1.id.as_str()));
        assert_eq!(v3.extends_from_run_version, Some(1));

        assert_eq!(ctx.files().read_latest_pointer(&pipeline_id)?, Some(3));
        assert!(ctx.files().run_dir(&pipeline_id, 2).join(RUN_INFO_FILE).is_file());
        let versions: Vec<i64> = ctx.list_runs(&pipeline_id)?.iter().map(|r| r.run_version).collect();
        assert_eq!(versions, vec![3, 2, 1]);
        Ok(())
    }

    #[test]
    fn test_empty_pipeline_cannot_run() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let pipeline_id = pipeline_with(&ctx, &[])?;
        let err = ctx.create_run(&pipeline_id, None).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(ctx.get_latest_run(&pipeline_id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_start_only_once() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let pipeline_id = pipeline_with(&ctx, &["a", "b"])?;
        let run = ctx.create_run(&pipeline_id, None)?;

        let (started, execution) = ctx.start_run(&run.id)?;
        assert_eq!(started.status, RunStatus::InProgress);
        assert_eq!(started.current_checkpoint_position, Some(0));
        assert_eq!(execution.status, ExecutionStatus::InProgress);
        assert!(execution.temp_workspace_path.is_dir());
        assert!(execution.permanent_output_path.is_dir());

        let err = ctx.start_run(&run.id).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStateTransition { entity: "Run", .. }));
        Ok(())
    }

    #[test]
    fn test_pause_blocks_execution_operations() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let pipeline_id = pipeline_with(&ctx, &["a"])?;
        let run = ctx.create_run(&pipeline_id, None)?;
        let (_, execution) = ctx.start_run(&run.id)?;

        let paused = ctx.pause_run(&run.id)?;
        assert_eq!(paused.status, RunStatus::Paused);
        let err = ctx.submit_form_data(&execution.id, json!({})).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidStateTransition { entity: "Run", .. }));

        let resumed = ctx.resume_run(&run.id)?;
        assert_eq!(resumed.run.status, RunStatus::InProgress);
        assert!(resumed.run.last_resumed_at.is_some());
        ctx.submit_form_data(&execution.id, json!({}))?;
        assert_eq!(ctx.get_run(&run.id)?.status, RunStatus::Completed);
        Ok(())
    }

    #[test]
    fn test_run_keeps_order_after_reorder() -> Result<()> {
        let dir = tempdir()?;
        let ctx = PipelineContext::in_memory(dir.path())?;
        let pipeline_id = pipeline_with(&ctx, &["a", "b"])?;
        let run = ctx.create_run(&pipeline_id, None)?;
        let original = run.checkpoint_order.clone();

        let reversed: Vec<String> = original.iter().rev().cloned().collect();
        ctx.reorder_checkpoints(&pipeline_id, reversed)?;
        let (started, execution) = ctx.start_run(&run.id)?;
        assert_eq!(started.checkpoint_order, original);
        assert_eq!(execution.checkpoint_id, original[0]);
        assert_eq!(started.definition_version, 1);
        Ok(())
    }
}

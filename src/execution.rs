//! Checkpoint execution state machine.
//!
//! ```text
//! pending -> waiting_approval_to_start -> in_progress
//! pending -> in_progress
//! in_progress -> waiting_approval_to_complete -> completed
//!                                             -> in_progress   (revision)
//!                                             -> failed        (revision limit)
//! in_progress -> completed                    (no completion approval)
//! ```
//!
//! Every transition runs inside one `BEGIN IMMEDIATE` transaction. File moves
//! made before commit are journaled in an [`FsJournal`] and reversed if the
//! transaction does not commit.

use anyhow::Context;
use chrono::Utc;
use rusqlite::Connection;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::artifacts::{self, ArtifactStore, FsJournal};
use crate::config::Limits;
use crate::context::PipelineContext;
use crate::db;
use crate::definitions::{CheckpointDefinition, FormArtifactConfig};
use crate::errors::{PipelineError, Result};
use crate::events::{EventType, NewEvent};
use crate::models::{
    Artifact, ArtifactFormat, CheckpointExecution, CompletionOutcome, ExecutionDetail,
    ExecutionStatus, InteractionType, PreviousArtifact, Run, RunStatus, SubmissionOutcome,
};

pub const FORM_SUBMISSION_FILE: &str = "form_submission.json";
const WAITING_FOR_START: &str = "Waiting for user approval to start this checkpoint.";

/// Whether a newly created execution starts immediately or waits for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartGate {
    /// Wait only if the checkpoint requires approval to start.
    Policy,
    /// Start only if auto-advance is on and the checkpoint does not require approval.
    AutoAdvance(bool),
}

/// Insert the execution for `position` of `run` and move it out of `pending`.
pub(crate) fn create_execution(
    conn: &Connection,
    files: &ArtifactStore,
    limits: &Limits,
    run: &Run,
    position: i64,
    gate: StartGate,
    journal: &mut FsJournal,
) -> Result<CheckpointExecution> {
    let checkpoint_id = run.checkpoint_at(position).ok_or_else(|| {
        PipelineError::Validation(format!(
            "run v{} has no checkpoint at position {}",
            run.run_version, position
        ))
    })?;
    let checkpoint = db::definitions::get_checkpoint(conn, checkpoint_id)?
        .ok_or_else(|| PipelineError::not_found("Checkpoint", checkpoint_id))?;

    let id = Uuid::new_v4().to_string();
    let temp = files.temp_dir(&run.pipeline_id, &id);
    let permanent =
        files.checkpoint_dir(&run.pipeline_id, run.run_version, position, &checkpoint.name);
    let mut execution = CheckpointExecution {
        id,
        run_id: run.id.clone(),
        checkpoint_id: checkpoint.id.clone(),
        checkpoint_position: position,
        status: ExecutionStatus::Pending,
        attempt_number: 1,
        max_attempts: 1,
        revision_iteration: 0,
        max_revision_iterations: checkpoint.policy.revision_limit(limits),
        temp_workspace_path: temp.clone(),
        permanent_output_path: permanent.clone(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        failed_at: None,
    };
    db::executions::insert_execution(conn, &execution)?;

    let permanent_existed = permanent.exists();
    files.prepare_execution(&temp, &permanent)?;
    journal.created(&temp);
    if !permanent_existed {
        journal.created(&permanent);
    }

    let requires_approval = checkpoint.policy.requires_approval_to_start;
    let wait = match gate {
        StartGate::Policy => requires_approval,
        StartGate::AutoAdvance(auto_advance) => requires_approval || !auto_advance,
    };
    if wait {
        execution.status = ExecutionStatus::WaitingApprovalToStart;
        db::executions::update_execution(conn, &execution)?;
        db::executions::insert_interaction(
            conn,
            &execution.id,
            InteractionType::ApprovalToStart,
            None,
            WAITING_FOR_START,
        )?;
    } else {
        mark_started(conn, &mut execution, &run.pipeline_id)?;
    }
    info!(
        execution_id = %execution.id,
        position,
        status = %execution.status,
        "Created checkpoint execution"
    );
    Ok(execution)
}

fn mark_started(
    conn: &Connection,
    execution: &mut CheckpointExecution,
    pipeline_id: &str,
) -> Result<()> {
    execution.status = ExecutionStatus::InProgress;
    execution.started_at = Some(Utc::now());
    db::executions::update_execution(conn, execution)?;
    NewEvent::new(
        EventType::ExecutionStarted,
        format!("Checkpoint at position {} started", execution.checkpoint_position),
    )
    .pipeline(pipeline_id)
    .run(&execution.run_id)
    .execution(&execution.id)
    .checkpoint(&execution.checkpoint_id)
    .record(conn)?;
    Ok(())
}

/// Execution, its run and its checkpoint, loaded for a mutating operation.
struct Loaded {
    execution: CheckpointExecution,
    run: Run,
    checkpoint: CheckpointDefinition,
}

fn load_for_mutation(
    conn: &Connection,
    execution_id: &str,
    expected: ExecutionStatus,
) -> Result<Loaded> {
    let execution = db::executions::get_execution(conn, execution_id)?
        .ok_or_else(|| PipelineError::not_found("Execution", execution_id))?;
    let run = db::runs::get_run(conn, &execution.run_id)?
        .ok_or_else(|| PipelineError::not_found("Run", &execution.run_id))?;
    if run.status != RunStatus::InProgress {
        return Err(PipelineError::invalid_state(
            "Run",
            &run.id,
            run.status,
            RunStatus::InProgress,
        ));
    }
    if execution.status != expected {
        return Err(PipelineError::invalid_state(
            "Execution",
            &execution.id,
            execution.status,
            expected,
        ));
    }
    let checkpoint = db::definitions::get_checkpoint(conn, &execution.checkpoint_id)?
        .ok_or_else(|| PipelineError::not_found("Checkpoint", &execution.checkpoint_id))?;
    Ok(Loaded {
        execution,
        run,
        checkpoint,
    })
}

/// Drive an execution to `completed`, then advance the run or complete it.
#[allow(clippy::too_many_arguments)]
fn complete_execution(
    conn: &Connection,
    files: &ArtifactStore,
    limits: &Limits,
    loaded: Loaded,
    promote: bool,
    interaction: InteractionType,
    user_input: Option<&Value>,
    journal: &mut FsJournal,
) -> Result<CompletionOutcome> {
    let Loaded {
        mut execution,
        mut run,
        checkpoint,
    } = loaded;

    let (promoted, missing) = if promote {
        artifacts::promote_staged(conn, &execution, &checkpoint, run.run_version, journal)?
    } else {
        (Vec::new(), Vec::new())
    };

    let now = Utc::now();
    execution.status = ExecutionStatus::Completed;
    execution.completed_at = Some(now);
    db::executions::update_execution(conn, &execution)?;
    let response = if promote {
        format!(
            "Checkpoint completed; {} artifact(s) promoted.",
            promoted.len()
        )
    } else {
        "Checkpoint completed without promoting artifacts.".to_string()
    };
    db::executions::insert_interaction(conn, &execution.id, interaction, user_input, &response)?;
    NewEvent::new(
        EventType::CheckpointCompleted,
        format!("Checkpoint '{}' completed", checkpoint.name),
    )
    .pipeline(&run.pipeline_id)
    .run(&run.id)
    .execution(&execution.id)
    .checkpoint(&checkpoint.id)
    .metadata(json!({
        "promoted": promoted.iter().map(|a| a.artifact_id.as_str()).collect::<Vec<_>>(),
        "missing": missing,
    }))
    .record(conn)?;
    journal.remove_after_commit(&execution.temp_workspace_path);

    let (next_execution, run_completed) =
        advance_run(conn, files, limits, &mut run, &execution, journal)?;
    Ok(CompletionOutcome {
        execution,
        promoted,
        missing,
        next_execution,
        run_completed,
    })
}

/// After `completed` is recorded: create the successor execution, or mark the
/// run completed when `completed` was the last position.
pub(crate) fn advance_run(
    conn: &Connection,
    files: &ArtifactStore,
    limits: &Limits,
    run: &mut Run,
    completed: &CheckpointExecution,
    journal: &mut FsJournal,
) -> Result<(Option<CheckpointExecution>, bool)> {
    let next_position = completed.checkpoint_position + 1;
    match run.checkpoint_at(next_position).map(str::to_string) {
        Some(next_checkpoint_id) => {
            let pipeline = db::definitions::get_pipeline(conn, &run.pipeline_id)?
                .ok_or_else(|| PipelineError::not_found("Pipeline", &run.pipeline_id))?;
            let next = create_execution(
                conn,
                files,
                limits,
                run,
                next_position,
                StartGate::AutoAdvance(pipeline.auto_advance),
                journal,
            )?;
            run.current_checkpoint_id = Some(next_checkpoint_id);
            run.current_checkpoint_position = Some(next_position);
            db::runs::update_run(conn, run)?;
            debug!(run_id = %run.id, position = next_position, "Advanced run");
            Ok((Some(next), false))
        }
        None => {
            run.status = RunStatus::Completed;
            run.completed_at = Some(Utc::now());
            db::runs::update_run(conn, run)?;
            NewEvent::new(
                EventType::PipelineCompleted,
                format!("Run v{} completed", run.run_version),
            )
            .pipeline(&run.pipeline_id)
            .run(&run.id)
            .record(conn)?;
            info!(run_id = %run.id, run_version = run.run_version, "Run completed");
            Ok((None, true))
        }
    }
}

/// Render a form submission as the configured artifact format.
fn render_form(data: &Value, config: &FormArtifactConfig) -> anyhow::Result<Vec<u8>> {
    match config.format {
        ArtifactFormat::Md => {
            let mut out = String::from("# Form Data\n\n");
            if let Some(object) = data.as_object() {
                for (key, value) in object {
                    let text = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out.push_str(&format!("**{}**: {}\n\n", key, text));
                }
            }
            Ok(out.into_bytes())
        }
        _ => serde_json::to_vec_pretty(data).context("Failed to serialize form data"),
    }
}

impl PipelineContext {
    /// Approve an execution waiting at `waiting_approval_to_start`.
    #[instrument(skip(self))]
    pub fn approve_start(&self, execution_id: &str) -> Result<CheckpointExecution> {
        let tx = self.store().begin_immediate()?;
        let Loaded { mut execution, run, .. } =
            load_for_mutation(&tx, execution_id, ExecutionStatus::WaitingApprovalToStart)?;
        mark_started(&tx, &mut execution, &run.pipeline_id)?;
        db::executions::insert_interaction(
            &tx,
            &execution.id,
            InteractionType::ApprovalToStart,
            Some(&json!({"approved": true})),
            "Checkpoint started.",
        )?;
        tx.commit().context("Failed to commit start approval")?;
        info!(execution_id = %execution.id, "Start approved");
        Ok(execution)
    }

    /// Record a form submission for an in-progress execution.
    ///
    /// The submission is validated against the checkpoint's input fields and
    /// written to the workspace. If the checkpoint saves its form as an
    /// artifact, the artifact is staged (overwriting any previous revision).
    /// Without a completion-approval requirement the execution completes and
    /// its artifacts are promoted in the same transaction.
    #[instrument(skip(self, data))]
    pub fn submit_form_data(&self, execution_id: &str, data: Value) -> Result<SubmissionOutcome> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let mut loaded = load_for_mutation(&tx, execution_id, ExecutionStatus::InProgress)?;
        let config = loaded.checkpoint.human_only().clone();
        let filled = config.validate_form(&data)?;

        let workspace = artifacts::workspace_dir(&loaded.execution.temp_workspace_path);
        journal.write_json(&workspace.join(FORM_SUBMISSION_FILE), &filled)?;

        let artifact: Option<Artifact> = match &config.save_form_as_artifact {
            Some(form) => {
                let bytes = render_form(&filled, form)?;
                Some(artifacts::stage_bytes(
                    &tx,
                    &loaded.execution,
                    &form.artifact_name,
                    form.format,
                    &bytes,
                    &mut journal,
                )?)
            }
            None => None,
        };

        db::executions::insert_interaction(
            &tx,
            &loaded.execution.id,
            InteractionType::FormSubmission,
            Some(&filled),
            "Form data received.",
        )?;
        NewEvent::new(
            EventType::FormSubmitted,
            format!("Form submitted for '{}'", loaded.checkpoint.name),
        )
        .pipeline(&loaded.run.pipeline_id)
        .run(&loaded.run.id)
        .execution(&loaded.execution.id)
        .checkpoint(&loaded.checkpoint.id)
        .metadata(json!({"revision_iteration": loaded.execution.revision_iteration}))
        .record(&tx)?;

        let outcome = if loaded.checkpoint.policy.requires_approval_to_complete {
            loaded.execution.status = ExecutionStatus::WaitingApprovalToComplete;
            db::executions::update_execution(&tx, &loaded.execution)?;
            SubmissionOutcome {
                execution: loaded.execution,
                artifact,
                completion: None,
            }
        } else {
            let completion = complete_execution(
                &tx,
                self.files(),
                self.limits(),
                loaded,
                true,
                InteractionType::AutoCompletion,
                None,
                &mut journal,
            )?;
            SubmissionOutcome {
                execution: completion.execution.clone(),
                artifact,
                completion: Some(completion),
            }
        };

        tx.commit().context("Failed to commit form submission")?;
        journal.commit();
        info!(execution_id, status = %outcome.execution.status, "Form submitted");
        Ok(outcome)
    }

    /// Stage a file produced for one of the checkpoint's declared outputs.
    #[instrument(skip(self))]
    pub fn stage_output(
        &self,
        execution_id: &str,
        name: &str,
        source: &std::path::Path,
    ) -> Result<Artifact> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let loaded = load_for_mutation(&tx, execution_id, ExecutionStatus::InProgress)?;
        let declared = loaded.checkpoint.output(name).ok_or_else(|| {
            PipelineError::Validation(format!(
                "checkpoint '{}' declares no output named '{}'",
                loaded.checkpoint.name, name
            ))
        })?;
        let bytes = std::fs::read(source).map_err(|e| PipelineError::io(source, e))?;
        let artifact = artifacts::stage_bytes(
            &tx,
            &loaded.execution,
            name,
            declared.format,
            &bytes,
            &mut journal,
        )?;
        db::executions::insert_interaction(
            &tx,
            &loaded.execution.id,
            InteractionType::OutputStaged,
            Some(&json!({"name": name, "source": source.display().to_string()})),
            "Output staged.",
        )?;
        NewEvent::new(EventType::OutputStaged, format!("Output '{}' staged", name))
            .pipeline(&loaded.run.pipeline_id)
            .run(&loaded.run.id)
            .execution(&loaded.execution.id)
            .checkpoint(&loaded.checkpoint.id)
            .metadata(json!({"artifact_id": artifact.artifact_id, "size_bytes": artifact.size_bytes}))
            .record(&tx)?;
        tx.commit().context("Failed to commit staged output")?;
        journal.commit();
        Ok(artifact)
    }

    /// Approve completion. With `promote`, staged artifacts move to permanent
    /// storage; otherwise they stay unpromoted and are discarded with the
    /// temp workspace.
    #[instrument(skip(self))]
    pub fn approve_complete(&self, execution_id: &str, promote: bool) -> Result<CompletionOutcome> {
        let tx = self.store().begin_immediate()?;
        let mut journal = FsJournal::new();
        let loaded = load_for_mutation(&tx, execution_id, ExecutionStatus::WaitingApprovalToComplete)?;
        let outcome = complete_execution(
            &tx,
            self.files(),
            self.limits(),
            loaded,
            promote,
            InteractionType::ApprovalToComplete,
            Some(&json!({"approved": true, "promote": promote})),
            &mut journal,
        )?;
        tx.commit().context("Failed to commit completion")?;
        journal.commit();
        info!(
            execution_id,
            promoted = outcome.promoted.len(),
            run_completed = outcome.run_completed,
            "Completion approved"
        );
        Ok(outcome)
    }

    /// Send an execution back to `in_progress` for another revision.
    ///
    /// Once the revision limit is reached the execution and its run fail, the
    /// failure is committed and `RevisionLimitExceeded` is returned.
    #[instrument(skip(self, feedback))]
    pub fn request_revision(&self, execution_id: &str, feedback: &str) -> Result<CheckpointExecution> {
        let tx = self.store().begin_immediate()?;
        let Loaded {
            mut execution,
            mut run,
            checkpoint,
        } = load_for_mutation(&tx, execution_id, ExecutionStatus::WaitingApprovalToComplete)?;
        let input = json!({"feedback": feedback});

        if execution.revision_iteration >= execution.max_revision_iterations {
            let now = Utc::now();
            execution.status = ExecutionStatus::Failed;
            execution.failed_at = Some(now);
            db::executions::update_execution(&tx, &execution)?;
            db::executions::insert_interaction(
                &tx,
                &execution.id,
                InteractionType::RevisionRequest,
                Some(&input),
                "Maximum revision iterations reached; checkpoint failed.",
            )?;
            run.status = RunStatus::Failed;
            run.failed_at = Some(now);
            db::runs::update_run(&tx, &run)?;
            NewEvent::new(
                EventType::CheckpointFailed,
                format!("Checkpoint '{}' exceeded its revision limit", checkpoint.name),
            )
            .pipeline(&run.pipeline_id)
            .run(&run.id)
            .execution(&execution.id)
            .checkpoint(&checkpoint.id)
            .metadata(json!({"max_revision_iterations": execution.max_revision_iterations}))
            .record(&tx)?;
            tx.commit().context("Failed to commit checkpoint failure")?;
            warn!(
                execution_id = %execution.id,
                max = execution.max_revision_iterations,
                "Revision limit exceeded, checkpoint failed"
            );
            return Err(PipelineError::RevisionLimitExceeded {
                id: execution.id,
                max: execution.max_revision_iterations,
            });
        }

        execution.revision_iteration += 1;
        execution.status = ExecutionStatus::InProgress;
        db::executions::update_execution(&tx, &execution)?;
        let response = format!(
            "Revision {} of {} requested.",
            execution.revision_iteration, execution.max_revision_iterations
        );
        db::executions::insert_interaction(
            &tx,
            &execution.id,
            InteractionType::RevisionRequest,
            Some(&input),
            &response,
        )?;
        NewEvent::new(
            EventType::RevisionRequested,
            format!("Revision requested for '{}'", checkpoint.name),
        )
        .pipeline(&run.pipeline_id)
        .run(&run.id)
        .execution(&execution.id)
        .checkpoint(&checkpoint.id)
        .metadata(json!({"revision_iteration": execution.revision_iteration}))
        .record(&tx)?;
        tx.commit().context("Failed to commit revision request")?;
        info!(execution_id = %execution.id, iteration = execution.revision_iteration, "Revision requested");
        Ok(execution)
    }

    pub fn get_execution(&self, execution_id: &str) -> Result<CheckpointExecution> {
        db::executions::get_execution(self.store().conn(), execution_id)?
            .ok_or_else(|| PipelineError::not_found("Execution", execution_id))
    }

    /// Execution with its interactions, its artifacts, and the promoted
    /// artifacts of the most recent earlier run at the same position. Small
    /// previous artifacts carry their content inline.
    pub fn get_execution_detail(&self, execution_id: &str) -> Result<ExecutionDetail> {
        let conn = self.store().conn();
        let execution = self.get_execution(execution_id)?;
        let checkpoint = self.get_checkpoint(&execution.checkpoint_id)?;
        let run = db::runs::get_run(conn, &execution.run_id)?
            .ok_or_else(|| PipelineError::not_found("Run", &execution.run_id))?;
        let interactions = db::executions::list_interactions(conn, &execution.id)?;
        let artifacts = db::artifacts::list_artifacts(conn, &execution.id)?
            .into_iter()
            .map(artifacts::view)
            .collect();

        let inline_max = self.limits().inline_previous_max_bytes;
        let mut previous_version_artifacts = Vec::new();
        for (run_version, artifact) in db::artifacts::previous_promoted_at_position(
            conn,
            &run.pipeline_id,
            run.run_version,
            execution.checkpoint_position,
        )? {
            let file_exists = artifact.file_path.is_file();
            let inline_content = if file_exists && artifact.size_bytes <= inline_max {
                match artifacts::read_text_prefix(&artifact.file_path, inline_max) {
                    Ok((text, false)) => Some(text),
                    Ok((_, true)) => None,
                    Err(e) => {
                        warn!(artifact_id = %artifact.artifact_id, error = %e, "Failed to inline previous artifact");
                        None
                    }
                }
            } else {
                None
            };
            previous_version_artifacts.push(PreviousArtifact {
                run_version,
                artifact,
                file_exists,
                inline_content,
            });
        }

        Ok(ExecutionDetail {
            execution,
            checkpoint_name: checkpoint.name,
            interactions,
            artifacts,
            previous_version_artifacts,
        })
    }
}

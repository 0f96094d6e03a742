//! Rollback and archive behaviour across runs.

mod common;

use anyhow::Result;

use common::{Harness, checkpoint, finish, pipeline, policy};
use stagegate::models::{
    ArchivedItemType, ExecutionStatus, PipelineDefinition, RollbackOutcome, RollbackType, Run,
    RunStatus,
};
use stagegate::rollback::MANIFEST_FILE;
use stagegate::{PipelineContext, PipelineError, RollbackRequest};

fn three_step(h: &Harness) -> Result<PipelineDefinition> {
    pipeline(
        &h.ctx,
        true,
        vec![
            checkpoint("Gather", policy(false, true, None)),
            checkpoint("Draft", policy(false, true, None)),
            checkpoint("Publish", policy(false, true, None)),
        ],
    )
}

/// Create and drive a run through every checkpoint.
fn complete_run(ctx: &PipelineContext, pipeline_id: &str, label: &str) -> Result<Run> {
    let run = ctx.create_run(pipeline_id, None)?;
    let (_, mut execution) = ctx.start_run(&run.id)?;
    while let Some(next) = finish(ctx, &execution, label)? {
        execution = next;
    }
    Ok(ctx.get_run(&run.id)?)
}

#[test]
fn scenario_b_checkpoint_rollback_archives_later_executions() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let run = complete_run(&h.ctx, &p.id, "v1")?;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.current_checkpoint_position, Some(2));

    let before = h.ctx.get_run_detail(&run.id)?;
    let removed: Vec<String> = before.executions[1..].iter().map(|e| e.id.clone()).collect();

    let outcome = h.ctx.checkpoint_level_rollback(
        &run.id,
        0,
        RollbackRequest::user(Some("redo the draft".to_string())),
    )?;
    let detail = match outcome {
        RollbackOutcome::RolledBack(detail) => detail,
        RollbackOutcome::NoOp { .. } => panic!("expected a rollback"),
    };
    assert_eq!(detail.event.rollback_type, RollbackType::CheckpointLevel);
    assert_eq!(detail.event.user_reason.as_deref(), Some("redo the draft"));
    let mut deleted = detail.event.manifest.deleted_checkpoint_executions.clone();
    deleted.sort();
    let mut expected = removed.clone();
    expected.sort();
    assert_eq!(deleted, expected);
    assert_eq!(detail.event.manifest.archived_artifacts.len(), 2);
    assert!(detail.event.manifest.missing_artifacts.is_empty());

    let after = h.ctx.get_run_detail(&run.id)?;
    assert_eq!(after.run.status, RunStatus::InProgress);
    assert_eq!(after.run.current_checkpoint_position, Some(0));
    assert!(after.run.completed_at.is_none());
    assert_eq!(after.executions.len(), 1);
    assert_eq!(after.executions[0].status, ExecutionStatus::Completed);
    for id in &removed {
        assert!(matches!(
            h.ctx.get_execution(id),
            Err(PipelineError::NotFound { .. })
        ));
    }
    for execution in &before.executions[1..] {
        assert!(!execution.permanent_output_path.exists());
    }

    let manifest = detail.event.archive_location.join("archived_data").join(MANIFEST_FILE);
    assert!(manifest.is_file());
    Ok(())
}

#[test]
fn archived_items_match_their_files() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let run = complete_run(&h.ctx, &p.id, "archived content")?;

    let outcome = h.ctx.checkpoint_level_rollback(&run.id, 1, RollbackRequest::default())?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };
    let fetched = h.ctx.get_rollback_event(&detail.event.id)?;
    assert_eq!(fetched.archived_items.len(), detail.archived_items.len());
    assert_eq!(fetched.event.manifest, detail.event.manifest);

    let kinds: Vec<ArchivedItemType> =
        fetched.archived_items.iter().map(|i| i.item_type).collect();
    assert!(kinds.contains(&ArchivedItemType::Artifact));
    assert!(kinds.contains(&ArchivedItemType::CheckpointExecution));
    for item in &fetched.archived_items {
        assert!(item.archived_path.starts_with(&fetched.event.archive_location));
        let meta = std::fs::metadata(&item.archived_path)?;
        assert_eq!(meta.len(), item.size_bytes);
        if item.item_type == ArchivedItemType::Artifact {
            let text = std::fs::read_to_string(&item.archived_path)?;
            assert!(text.contains("archived content"));
            assert!(!item.original_path.exists());
        }
    }
    Ok(())
}

#[test]
fn rollback_to_current_position_changes_nothing() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let run = h.ctx.create_run(&p.id, None)?;
    let (_, first) = h.ctx.start_run(&run.id)?;
    let second = finish(&h.ctx, &first, "one")?.expect("successor");
    assert_eq!(second.checkpoint_position, 1);

    let points_before = h.ctx.get_available_rollback_points(&run.id)?;
    let outcome = h.ctx.checkpoint_level_rollback(&run.id, 1, RollbackRequest::default())?;
    assert!(outcome.is_noop());
    let points_after = h.ctx.get_available_rollback_points(&run.id)?;
    assert_eq!(points_before, points_after);
    assert!(h.ctx.get_rollback_history(&p.id, None, 10)?.is_empty());

    let err = h
        .ctx
        .checkpoint_level_rollback(&run.id, 2, RollbackRequest::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    Ok(())
}

#[test]
fn rolled_back_run_resumes_from_target() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let run = complete_run(&h.ctx, &p.id, "first pass")?;
    h.ctx.checkpoint_level_rollback(&run.id, 0, RollbackRequest::default())?;

    let resumed = h.ctx.resume_run(&run.id)?;
    assert_eq!(resumed.run.current_checkpoint_position, Some(1));
    let next = resumed
        .executions
        .iter()
        .find(|e| e.checkpoint_position == 1)
        .expect("re-created execution");
    assert_eq!(next.status, ExecutionStatus::InProgress);
    let last = finish(&h.ctx, next, "second pass")?.expect("final execution");
    assert!(finish(&h.ctx, &last, "second pass")?.is_none());
    assert_eq!(h.ctx.get_run(&run.id)?.status, RunStatus::Completed);
    Ok(())
}

#[test]
fn run_level_rollback_archives_newer_runs() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let v1 = complete_run(&h.ctx, &p.id, "v1")?;
    let v2 = complete_run(&h.ctx, &p.id, "v2")?;
    let v3 = h.ctx.create_run(&p.id, None)?;
    let (_, v3_first) = h.ctx.start_run(&v3.id)?;
    finish(&h.ctx, &v3_first, "v3")?;
    assert_eq!(h.ctx.files().read_latest_pointer(&p.id)?, Some(3));

    let outcome = h.ctx.run_level_rollback(
        &v3.id,
        &v1.id,
        1,
        RollbackRequest::user(Some("back to v1".to_string())),
    )?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(detail.event.rollback_type, RollbackType::RunLevel);
    assert_eq!(detail.event.source_run_version, 3);
    assert_eq!(detail.event.target_run_version, 1);
    assert_eq!(detail.event.manifest.deleted_runs, vec![v3.id.clone(), v2.id.clone()]);

    for gone in [&v2.id, &v3.id] {
        assert!(matches!(h.ctx.get_run(gone), Err(PipelineError::NotFound { .. })));
    }
    let runs = h.ctx.list_runs(&p.id)?;
    assert_eq!(runs.len(), 1);
    let target = h.ctx.get_run_detail(&v1.id)?;
    assert_eq!(target.run.status, RunStatus::InProgress);
    assert_eq!(target.run.current_checkpoint_position, Some(1));
    assert_eq!(target.executions.len(), 2);

    assert_eq!(h.ctx.files().read_latest_pointer(&p.id)?, Some(1));
    assert!(!h.ctx.files().run_dir(&p.id, 2).exists());
    assert!(!h.ctx.files().run_dir(&p.id, 3).exists());
    let data = detail.event.archive_location.join("archived_data");
    assert!(data.join("v2").join("run_record.json").is_file());
    assert!(data.join("v3").join("run_record.json").is_file());

    // The next run continues the lineage from the target.
    let v4 = h.ctx.create_run(&p.id, None)?;
    assert_eq!(v4.run_version, 2);
    assert_eq!(v4.previous_run_id.as_deref(), Some(v1.id.as_str()));
    Ok(())
}

#[test]
fn run_level_rollback_rejects_mismatched_runs() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let other = three_step(&h)?;
    let v1 = complete_run(&h.ctx, &p.id, "v1")?;
    let v2 = complete_run(&h.ctx, &p.id, "v2")?;
    let foreign = complete_run(&h.ctx, &other.id, "x")?;

    let err = h
        .ctx
        .run_level_rollback(&v2.id, &foreign.id, 0, RollbackRequest::default())
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
    assert_eq!(h.ctx.list_runs(&p.id)?.len(), 2);
    assert_eq!(h.ctx.get_run(&v1.id)?.status, RunStatus::Completed);
    assert_eq!(h.ctx.get_run(&v2.id)?.status, RunStatus::Completed);
    Ok(())
}

#[test]
fn run_level_rollback_from_an_older_run() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let v1 = complete_run(&h.ctx, &p.id, "v1")?;
    let v2 = complete_run(&h.ctx, &p.id, "v2")?;
    let v3 = complete_run(&h.ctx, &p.id, "v3")?;

    let outcome = h.ctx.run_level_rollback(&v1.id, &v2.id, 0, RollbackRequest::default())?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(detail.event.source_run_id, v1.id);
    assert_eq!(detail.event.source_run_version, 1);
    assert_eq!(detail.event.target_run_version, 2);
    assert_eq!(detail.event.manifest.deleted_runs, vec![v3.id.clone()]);
    // v3's three executions plus v2's two beyond position 0.
    assert_eq!(detail.event.manifest.deleted_checkpoint_executions.len(), 5);

    assert!(matches!(h.ctx.get_run(&v3.id), Err(PipelineError::NotFound { .. })));
    let target = h.ctx.get_run_detail(&v2.id)?;
    assert_eq!(target.run.status, RunStatus::InProgress);
    assert_eq!(target.run.current_checkpoint_position, Some(0));
    assert_eq!(target.executions.len(), 1);
    assert_eq!(h.ctx.get_run(&v1.id)?.status, RunStatus::Completed);
    assert_eq!(h.ctx.files().read_latest_pointer(&p.id)?, Some(2));
    Ok(())
}

/// A run that failed at its second checkpoint.
fn failed_at_second(h: &Harness) -> Result<(PipelineDefinition, Run)> {
    let p = pipeline(
        &h.ctx,
        true,
        vec![
            checkpoint("Gather", policy(false, true, None)),
            checkpoint("Draft", policy(false, true, Some(0))),
        ],
    )?;
    let run = h.ctx.create_run(&p.id, None)?;
    let (_, first) = h.ctx.start_run(&run.id)?;
    let second = finish(&h.ctx, &first, "gathered")?.expect("successor");
    h.ctx.submit_form_data(&second.id, serde_json::json!({"notes": "draft"}))?;
    let err = h.ctx.request_revision(&second.id, "not good").unwrap_err();
    assert!(matches!(err, PipelineError::RevisionLimitExceeded { .. }));
    assert_eq!(h.ctx.get_run(&run.id)?.status, RunStatus::Failed);
    Ok((p, h.ctx.get_run(&run.id)?))
}

#[test]
fn run_level_rollback_redoes_a_failed_checkpoint() -> Result<()> {
    let h = Harness::new()?;
    let (p, v1) = failed_at_second(&h)?;
    let failed = h.ctx.get_run_detail(&v1.id)?.executions[1].clone();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    let v2 = h.ctx.create_run(&p.id, None)?;
    h.ctx.start_run(&v2.id)?;

    let outcome = h.ctx.run_level_rollback(&v2.id, &v1.id, 1, RollbackRequest::default())?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };
    assert!(
        detail
            .event
            .manifest
            .deleted_checkpoint_executions
            .contains(&failed.id)
    );
    assert!(matches!(
        h.ctx.get_execution(&failed.id),
        Err(PipelineError::NotFound { .. })
    ));
    let after = h.ctx.get_run_detail(&v1.id)?;
    assert_eq!(after.run.status, RunStatus::InProgress);
    assert!(after.run.failed_at.is_none());
    assert_eq!(after.executions.len(), 1);

    let resumed = h.ctx.resume_run(&v1.id)?;
    let statuses: Vec<ExecutionStatus> = resumed.executions.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![ExecutionStatus::Completed, ExecutionStatus::InProgress]
    );
    let redo = &resumed.executions[1];
    assert_eq!(redo.checkpoint_position, 1);
    assert_eq!(redo.revision_iteration, 0);
    assert!(finish(&h.ctx, redo, "second draft")?.is_none());
    assert_eq!(h.ctx.get_run(&v1.id)?.status, RunStatus::Completed);
    Ok(())
}

#[test]
fn checkpoint_rollback_onto_a_failed_checkpoint_is_not_a_noop() -> Result<()> {
    let h = Harness::new()?;
    let (_, run) = failed_at_second(&h)?;
    assert_eq!(run.current_checkpoint_position, Some(1));

    let outcome = h.ctx.checkpoint_level_rollback(&run.id, 1, RollbackRequest::default())?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };
    assert_eq!(detail.event.manifest.deleted_checkpoint_executions.len(), 1);
    assert_eq!(h.ctx.get_run(&run.id)?.status, RunStatus::InProgress);

    let resumed = h.ctx.resume_run(&run.id)?;
    assert_eq!(resumed.executions.len(), 2);
    assert_eq!(resumed.executions[1].status, ExecutionStatus::InProgress);
    Ok(())
}

#[test]
fn history_is_filtered_and_limited() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let a = complete_run(&h.ctx, &p.id, "a")?;
    let b = complete_run(&h.ctx, &p.id, "b")?;

    h.ctx.checkpoint_level_rollback(&a.id, 1, RollbackRequest::default())?;
    h.ctx.checkpoint_level_rollback(&a.id, 0, RollbackRequest::default())?;
    h.ctx.checkpoint_level_rollback(&b.id, 0, RollbackRequest::default())?;

    let all = h.ctx.get_rollback_history(&p.id, None, 50)?;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert_eq!(all[0].source_run_id, b.id);

    let only_a = h.ctx.get_rollback_history(&p.id, Some(&a.id), 50)?;
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|e| e.source_run_id == a.id));
    assert_eq!(h.ctx.get_rollback_history(&p.id, None, 1)?.len(), 1);
    Ok(())
}

#[test]
fn rollback_survives_reopening_the_store() -> Result<()> {
    let h = Harness::new()?;
    let p = three_step(&h)?;
    let run = complete_run(&h.ctx, &p.id, "persisted")?;
    let outcome = h.ctx.checkpoint_level_rollback(&run.id, 0, RollbackRequest::default())?;
    let RollbackOutcome::RolledBack(detail) = outcome else {
        panic!("expected a rollback");
    };

    let reopened = h.reopen()?;
    let fetched = reopened.get_rollback_event(&detail.event.id)?;
    assert_eq!(fetched.event.target_checkpoint_position, 0);
    assert_eq!(fetched.archived_items.len(), detail.archived_items.len());
    assert_eq!(reopened.get_run(&run.id)?.current_checkpoint_position, Some(0));
    Ok(())
}

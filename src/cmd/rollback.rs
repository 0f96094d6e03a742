//! Rollback commands.

use anyhow::Result;
use console::style;
use dialoguer::Confirm;

use stagegate::context::ContextHandle;
use stagegate::models::{RollbackDetail, RollbackEvent, RollbackOutcome};
use stagegate::rollback::RollbackRequest;

use super::{Output, short_id};
use crate::RollbackCommands;

fn confirm(out: &Output, prompt: &str) -> bool {
    if out.yes {
        return true;
    }
    Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}

pub async fn cmd_rollback(ctx: &ContextHandle, command: RollbackCommands, out: &Output) -> Result<()> {
    match command {
        RollbackCommands::Checkpoint {
            run_id,
            position,
            reason,
        } => {
            let prompt = format!(
                "Archive and remove every execution of run {} after position {}?",
                short_id(&run_id),
                position
            );
            if !confirm(out, &prompt) {
                println!("Rollback cancelled");
                return Ok(());
            }
            let outcome = ctx
                .call(move |c| {
                    c.checkpoint_level_rollback(&run_id, position, RollbackRequest::user(reason))
                })
                .await?;
            out.emit(&outcome, print_outcome)?;
        }
        RollbackCommands::Run {
            current_run_id,
            target_run_id,
            position,
            reason,
        } => {
            let prompt = format!(
                "Archive and remove every run newer than {} and return to position {}?",
                short_id(&target_run_id),
                position
            );
            if !confirm(out, &prompt) {
                println!("Rollback cancelled");
                return Ok(());
            }
            let outcome = ctx
                .call(move |c| {
                    c.run_level_rollback(
                        &current_run_id,
                        &target_run_id,
                        position,
                        RollbackRequest::user(reason),
                    )
                })
                .await?;
            out.emit(&outcome, print_outcome)?;
        }
        RollbackCommands::Points { run_id } => {
            let points = ctx
                .call(move |c| c.get_available_rollback_points(&run_id))
                .await?;
            out.emit(&points, |points| {
                if points.is_empty() {
                    println!("No completed checkpoints to roll back to.");
                    return;
                }
                println!();
                for point in points {
                    let marker = if point.is_current { "*" } else { " " };
                    println!(
                        " {} {:>2}. {} {}",
                        marker,
                        point.position,
                        style(&point.checkpoint_name).bold(),
                        style(&point.execution_id).dim()
                    );
                }
                println!();
            })?;
        }
        RollbackCommands::History {
            pipeline_id,
            run,
            limit,
        } => {
            let events = ctx
                .call(move |c| c.get_rollback_history(&pipeline_id, run.as_deref(), limit))
                .await?;
            out.emit(&events, |events| {
                if events.is_empty() {
                    println!("No rollbacks recorded.");
                    return;
                }
                println!();
                for event in events {
                    print_event_line(event);
                }
                println!();
            })?;
        }
        RollbackCommands::Show { rollback_id } => {
            let detail = ctx.call(move |c| c.get_rollback_event(&rollback_id)).await?;
            out.emit(&detail, print_detail)?;
        }
        RollbackCommands::Events { pipeline_id, limit } => {
            let events = ctx.call(move |c| c.list_events(&pipeline_id, limit)).await?;
            out.emit(&events, |events| {
                println!();
                for event in events {
                    println!(
                        "  {} {:<22} {}",
                        style(event.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
                        event.event_type,
                        event.description
                    );
                }
                println!();
            })?;
        }
    }
    Ok(())
}

fn print_event_line(event: &RollbackEvent) {
    println!(
        "  {} {} {:<16} v{} -> v{} @ {}  {}",
        style(event.created_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        short_id(&event.id),
        event.rollback_type.as_str(),
        event.source_run_version,
        event.target_run_version,
        event.target_checkpoint_position,
        event.user_reason.as_deref().unwrap_or("")
    );
}

fn print_outcome(outcome: &RollbackOutcome) {
    match outcome {
        RollbackOutcome::NoOp { position, .. } => {
            println!(
                "{} nothing after position {} to roll back",
                style("No-op:").yellow().bold(),
                position
            );
        }
        RollbackOutcome::RolledBack(detail) => {
            println!("{} {}", style("Rolled back").green().bold(), detail.event.id);
            print_detail(detail);
        }
    }
}

fn print_detail(detail: &RollbackDetail) {
    let event = &detail.event;
    let manifest = &event.manifest;
    println!();
    print_event_line(event);
    println!("  trigger:  {}", event.trigger.as_str());
    println!("  archive:  {}", event.archive_location.display());
    println!(
        "  removed:  {} run(s), {} execution(s), {} artifact(s)",
        manifest.deleted_runs.len(),
        manifest.deleted_checkpoint_executions.len(),
        manifest.archived_artifacts.len()
    );
    if !manifest.missing_artifacts.is_empty() {
        println!(
            "  {} {} artifact file(s) were already missing",
            style("note:").yellow(),
            manifest.missing_artifacts.len()
        );
    }
    for item in &detail.archived_items {
        println!(
            "    {:<22} {} ({} bytes)",
            item.item_type.as_str(),
            item.archived_path.display(),
            item.size_bytes
        );
    }
    println!();
}

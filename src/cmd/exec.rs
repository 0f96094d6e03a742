//! Checkpoint execution commands.

use anyhow::{Context, Result};
use console::style;
use serde_json::Value;

use stagegate::context::ContextHandle;
use stagegate::models::{CompletionOutcome, ExecutionDetail};

use super::Output;
use super::run::print_executions;
use crate::ExecCommands;

pub async fn cmd_exec(ctx: &ContextHandle, command: ExecCommands, out: &Output) -> Result<()> {
    match command {
        ExecCommands::Show { execution_id } => {
            let detail = ctx.call(move |c| c.get_execution_detail(&execution_id)).await?;
            out.emit(&detail, print_detail)?;
        }
        ExecCommands::ApproveStart { execution_id } => {
            let execution = ctx.call(move |c| c.approve_start(&execution_id)).await?;
            out.emit(&execution, |e| {
                println!("{} execution {}", style("Started").green().bold(), e.id);
            })?;
        }
        ExecCommands::Submit { execution_id, data } => {
            let data: Value =
                serde_json::from_str(&data).context("--data must be a JSON object")?;
            let outcome = ctx
                .call(move |c| c.submit_form_data(&execution_id, data))
                .await?;
            out.emit(&outcome, |outcome| {
                println!(
                    "{} form; execution is {}",
                    style("Submitted").green().bold(),
                    outcome.execution.status
                );
                if let Some(artifact) = &outcome.artifact {
                    println!("  staged artifact {} ({})", artifact.name, artifact.artifact_id);
                }
                if let Some(completion) = &outcome.completion {
                    print_completion(completion);
                }
            })?;
        }
        ExecCommands::Stage {
            execution_id,
            name,
            file,
        } => {
            let artifact = ctx
                .call(move |c| c.stage_output(&execution_id, &name, &file))
                .await?;
            out.emit(&artifact, |a| {
                println!(
                    "{} {} ({} bytes, sha256 {})",
                    style("Staged").green().bold(),
                    a.name,
                    a.size_bytes,
                    &a.checksum[..a.checksum.len().min(12)]
                );
            })?;
        }
        ExecCommands::Approve {
            execution_id,
            no_promote,
        } => {
            let outcome = ctx
                .call(move |c| c.approve_complete(&execution_id, !no_promote))
                .await?;
            out.emit(&outcome, print_completion)?;
        }
        ExecCommands::Revise {
            execution_id,
            feedback,
        } => {
            let execution = ctx
                .call(move |c| c.request_revision(&execution_id, &feedback))
                .await?;
            out.emit(&execution, |e| {
                println!(
                    "{} revision {} of {}",
                    style("Requested").yellow().bold(),
                    e.revision_iteration,
                    e.max_revision_iterations
                );
            })?;
        }
        ExecCommands::Preview { artifact_id } => {
            let preview = ctx.call(move |c| c.get_artifact_preview(&artifact_id)).await?;
            out.emit(&preview, |p| {
                println!(
                    "{} ({}, {} bytes)",
                    style(&p.name).bold(),
                    p.format,
                    p.size_bytes
                );
                match &p.content {
                    Some(content) => {
                        println!();
                        println!("{}", content);
                        if p.truncated {
                            println!("{}", style("[preview truncated]").dim());
                        }
                    }
                    None => println!("{}", style("file not found on disk").red()),
                }
            })?;
        }
    }
    Ok(())
}

fn print_completion(outcome: &CompletionOutcome) {
    println!(
        "{} checkpoint at position {}",
        style("Completed").green().bold(),
        outcome.execution.checkpoint_position
    );
    for artifact in &outcome.promoted {
        println!("  promoted {} -> {}", artifact.name, artifact.file_path.display());
    }
    for missing in &outcome.missing {
        println!(
            "  {} {}: {}",
            style("missing").yellow(),
            missing.name,
            missing.reason
        );
    }
    if let Some(next) = &outcome.next_execution {
        println!(
            "  next: position {} ({}) {}",
            next.checkpoint_position, next.status, next.id
        );
    }
    if outcome.run_completed {
        println!("  {}", style("Run completed").green());
    }
}

fn print_detail(detail: &ExecutionDetail) {
    println!();
    println!(
        "{} {}",
        style(&detail.checkpoint_name).bold().cyan(),
        style(format!("position {}", detail.execution.checkpoint_position)).dim()
    );
    print_executions(std::slice::from_ref(&detail.execution));
    println!("  workspace: {}", detail.execution.temp_workspace_path.display());
    println!("  outputs:   {}", detail.execution.permanent_output_path.display());

    if !detail.interactions.is_empty() {
        println!();
        println!("  Interactions:");
        for interaction in &detail.interactions {
            println!(
                "    {} {}: {}",
                interaction.created_at.format("%H:%M:%S"),
                interaction.interaction_type.as_str(),
                interaction.system_response
            );
        }
    }
    if !detail.artifacts.is_empty() {
        println!();
        println!("  Artifacts:");
        for view in &detail.artifacts {
            let state = if view.artifact.is_promoted() {
                style("promoted").green()
            } else {
                style("staged").yellow()
            };
            let presence = if view.file_exists { "" } else { " (file missing)" };
            println!(
                "    {} {} [{}]{}",
                view.artifact.name, state, view.artifact.id, presence
            );
        }
    }
    if !detail.previous_version_artifacts.is_empty() {
        println!();
        println!("  Previous version:");
        for previous in &detail.previous_version_artifacts {
            println!(
                "    v{} {} ({} bytes)",
                previous.run_version, previous.artifact.name, previous.artifact.size_bytes
            );
            if let Some(content) = &previous.inline_content {
                for line in content.lines().take(20) {
                    println!("      {}", style(line).dim());
                }
            }
        }
    }
    println!();
}

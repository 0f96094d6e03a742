//! Run lineage commands.

use anyhow::Result;
use console::style;

use stagegate::context::ContextHandle;
use stagegate::models::{CheckpointExecution, ExecutionStatus, Run, RunDetail, RunStatus};

use super::{Output, short_id};
use crate::RunCommands;

pub async fn cmd_run(ctx: &ContextHandle, command: RunCommands, out: &Output) -> Result<()> {
    match command {
        RunCommands::Create {
            pipeline_id,
            extends,
        } => {
            let run = ctx
                .call(move |c| c.create_run(&pipeline_id, extends.as_deref()))
                .await?;
            out.emit(&run, |run| {
                println!(
                    "{} run v{} ({})",
                    style("Created").green().bold(),
                    run.run_version,
                    run.id
                );
                if let Some(v) = run.extends_from_run_version {
                    println!("  extends v{}", v);
                }
            })?;
        }
        RunCommands::Start { run_id } => {
            let (run, execution) = ctx.call(move |c| c.start_run(&run_id)).await?;
            let detail = RunDetail {
                run,
                executions: vec![execution],
            };
            out.emit(&detail, |detail| {
                println!(
                    "{} run v{}",
                    style("Started").green().bold(),
                    detail.run.run_version
                );
                print_executions(&detail.executions);
            })?;
        }
        RunCommands::Pause { run_id } => {
            let run = ctx.call(move |c| c.pause_run(&run_id)).await?;
            out.emit(&run, |run| {
                println!("{} run v{}", style("Paused").yellow().bold(), run.run_version);
            })?;
        }
        RunCommands::Resume { run_id } => {
            let detail = ctx.call(move |c| c.resume_run(&run_id)).await?;
            out.emit(&detail, |detail| {
                println!(
                    "{} run v{} ({})",
                    style("Resumed").green().bold(),
                    detail.run.run_version,
                    status_label(detail.run.status)
                );
                print_executions(&detail.executions);
            })?;
        }
        RunCommands::Show { run_id } => {
            let detail = ctx.call(move |c| c.get_run_detail(&run_id)).await?;
            out.emit(&detail, |detail| {
                print_run(&detail.run);
                print_executions(&detail.executions);
            })?;
        }
        RunCommands::List { pipeline_id } => {
            let runs = ctx.call(move |c| c.list_runs(&pipeline_id)).await?;
            out.emit(&runs, |runs| {
                if runs.is_empty() {
                    println!("No runs yet.");
                    return;
                }
                println!();
                println!("{:<8} {:<10} {:<14} {:<10} Created", "Version", "Id", "Status", "Position");
                println!(
                    "{:<8} {:<10} {:<14} {:<10} -------",
                    "-------", "--------", "------------", "--------"
                );
                for run in runs {
                    let position = run
                        .current_checkpoint_position
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{:<8} {:<10} {:<14} {:<10} {}",
                        format!("v{}", run.run_version),
                        short_id(&run.id),
                        run.status.as_str(),
                        position,
                        run.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                println!();
            })?;
        }
    }
    Ok(())
}

fn status_label(status: RunStatus) -> console::StyledObject<&'static str> {
    let label = style(status.as_str());
    match status {
        RunStatus::Completed => label.green(),
        RunStatus::Failed => label.red(),
        RunStatus::Paused => label.yellow(),
        RunStatus::NotStarted | RunStatus::InProgress => label.cyan(),
    }
}

fn print_run(run: &Run) {
    println!();
    println!("{}", style(format!("Run v{}", run.run_version)).bold().cyan());
    println!("  id:       {}", run.id);
    println!("  pipeline: {}", run.pipeline_id);
    println!("  status:   {}", status_label(run.status));
    if let Some(position) = run.current_checkpoint_position {
        println!("  position: {} of {}", position, run.checkpoint_order.len());
    }
    if let Some(v) = run.extends_from_run_version {
        println!("  extends:  v{}", v);
    }
    println!("  created:  {}", run.created_at.to_rfc3339());
}

pub(crate) fn print_executions(executions: &[CheckpointExecution]) {
    println!();
    for execution in executions {
        let status = style(execution.status.as_str());
        let status = match execution.status {
            ExecutionStatus::Completed => status.green(),
            ExecutionStatus::Failed => status.red(),
            ExecutionStatus::WaitingApprovalToStart | ExecutionStatus::WaitingApprovalToComplete => {
                status.yellow()
            }
            ExecutionStatus::Pending | ExecutionStatus::InProgress => status.cyan(),
        };
        println!(
            "  {:>2}. {} {} (revision {}/{})",
            execution.checkpoint_position,
            execution.id,
            status,
            execution.revision_iteration,
            execution.max_revision_iterations
        );
    }
    println!();
}

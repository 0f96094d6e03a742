//! Pipeline definition commands.

use anyhow::Result;
use console::style;
use serde_json::json;

use stagegate::context::ContextHandle;
use stagegate::definitions::PipelineSpec;
use stagegate::models::{CheckpointDefinition, PipelineDefinition};

use super::{Output, short_id};
use crate::PipelineCommands;

pub async fn cmd_pipeline(ctx: &ContextHandle, command: PipelineCommands, out: &Output) -> Result<()> {
    match command {
        PipelineCommands::Import { file } => {
            let spec = PipelineSpec::load(&file)?;
            let (pipeline, checkpoints) = ctx.call(move |c| c.import_pipeline(spec)).await?;
            let result = json!({"pipeline": pipeline, "checkpoints": checkpoints});
            out.emit(&result, |_| {
                println!(
                    "{} pipeline {} ({})",
                    style("Imported").green().bold(),
                    style(&pipeline.name).bold(),
                    pipeline.id
                );
                print_checkpoints(&checkpoints);
            })?;
        }
        PipelineCommands::List => {
            let pipelines = ctx.call(|c| c.list_pipelines()).await?;
            out.emit(&pipelines, |pipelines| {
                if pipelines.is_empty() {
                    println!("No pipelines. Import one with `stagegate pipeline import <file>`.");
                    return;
                }
                println!();
                println!(
                    "{:<10} {:<30} {:<12} {:<8}",
                    "Id", "Name", "Checkpoints", "Version"
                );
                println!(
                    "{:<10} {:<30} {:<12} {:<8}",
                    "--------", "------------------------------", "-----------", "-------"
                );
                for p in pipelines {
                    println!(
                        "{:<10} {:<30} {:<12} {:<8}",
                        short_id(&p.id),
                        p.name,
                        p.checkpoint_order.len(),
                        p.definition_version
                    );
                }
                println!();
            })?;
        }
        PipelineCommands::Show { pipeline_id } => {
            let (pipeline, checkpoints) = ctx
                .call(move |c| {
                    let pipeline = c.get_pipeline(&pipeline_id)?;
                    let checkpoints = c.list_checkpoints(&pipeline_id)?;
                    Ok::<_, stagegate::errors::PipelineError>((pipeline, checkpoints))
                })
                .await?;
            let result = json!({"pipeline": pipeline, "checkpoints": checkpoints});
            out.emit(&result, |_| {
                print_pipeline(&pipeline);
                print_checkpoints(&checkpoints);
            })?;
        }
        PipelineCommands::Reorder {
            pipeline_id,
            checkpoint_ids,
        } => {
            let pipeline = ctx
                .call(move |c| c.reorder_checkpoints(&pipeline_id, checkpoint_ids))
                .await?;
            out.emit(&pipeline, |p| {
                println!(
                    "{} checkpoints; definition version is now {}",
                    style("Reordered").green().bold(),
                    p.definition_version
                );
            })?;
        }
    }
    Ok(())
}

fn print_pipeline(pipeline: &PipelineDefinition) {
    println!();
    println!("{}", style(&pipeline.name).bold().cyan());
    println!("  id:                 {}", pipeline.id);
    if !pipeline.description.is_empty() {
        println!("  description:        {}", pipeline.description);
    }
    println!("  auto_advance:       {}", pipeline.auto_advance);
    println!("  definition_version: {}", pipeline.definition_version);
}

fn print_checkpoints(checkpoints: &[CheckpointDefinition]) {
    println!();
    for (position, checkpoint) in checkpoints.iter().enumerate() {
        let mut gates = Vec::new();
        if checkpoint.policy.requires_approval_to_start {
            gates.push("start approval");
        }
        if checkpoint.policy.requires_approval_to_complete {
            gates.push("completion approval");
        }
        println!(
            "  {:>2}. {} {}",
            position,
            style(&checkpoint.name).bold(),
            style(format!("[{}]", checkpoint.id)).dim()
        );
        if !gates.is_empty() {
            println!("      gates: {}", gates.join(", "));
        }
        for output in &checkpoint.outputs {
            println!("      output: {} ({})", output.name, output.format);
        }
    }
    println!();
}

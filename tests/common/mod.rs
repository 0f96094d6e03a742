//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;

use stagegate::config::Config;
use stagegate::definitions::{
    CheckpointSpec, ExecutionMode, FieldType, FormArtifactConfig, HumanOnlyConfig, InputField,
    InteractionPolicy, OutputArtifact,
};
use stagegate::models::{ArtifactFormat, CheckpointExecution, PipelineDefinition};
use stagegate::PipelineContext;

/// A context over an on-disk store in a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub ctx: PipelineContext,
}

impl Harness {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let ctx = PipelineContext::open(&Config::for_base_path(dir.path().join("pipelines")))?;
        Ok(Self { dir, ctx })
    }

    pub fn config(&self) -> Config {
        Config::for_base_path(self.dir.path().join("pipelines"))
    }

    /// A second, independent connection to the same store.
    pub fn reopen(&self) -> Result<PipelineContext> {
        Ok(PipelineContext::open(&self.config())?)
    }
}

pub fn policy(start: bool, complete: bool, max_revisions: Option<u32>) -> InteractionPolicy {
    InteractionPolicy {
        requires_approval_to_start: start,
        requires_approval_to_complete: complete,
        max_revision_iterations: max_revisions,
    }
}

/// A form checkpoint with one required `notes` field whose submission is
/// saved as the declared `form_data` artifact.
pub fn checkpoint(name: &str, policy: InteractionPolicy) -> CheckpointSpec {
    CheckpointSpec {
        name: name.to_string(),
        description: format!("{} step", name),
        execution: ExecutionMode::HumanOnly(HumanOnlyConfig {
            instructions: format!("Complete the {} step", name),
            input_fields: vec![InputField {
                name: "notes".to_string(),
                field_type: FieldType::MultilineText,
                label: Some("Notes".to_string()),
                required: true,
                default: None,
                validation: None,
            }],
            save_form_as_artifact: Some(FormArtifactConfig::default()),
        }),
        policy,
        outputs: vec![OutputArtifact {
            name: "form_data".to_string(),
            format: ArtifactFormat::Json,
            description: None,
        }],
    }
}

pub fn pipeline(
    ctx: &PipelineContext,
    auto_advance: bool,
    checkpoints: Vec<CheckpointSpec>,
) -> Result<PipelineDefinition> {
    let pipeline = ctx.create_pipeline("Release review", "", auto_advance)?;
    for spec in checkpoints {
        ctx.add_checkpoint(&pipeline.id, spec)?;
    }
    Ok(ctx.get_pipeline(&pipeline.id)?)
}

/// Submit a form for `execution` and approve it if approval is required.
/// Returns the successor execution, if one was created.
pub fn finish(
    ctx: &PipelineContext,
    execution: &CheckpointExecution,
    notes: &str,
) -> Result<Option<CheckpointExecution>> {
    let submitted = ctx.submit_form_data(&execution.id, json!({ "notes": notes }))?;
    let completion = match submitted.completion {
        Some(completion) => completion,
        None => ctx.approve_complete(&execution.id, true)?,
    };
    Ok(completion.next_execution)
}

//! Pipeline and checkpoint definitions consumed by the core.
//!
//! Definition editing is deliberately thin: create, append a checkpoint,
//! reorder, import from TOML. Execution-mode configuration is a closed tagged
//! enum validated once, when a checkpoint is defined.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::Limits;
use crate::context::PipelineContext;
use crate::db;
use crate::errors::{PipelineError, Result};
use crate::events::{EventType, NewEvent};
use crate::models::{ArtifactFormat, ToDocument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub checkpoint_order: Vec<String>,
    pub auto_advance: bool,
    pub definition_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToDocument for PipelineDefinition {
    fn to_document(&self) -> Value {
        json!({
            "pipeline_id": self.id,
            "name": self.name,
            "description": self.description,
            "checkpoint_order": self.checkpoint_order,
            "auto_advance": self.auto_advance,
            "definition_version": self.definition_version,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDefinition {
    pub id: String,
    pub pipeline_id: String,
    pub name: String,
    pub description: String,
    pub execution: ExecutionMode,
    pub policy: InteractionPolicy,
    pub outputs: Vec<OutputArtifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointDefinition {
    pub fn human_only(&self) -> &HumanOnlyConfig {
        match &self.execution {
            ExecutionMode::HumanOnly(config) => config,
        }
    }

    pub fn output(&self, name: &str) -> Option<&OutputArtifact> {
        self.outputs.iter().find(|o| o.name == name)
    }
}

impl ToDocument for CheckpointDefinition {
    fn to_document(&self) -> Value {
        json!({
            "checkpoint_id": self.id,
            "pipeline_id": self.pipeline_id,
            "name": self.name,
            "description": self.description,
            "execution": self.execution,
            "policy": self.policy,
            "outputs": self.outputs,
            "created_at": self.created_at.to_rfc3339(),
            "updated_at": self.updated_at.to_rfc3339(),
        })
    }
}

/// How a checkpoint is executed. Only human-driven execution exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    HumanOnly(HumanOnlyConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HumanOnlyConfig {
    pub instructions: String,
    #[serde(default)]
    pub input_fields: Vec<InputField>,
    #[serde(default)]
    pub save_form_as_artifact: Option<FormArtifactConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormArtifactConfig {
    #[serde(default = "default_form_artifact_name")]
    pub artifact_name: String,
    #[serde(default = "default_form_format")]
    pub format: ArtifactFormat,
}

fn default_form_artifact_name() -> String {
    "form_data".to_string()
}

fn default_form_format() -> ArtifactFormat {
    ArtifactFormat::Json
}

impl Default for FormArtifactConfig {
    fn default() -> Self {
        Self {
            artifact_name: default_form_artifact_name(),
            format: default_form_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    File,
    MultilineText,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    /// Regex the value's text form must match.
    #[serde(default)]
    pub validation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionPolicy {
    #[serde(default)]
    pub requires_approval_to_start: bool,
    #[serde(default = "default_true")]
    pub requires_approval_to_complete: bool,
    /// Falls back to the configured default when unset.
    #[serde(default)]
    pub max_revision_iterations: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for InteractionPolicy {
    fn default() -> Self {
        Self {
            requires_approval_to_start: false,
            requires_approval_to_complete: true,
            max_revision_iterations: None,
        }
    }
}

impl InteractionPolicy {
    pub fn revision_limit(&self, limits: &Limits) -> u32 {
        self.max_revision_iterations
            .unwrap_or(limits.default_max_revision_iterations)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputArtifact {
    pub name: String,
    pub format: ArtifactFormat,
    #[serde(default)]
    pub description: Option<String>,
}

// ── Input specs (TOML import / creation) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub execution: ExecutionMode,
    #[serde(default)]
    pub policy: InteractionPolicy,
    #[serde(default)]
    pub outputs: Vec<OutputArtifact>,
}

impl CheckpointSpec {
    /// Boundary validation of a checkpoint before it is stored.
    pub fn validate(&self, limits: &Limits) -> Result<()> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("checkpoint name must not be empty".to_string());
        }
        if let Some(max) = self.policy.max_revision_iterations
            && max > limits.max_revision_iterations_limit
        {
            problems.push(format!(
                "max_revision_iterations {} exceeds the limit of {}",
                max, limits.max_revision_iterations_limit
            ));
        }
        let ExecutionMode::HumanOnly(config) = &self.execution;
        let mut names = HashSet::new();
        for field in &config.input_fields {
            if !names.insert(field.name.as_str()) {
                problems.push(format!("duplicate input field '{}'", field.name));
            }
            if let Some(pattern) = &field.validation
                && let Err(e) = Regex::new(pattern)
            {
                problems.push(format!("field '{}' has invalid regex: {}", field.name, e));
            }
        }
        if let Some(form) = &config.save_form_as_artifact
            && !matches!(form.format, ArtifactFormat::Json | ArtifactFormat::Md)
        {
            problems.push(format!(
                "form artifact format must be json or md, got {}",
                form.format
            ));
        }
        let mut outputs = HashSet::new();
        for output in &self.outputs {
            if !outputs.insert(output.name.as_str()) {
                problems.push(format!("duplicate output artifact '{}'", output.name));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation(problems.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_advance: bool,
    #[serde(default)]
    pub checkpoints: Vec<CheckpointSpec>,
}

impl PipelineSpec {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse pipeline definition")
    }
}

// ── Form validation ──────────────────────────────────────────────────

impl HumanOnlyConfig {
    /// Check submitted form data against the input-field schema and return
    /// the data with defaults filled in for absent optional fields.
    pub fn validate_form(&self, data: &Value) -> Result<Value> {
        let Some(object) = data.as_object() else {
            return Err(PipelineError::Validation(
                "form data must be a JSON object".to_string(),
            ));
        };
        let mut filled: Map<String, Value> = object.clone();
        let mut problems = Vec::new();

        for field in &self.input_fields {
            let value = match object.get(&field.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &field.default {
                        filled.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        problems.push(format!("'{}' is required", field.name));
                    }
                    continue;
                }
                Some(v) => v,
            };

            let text = match (field.field_type, value) {
                (
                    FieldType::Text | FieldType::MultilineText | FieldType::File,
                    Value::String(s),
                ) => {
                    if field.required && s.trim().is_empty() {
                        problems.push(format!("'{}' is required", field.name));
                        continue;
                    }
                    s.clone()
                }
                (FieldType::Number, Value::Number(n)) => n.to_string(),
                (FieldType::Boolean, Value::Bool(b)) => b.to_string(),
                (expected, _) => {
                    problems.push(format!(
                        "'{}' must be of type {}",
                        field.name,
                        field_type_name(expected)
                    ));
                    continue;
                }
            };

            if let Some(pattern) = &field.validation {
                match Regex::new(pattern) {
                    Ok(re) if re.is_match(&text) => {}
                    Ok(_) => problems.push(format!(
                        "'{}' does not match pattern {}",
                        field.name, pattern
                    )),
                    Err(e) => problems.push(format!("'{}' has invalid regex: {}", field.name, e)),
                }
            }
        }

        if problems.is_empty() {
            Ok(Value::Object(filled))
        } else {
            Err(PipelineError::Validation(problems.join("; ")))
        }
    }
}

fn field_type_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "text",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::File => "file",
        FieldType::MultilineText => "multiline_text",
    }
}

// ── Operations ───────────────────────────────────────────────────────

impl PipelineContext {
    #[instrument(skip(self, description))]
    pub fn create_pipeline(
        &self,
        name: &str,
        description: &str,
        auto_advance: bool,
    ) -> Result<PipelineDefinition> {
        if name.trim().is_empty() {
            return Err(PipelineError::Validation(
                "pipeline name must not be empty".to_string(),
            ));
        }
        let now = Utc::now();
        let pipeline = PipelineDefinition {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            checkpoint_order: Vec::new(),
            auto_advance,
            definition_version: 1,
            created_at: now,
            updated_at: now,
        };
        db::definitions::insert_pipeline(self.store().conn(), &pipeline)?;
        info!(pipeline_id = %pipeline.id, "Created pipeline");
        Ok(pipeline)
    }

    /// Append a checkpoint to the end of a pipeline's order.
    #[instrument(skip(self, spec), fields(checkpoint = %spec.name))]
    pub fn add_checkpoint(
        &self,
        pipeline_id: &str,
        spec: CheckpointSpec,
    ) -> Result<CheckpointDefinition> {
        spec.validate(self.limits())?;
        let tx = self.store().begin_immediate()?;
        let mut pipeline = db::definitions::get_pipeline(&tx, pipeline_id)?
            .ok_or_else(|| PipelineError::not_found("Pipeline", pipeline_id))?;
        let now = Utc::now();
        let checkpoint = CheckpointDefinition {
            id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline.id.clone(),
            name: spec.name,
            description: spec.description,
            execution: spec.execution,
            policy: spec.policy,
            outputs: spec.outputs,
            created_at: now,
            updated_at: now,
        };
        db::definitions::insert_checkpoint(&tx, &checkpoint)?;
        pipeline.checkpoint_order.push(checkpoint.id.clone());
        pipeline.updated_at = now;
        db::definitions::update_checkpoint_order(&tx, &pipeline)?;
        tx.commit().context("Failed to commit checkpoint creation")?;
        info!(checkpoint_id = %checkpoint.id, position = pipeline.checkpoint_order.len() - 1, "Added checkpoint");
        Ok(checkpoint)
    }

    /// Create a pipeline and all of its checkpoints from a parsed spec.
    pub fn import_pipeline(
        &self,
        spec: PipelineSpec,
    ) -> Result<(PipelineDefinition, Vec<CheckpointDefinition>)> {
        for checkpoint in &spec.checkpoints {
            checkpoint.validate(self.limits())?;
        }
        let pipeline = self.create_pipeline(&spec.name, &spec.description, spec.auto_advance)?;
        let mut checkpoints = Vec::new();
        for checkpoint in spec.checkpoints {
            checkpoints.push(self.add_checkpoint(&pipeline.id, checkpoint)?);
        }
        let pipeline = self.get_pipeline(&pipeline.id)?;
        Ok((pipeline, checkpoints))
    }

    /// Replace the checkpoint order. `order` must contain exactly the
    /// pipeline's existing checkpoint ids. Runs already created keep the
    /// order they were created with.
    #[instrument(skip(self))]
    pub fn reorder_checkpoints(
        &self,
        pipeline_id: &str,
        order: Vec<String>,
    ) -> Result<PipelineDefinition> {
        let tx = self.store().begin_immediate()?;
        let mut pipeline = db::definitions::get_pipeline(&tx, pipeline_id)?
            .ok_or_else(|| PipelineError::not_found("Pipeline", pipeline_id))?;

        let current: HashSet<&String> = pipeline.checkpoint_order.iter().collect();
        let proposed: HashSet<&String> = order.iter().collect();
        if order.len() != pipeline.checkpoint_order.len() || current != proposed {
            return Err(PipelineError::Validation(
                "new order must contain exactly the pipeline's existing checkpoint ids".to_string(),
            ));
        }

        let previous = std::mem::replace(&mut pipeline.checkpoint_order, order);
        pipeline.definition_version += 1;
        pipeline.updated_at = Utc::now();
        db::definitions::update_checkpoint_order(&tx, &pipeline)?;
        NewEvent::new(EventType::CheckpointsReordered, "Checkpoint order changed")
            .pipeline(&pipeline.id)
            .metadata(json!({
                "previous_order": previous,
                "new_order": pipeline.checkpoint_order,
                "definition_version": pipeline.definition_version,
            }))
            .record(&tx)?;
        tx.commit().context("Failed to commit checkpoint reorder")?;
        info!(definition_version = pipeline.definition_version, "Reordered checkpoints");
        Ok(pipeline)
    }

    pub fn get_pipeline(&self, pipeline_id: &str) -> Result<PipelineDefinition> {
        db::definitions::get_pipeline(self.store().conn(), pipeline_id)?
            .ok_or_else(|| PipelineError::not_found("Pipeline", pipeline_id))
    }

    pub fn list_pipelines(&self) -> Result<Vec<PipelineDefinition>> {
        Ok(db::definitions::list_pipelines(self.store().conn())?)
    }

    pub fn get_checkpoint(&self, checkpoint_id: &str) -> Result<CheckpointDefinition> {
        db::definitions::get_checkpoint(self.store().conn(), checkpoint_id)?
            .ok_or_else(|| PipelineError::not_found("Checkpoint", checkpoint_id))
    }

    /// Checkpoints of a pipeline in its current order.
    pub fn list_checkpoints(&self, pipeline_id: &str) -> Result<Vec<CheckpointDefinition>> {
        let pipeline = self.get_pipeline(pipeline_id)?;
        let mut all = db::definitions::list_checkpoints(self.store().conn(), pipeline_id)?;
        let mut ordered = Vec::with_capacity(all.len());
        for id in &pipeline.checkpoint_order {
            if let Some(idx) = all.iter().position(|c| &c.id == id) {
                ordered.push(all.swap_remove(idx));
            }
        }
        Ok(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, field_type: FieldType, required: bool) -> InputField {
        InputField {
            name: name.to_string(),
            field_type,
            label: None,
            required,
            default: None,
            validation: None,
        }
    }

    fn spec(name: &str) -> CheckpointSpec {
        CheckpointSpec {
            name: name.to_string(),
            description: String::new(),
            execution: ExecutionMode::HumanOnly(HumanOnlyConfig {
                instructions: "Do the thing".to_string(),
                ..Default::default()
            }),
            policy: InteractionPolicy::default(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn test_execution_mode_is_tagged() -> anyhow::Result<()> {
        let mode: ExecutionMode = serde_json::from_value(json!({
            "mode": "human_only",
            "instructions": "Fill the form",
            "input_fields": [{"name": "title", "type": "text", "required": true}],
            "save_form_as_artifact": {}
        }))?;
        let ExecutionMode::HumanOnly(config) = mode;
        assert_eq!(config.input_fields[0].field_type, FieldType::Text);
        let form = config.save_form_as_artifact.expect("form config");
        assert_eq!(form.artifact_name, "form_data");
        assert_eq!(form.format, ArtifactFormat::Json);

        let unknown = serde_json::from_value::<ExecutionMode>(json!({"mode": "agentic"}));
        assert!(unknown.is_err());
        Ok(())
    }

    #[test]
    fn test_policy_defaults() {
        let policy: InteractionPolicy = serde_json::from_value(json!({})).unwrap();
        assert!(!policy.requires_approval_to_start);
        assert!(policy.requires_approval_to_complete);
        assert_eq!(policy.revision_limit(&Limits::default()), 3);
    }

    #[test]
    fn test_spec_validation_collects_problems() {
        let mut bad = spec("Review");
        bad.policy.max_revision_iterations = Some(10);
        let ExecutionMode::HumanOnly(config) = &mut bad.execution;
        config.input_fields = vec![
            field("a", FieldType::Text, false),
            field("a", FieldType::Number, false),
        ];
        config.input_fields[1].validation = Some("(".to_string());
        config.save_form_as_artifact = Some(FormArtifactConfig {
            artifact_name: "form".into(),
            format: ArtifactFormat::Csv,
        });
        match bad.validate(&Limits::default()) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("exceeds the limit"));
                assert!(msg.contains("duplicate input field 'a'"));
                assert!(msg.contains("invalid regex"));
                assert!(msg.contains("json or md"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }
        assert!(spec("ok").validate(&Limits::default()).is_ok());
    }

    #[test]
    fn test_validate_form_checks_types_and_patterns() {
        let mut email = field("email", FieldType::Text, true);
        email.validation = Some(r"^[^@]+@[^@]+$".to_string());
        let config = HumanOnlyConfig {
            instructions: String::new(),
            input_fields: vec![
                email,
                field("count", FieldType::Number, false),
                field("agree", FieldType::Boolean, true),
            ],
            save_form_as_artifact: None,
        };

        assert!(
            config
                .validate_form(&json!({"email": "a@b", "count": 3, "agree": true}))
                .is_ok()
        );

        match config.validate_form(&json!({"email": "nope", "count": "three"})) {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("'email' does not match"));
                assert!(msg.contains("'count' must be of type number"));
                assert!(msg.contains("'agree' is required"));
            }
            other => panic!("Expected Validation, got {:?}", other),
        }

        assert!(config.validate_form(&json!(["not", "object"])).is_err());
    }

    #[test]
    fn test_validate_form_fills_defaults() -> anyhow::Result<()> {
        let mut level = field("level", FieldType::Number, true);
        level.default = Some(json!(2));
        let config = HumanOnlyConfig {
            instructions: String::new(),
            input_fields: vec![level],
            save_form_as_artifact: None,
        };
        let filled = config.validate_form(&json!({}))?;
        assert_eq!(filled["level"], 2);
        Ok(())
    }

    #[test]
    fn test_pipeline_spec_parses_toml() -> anyhow::Result<()> {
        let spec = PipelineSpec::parse(
            r#"
            name = "Content review"
            auto_advance = true

            [[checkpoints]]
            name = "Draft"
            [checkpoints.execution]
            mode = "human_only"
            instructions = "Write the draft"
            [[checkpoints.execution.input_fields]]
            name = "title"
            type = "text"
            required = true
            [checkpoints.execution.save_form_as_artifact]
            format = "md"
            [checkpoints.policy]
            requires_approval_to_complete = false
            [[checkpoints.outputs]]
            name = "outline"
            format = "mmd"
            "#,
        )?;
        assert!(spec.auto_advance);
        assert_eq!(spec.checkpoints.len(), 1);
        let cp = &spec.checkpoints[0];
        assert!(!cp.policy.requires_approval_to_complete);
        assert_eq!(cp.outputs[0].format, ArtifactFormat::Mmd);
        let ExecutionMode::HumanOnly(config) = &cp.execution;
        assert_eq!(
            config.save_form_as_artifact.as_ref().map(|f| f.format),
            Some(ArtifactFormat::Md)
        );
        Ok(())
    }

    #[test]
    fn test_add_and_reorder_checkpoints() -> anyhow::Result<()> {
        let ctx = PipelineContext::in_memory(std::env::temp_dir())?;
        let pipeline = ctx.create_pipeline("p", "", false)?;
        let a = ctx.add_checkpoint(&pipeline.id, spec("A"))?;
        let b = ctx.add_checkpoint(&pipeline.id, spec("B"))?;

        let fetched = ctx.get_pipeline(&pipeline.id)?;
        assert_eq!(fetched.checkpoint_order, vec![a.id.clone(), b.id.clone()]);
        assert_eq!(fetched.definition_version, 1);

        let reordered = ctx.reorder_checkpoints(&pipeline.id, vec![b.id.clone(), a.id.clone()])?;
        assert_eq!(reordered.definition_version, 2);
        let names: Vec<String> = ctx
            .list_checkpoints(&pipeline.id)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["B", "A"]);

        let err = ctx
            .reorder_checkpoints(&pipeline.id, vec![a.id.clone(), a.id.clone()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let events = ctx.list_events(&pipeline.id, 10)?;
        assert_eq!(events[0].event_type, "checkpoints_reordered");
        Ok(())
    }

    #[test]
    fn test_unknown_pipeline_is_not_found() -> anyhow::Result<()> {
        let ctx = PipelineContext::in_memory(std::env::temp_dir())?;
        let err = ctx.add_checkpoint("missing", spec("A")).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { entity: "Pipeline", .. }));
        Ok(())
    }
}

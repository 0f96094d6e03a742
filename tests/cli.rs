//! End-to-end tests of the `stagegate` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

const PIPELINE_TOML: &str = r#"
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

[[checkpoints]]
name = "Review"
[checkpoints.execution]
mode = "human_only"
instructions = "Review the draft"
[[checkpoints.execution.input_fields]]
name = "verdict"
type = "text"
required = true
"#;

fn stagegate(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("stagegate");
    cmd.current_dir(dir.path());
    cmd
}

fn init_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    stagegate(&dir).arg("init").assert().success();
    dir
}

/// Run a command with `--json` and parse its output.
fn json(dir: &TempDir, args: &[&str]) -> Value {
    let output = stagegate(dir)
        .arg("--json")
        .args(args)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn import_pipeline(dir: &TempDir) -> String {
    let file = dir.path().join("pipeline.toml");
    fs::write(&file, PIPELINE_TOML).unwrap();
    let imported = json(dir, &["pipeline", "import", file.to_str().unwrap()]);
    imported["pipeline"]["id"].as_str().unwrap().to_string()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_and_version() {
        cargo_bin_cmd!("stagegate")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("rollback"));
        cargo_bin_cmd!("stagegate").arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_config_and_store() {
        let dir = TempDir::new().unwrap();
        stagegate(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized stagegate project"));
        assert!(dir.path().join("stagegate.toml").is_file());
        assert!(dir.path().join("pipelines/.pipeline_system/logs").is_dir());

        stagegate(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already initialized"));
    }

    #[test]
    fn test_config_show_and_validate() {
        let dir = init_project();
        stagegate(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Stagegate Configuration"))
            .stdout(predicate::str::contains("[storage]"));
        stagegate(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_base_path_override() {
        let dir = init_project();
        let elsewhere = dir.path().join("elsewhere");
        stagegate(&dir)
            .args(["--base-path", elsewhere.to_str().unwrap(), "pipeline", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No pipelines"));
        assert!(elsewhere.is_dir());
    }
}

mod workflow {
    use super::*;

    #[test]
    fn test_import_create_start_submit() {
        let dir = init_project();
        let pipeline_id = import_pipeline(&dir);

        stagegate(&dir)
            .args(["pipeline", "show", &pipeline_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Draft"))
            .stdout(predicate::str::contains("Review"));

        let run = json(&dir, &["run", "create", &pipeline_id]);
        assert_eq!(run["run_version"], 1);
        let run_id = run["id"].as_str().unwrap().to_string();

        let started = json(&dir, &["run", "start", &run_id]);
        assert_eq!(started["executions"][0]["status"], "in_progress");
        let execution_id = started["executions"][0]["id"].as_str().unwrap().to_string();

        let submitted = json(
            &dir,
            &["exec", "submit", &execution_id, "--data", r#"{"title": "Launch notes"}"#],
        );
        assert_eq!(submitted["execution"]["status"], "completed");
        let next = &submitted["completion"]["next_execution"];
        assert_eq!(next["checkpoint_position"], 1);

        stagegate(&dir)
            .args(["run", "show", &run_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("position: 1 of 2"));
        stagegate(&dir)
            .args(["rollback", "points", &run_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("Draft"));
    }

    #[test]
    fn test_invalid_form_is_a_client_error() {
        let dir = init_project();
        let pipeline_id = import_pipeline(&dir);
        let run = json(&dir, &["run", "create", &pipeline_id]);
        let started = json(&dir, &["run", "start", run["id"].as_str().unwrap()]);
        let execution_id = started["executions"][0]["id"].as_str().unwrap();

        stagegate(&dir)
            .args(["exec", "submit", execution_id, "--data", "{}"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("title"));
    }

    #[test]
    fn test_rollback_with_yes_skips_prompt() {
        let dir = init_project();
        let pipeline_id = import_pipeline(&dir);
        let run = json(&dir, &["run", "create", &pipeline_id]);
        let run_id = run["id"].as_str().unwrap().to_string();
        let started = json(&dir, &["run", "start", &run_id]);
        let execution_id = started["executions"][0]["id"].as_str().unwrap().to_string();
        json(
            &dir,
            &["exec", "submit", &execution_id, "--data", r#"{"title": "x"}"#],
        );

        stagegate(&dir)
            .args(["--yes", "rollback", "checkpoint", &run_id, "0", "--reason", "retry"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rolled back"));

        let history = json(&dir, &["rollback", "history", &pipeline_id]);
        let events = history.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["user_reason"], "retry");
        assert_eq!(events[0]["rollback_type"], "checkpoint_level");

        stagegate(&dir)
            .args(["rollback", "events", &pipeline_id])
            .assert()
            .success()
            .stdout(predicate::str::contains("rollback_initiated"));
    }
}

mod errors {
    use super::*;

    #[test]
    fn test_unknown_run_exits_with_client_error() {
        let dir = init_project();
        stagegate(&dir)
            .args(["run", "show", "no-such-run"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("Error:"))
            .stderr(predicate::str::contains("no-such-run"));
    }

    #[test]
    fn test_missing_pipeline_file_is_reported() {
        let dir = init_project();
        stagegate(&dir)
            .args(["pipeline", "import", "missing.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read pipeline file"));
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stagegate::config::Config;
use stagegate::context::{ContextHandle, PipelineContext};
use stagegate::errors::PipelineError;

mod cmd;

#[derive(Parser)]
#[command(name = "stagegate")]
#[command(
    version,
    about = "Human-gated checkpoint pipelines with versioned runs and archival rollback"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer yes to confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Root of the pipeline file store. Overrides stagegate.toml.
    #[arg(long, global = true)]
    pub base_path: Option<PathBuf>,

    /// Directory holding stagegate.toml (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create stagegate.toml and the storage layout
    Init,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage pipeline definitions
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Create and drive versioned runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Act on a checkpoint execution
    Exec {
        #[command(subcommand)]
        command: ExecCommands,
    },
    /// Roll back runs and inspect rollback history
    Rollback {
        #[command(subcommand)]
        command: RollbackCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum PipelineCommands {
    /// Import a pipeline and its checkpoints from a TOML file
    Import { file: PathBuf },
    List,
    Show { pipeline_id: String },
    /// Replace the checkpoint order. Existing runs keep their order.
    Reorder {
        pipeline_id: String,
        #[arg(required = true, num_args = 1..)]
        checkpoint_ids: Vec<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum RunCommands {
    /// Create the next run version of a pipeline
    Create {
        pipeline_id: String,
        /// Run to extend (defaults to the latest run)
        #[arg(long)]
        extends: Option<String>,
    },
    Start { run_id: String },
    Pause { run_id: String },
    Resume { run_id: String },
    Show { run_id: String },
    List { pipeline_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ExecCommands {
    Show {
        execution_id: String,
    },
    /// Approve an execution waiting to start
    ApproveStart {
        execution_id: String,
    },
    /// Submit form data (a JSON object)
    Submit {
        execution_id: String,
        #[arg(long)]
        data: String,
    },
    /// Stage a file for a declared output
    Stage {
        execution_id: String,
        name: String,
        file: PathBuf,
    },
    /// Approve completion
    Approve {
        execution_id: String,
        /// Complete without promoting staged artifacts
        #[arg(long)]
        no_promote: bool,
    },
    /// Request another revision
    Revise {
        execution_id: String,
        #[arg(long)]
        feedback: String,
    },
    /// Show the content of an artifact
    Preview {
        artifact_id: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum RollbackCommands {
    /// Undo the executions of a run after a position
    Checkpoint {
        run_id: String,
        position: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Return the pipeline to an earlier run
    Run {
        current_run_id: String,
        target_run_id: String,
        position: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List positions a run can be rolled back to
    Points { run_id: String },
    History {
        pipeline_id: String,
        #[arg(long)]
        run: Option<String>,
        #[arg(long, default_value_t = stagegate::rollback::DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },
    Show { rollback_id: String },
    /// Show the event ledger of a pipeline
    Events {
        pipeline_id: String,
        #[arg(long, default_value_t = stagegate::events::DEFAULT_EVENT_LIMIT)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", console::style("Error:").red().bold(), e);
        let code = match e.downcast_ref::<PipelineError>() {
            Some(err) if err.is_client_error() => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::load(&project_dir, cli.base_path.clone(), cli.verbose, cli.yes)?;
    let out = cmd::Output {
        json: cli.json,
        yes: cli.yes,
    };

    match &cli.command {
        Commands::Init => return cmd::cmd_init(&project_dir, &config),
        Commands::Config { command } => return cmd::cmd_config(&config, command.clone(), &out),
        _ => {}
    }

    let _guard = stagegate::logging::init(&config)?;
    let ctx = ContextHandle::new(PipelineContext::open(&config)?);
    match &cli.command {
        Commands::Pipeline { command } => cmd::cmd_pipeline(&ctx, command.clone(), &out).await?,
        Commands::Run { command } => cmd::cmd_run(&ctx, command.clone(), &out).await?,
        Commands::Exec { command } => cmd::cmd_exec(&ctx, command.clone(), &out).await?,
        Commands::Rollback { command } => cmd::cmd_rollback(&ctx, command.clone(), &out).await?,
        Commands::Init | Commands::Config { .. } => {}
    }
    Ok(())
}

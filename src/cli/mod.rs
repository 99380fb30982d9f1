//! Command-line interface for taskline.
//!
//! Provides commands for running processes, checking status, listing runs,
//! resuming interrupted runs, and validating process definitions.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::SubprocessAgent;
use crate::config;
use crate::core::{AutoApproveGate, CheckpointGate, ConsoleGate, ProcessSpec};

/// taskline - Journaled multi-agent process runner
#[derive(Parser, Debug)]
#[command(name = "taskline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a process
    Run {
        /// Process name (will look for <processes-dir>/<name>.yaml)
        process_name: String,

        /// JSON inputs file (object keyed by input name)
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Read JSON inputs from stdin
        #[arg(long)]
        stdin: bool,

        /// Auto-approve all checkpoints (unattended mode)
        #[arg(short, long)]
        yes: bool,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Resume an interrupted run
    Resume {
        /// Run ID to resume
        run_id: String,

        /// Process name the run was started from
        process_name: String,

        /// JSON inputs file (must match the original run's inputs)
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Auto-approve all checkpoints (unattended mode)
        #[arg(short, long)]
        yes: bool,
    },

    /// Validate a process definition without running it
    Validate {
        /// Process name or path to a .yaml file
        process_name: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                process_name,
                inputs,
                stdin,
                yes,
            } => run_process(&process_name, inputs, stdin, yes).await,
            Commands::Status { run_id } => show_status(&run_id).await,
            Commands::Runs { limit } => list_runs(limit).await,
            Commands::Resume {
                run_id,
                process_name,
                inputs,
                yes,
            } => resume_run(&run_id, &process_name, inputs, yes).await,
            Commands::Validate { process_name } => validate_process(&process_name).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Run a process with the given inputs
async fn run_process(
    process_name: &str,
    inputs_file: Option<PathBuf>,
    use_stdin: bool,
    yes: bool,
) -> Result<()> {
    let spec = load_process(process_name)?;
    let inputs = read_inputs(inputs_file, use_stdin)?;

    let runner = build_runner(yes)?;
    let result = runner.run(&spec, inputs).await?;

    let json = serde_json::to_string_pretty(&result)?;
    println!("{}", json);

    if result.success {
        eprintln!(
            "\n[Run {} completed in {}ms]",
            result.metadata.run_id, result.duration_ms
        );
        Ok(())
    } else {
        eprintln!(
            "\n[Run {} failed: {}]",
            result.metadata.run_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

/// Show the status of a run
async fn show_status(run_id_str: &str) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let runner = build_runner(true)?;
    let run = runner.get_run_status(run_id).await?;

    println!("Run ID: {}", run.id);
    println!("State: {:?}", run.state);
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Current step: {}", run.current_step);
    println!("Checkpoints reached: {}", run.checkpoints_reached);
    println!("\nStep statuses:");
    for (step, status) in &run.step_statuses {
        println!("  {}: {:?}", step, status);
    }

    Ok(())
}

/// List recent runs
async fn list_runs(limit: usize) -> Result<()> {
    let runner = build_runner(true)?;
    let runs = runner.list_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<15}", "RUN ID", "PROCESS", "STATE");
    println!("{}", "-".repeat(75));

    for run in runs {
        let state_str = match &run.state {
            crate::domain::RunState::Running => "running".to_string(),
            crate::domain::RunState::Completed => "completed".to_string(),
            crate::domain::RunState::Failed { .. } => "failed".to_string(),
            crate::domain::RunState::LimitReached { .. } => "limit-reached".to_string(),
        };
        println!("{:<38} {:<20} {:<15}", run.id, run.process_name, state_str);
    }

    Ok(())
}

/// Resume an interrupted run
async fn resume_run(
    run_id_str: &str,
    process_name: &str,
    inputs_file: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let run_id = Uuid::parse_str(run_id_str)
        .with_context(|| format!("Invalid run ID: {}", run_id_str))?;

    let spec = load_process(process_name)?;
    let inputs = read_inputs(inputs_file, false)?;

    let runner = build_runner(yes)?;
    let result = runner.resume(run_id, &spec, inputs).await?;

    let json = serde_json::to_string_pretty(&result)?;
    println!("{}", json);

    if result.success {
        eprintln!("\n[Run {} resumed and completed successfully]", run_id);
        Ok(())
    } else {
        eprintln!(
            "\n[Run {} failed again: {}]",
            run_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
}

/// Validate a process definition and report schema advisories
async fn validate_process(process_name: &str) -> Result<()> {
    let spec = load_process(process_name)?;

    println!("Process '{}' is valid", spec.name);
    println!("  Steps: {}", spec.steps().count());
    println!(
        "  Checkpoints: {}",
        spec.pipeline.len() - spec.steps().count()
    );

    let advisories = spec.schema_advisories();
    if advisories.is_empty() {
        println!("  No schema advisories");
    } else {
        println!("\nSchema advisories:");
        for advisory in advisories {
            println!("  - {}", advisory);
        }
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("taskline configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Processes:           {}", cfg.processes.display());
    println!("  Runs:                {}", cfg.home.join("runs").display());
    println!();
    println!("Agent:");
    println!("  Command: {} {}", cfg.agent.command, cfg.agent.args.join(" "));
    println!(
        "  Prompt template: {}",
        cfg.agent
            .prompt_template
            .as_deref()
            .unwrap_or("(built-in)")
    );
    println!();
    println!("Limits:");
    println!("  Max steps:        {}", cfg.limits.max_steps);
    println!("  Max input bytes:  {}", cfg.limits.max_input_bytes);
    println!("  Max output bytes: {}", cfg.limits.max_output_bytes);
    println!("  Step timeout:     {}s", cfg.limits.step_timeout_seconds);
    println!("  Run timeout:      {}s", cfg.limits.run_timeout_seconds);
    println!();
    println!("Checkpoints:");
    match cfg.checkpoint.timeout_seconds {
        Some(seconds) => println!(
            "  Timeout: {}s (on timeout: {:?})",
            seconds, cfg.checkpoint.on_timeout
        ),
        None => println!("  Timeout: none (block until answered)"),
    }

    Ok(())
}

/// Build a runner wired to the configured agent and checkpoint gate
fn build_runner(auto_approve: bool) -> Result<crate::core::ProcessRunner> {
    let cfg = config::config()?;

    let mut agent = SubprocessAgent::new(&cfg.agent.command, cfg.agent.args.clone());
    if let Some(template) = &cfg.agent.prompt_template {
        agent = agent.with_template(template.clone());
    }

    let gate: Arc<dyn CheckpointGate> = if auto_approve {
        Arc::new(AutoApproveGate)
    } else {
        match cfg.checkpoint.timeout_seconds {
            Some(seconds) => Arc::new(
                ConsoleGate::new()
                    .with_timeout(Duration::from_secs(seconds), cfg.checkpoint.on_timeout),
            ),
            None => Arc::new(ConsoleGate::new()),
        }
    };

    Ok(crate::core::ProcessRunner::new(Arc::new(agent), gate))
}

/// Load and validate a process definition by name
fn load_process(name: &str) -> Result<ProcessSpec> {
    let path = config::process_path(name)?;

    if !path.exists() {
        // Try looking under the local processes/ directory
        let alt_path = PathBuf::from("processes").join(format!("{}.yaml", name));
        if alt_path.exists() {
            let spec = ProcessSpec::from_file(&alt_path)?;
            spec.validate()?;
            return Ok(spec);
        }

        anyhow::bail!(
            "Process '{}' not found. Looked for:\n  - {}\n  - {}",
            name,
            path.display(),
            alt_path.display()
        );
    }

    let spec = ProcessSpec::from_file(&path)?;
    spec.validate()?;
    Ok(spec)
}

/// Read process inputs from a file, stdin, or default to null
fn read_inputs(inputs_file: Option<PathBuf>, use_stdin: bool) -> Result<Value> {
    let content = if let Some(path) = inputs_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read inputs file: {}", path.display()))?
    } else if use_stdin {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        return Ok(Value::Null);
    };

    if content.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(&content).context("Inputs must be a JSON document")
}

//! Main runner for process execution.
//!
//! Sequences steps and checkpoints, threads step outputs forward,
//! enforces limits, validates every result against its schema, and
//! assembles the terminal process result. Steps execute strictly
//! sequentially: step N's result is fully validated and persisted before
//! step N+1's arguments are resolved.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::agent::AgentExecutor;
use crate::domain::{
    collect_artifacts, Artifact, Event, EventType, ProcessMetadata, ProcessResult, Run, RunState,
    StepStatus, TaskContext, TaskDescriptor,
};

use super::checkpoint::{CheckpointGate, CheckpointRequest};
use super::limits::{LimitViolation, RunLimits, RunTracker};
use super::process::{CheckpointSpec, InputBinding, PipelineItem, ProcessSpec, StepSpec, WhenClause};
use super::run_store::{generate_idempotency_key, RunStore};
use super::schema;

/// Main process runner
pub struct ProcessRunner {
    /// Executor handed every task invocation
    executor: Arc<dyn AgentExecutor>,

    /// Gate consulted at every checkpoint
    gate: Arc<dyn CheckpointGate>,

    /// Override for the runs directory (tests; defaults to config)
    base_dir: Option<PathBuf>,
}

impl ProcessRunner {
    /// Create a runner with an executor and a checkpoint gate
    pub fn new(executor: Arc<dyn AgentExecutor>, gate: Arc<dyn CheckpointGate>) -> Self {
        Self {
            executor,
            gate,
            base_dir: None,
        }
    }

    /// Store runs under an explicit directory instead of the configured one
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    async fn open_store(&self, run_id: Uuid) -> Result<RunStore> {
        match &self.base_dir {
            Some(base) => RunStore::open_in(base, run_id).await,
            None => RunStore::open(run_id).await,
        }
    }

    /// Execute a process with the given inputs
    #[instrument(skip(self, spec, inputs), fields(process = %spec.name))]
    pub async fn run(&self, spec: &ProcessSpec, inputs: Value) -> Result<ProcessResult> {
        spec.validate()?;
        for advisory in spec.schema_advisories() {
            warn!(%advisory, "Schema/orchestrator mismatch");
        }

        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting process execution");

        let store = self.open_store(run_id).await?;
        let inputs = merge_inputs(spec, inputs)?;
        let mut run = Run::new(run_id, spec.name.clone());

        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            format!("Process '{}' started", spec.name),
            StepStatus::Running,
        );
        store.append(&start_event).await?;

        self.execute_pipeline(&store, spec, &inputs, &mut run, false)
            .await
    }

    /// Resume a previously interrupted run
    #[instrument(skip(self, spec, inputs), fields(run_id = %run_id, process = %spec.name))]
    pub async fn resume(
        &self,
        run_id: Uuid,
        spec: &ProcessSpec,
        inputs: Value,
    ) -> Result<ProcessResult> {
        spec.validate()?;
        info!("Resuming run");

        let store = self.open_store(run_id).await?;
        let events = store.replay().await?;

        if events.is_empty() {
            anyhow::bail!("No events found for run {}", run_id);
        }

        let mut run = Run::from_events(&events).context("Failed to reconstruct run state")?;
        run.process_name = spec.name.clone();
        run.state = RunState::Running;
        run.completed_at = None;

        let inputs = merge_inputs(spec, inputs)?;

        self.execute_pipeline(&store, spec, &inputs, &mut run, true)
            .await
    }

    async fn execute_pipeline(
        &self,
        store: &RunStore,
        spec: &ProcessSpec,
        inputs: &Value,
        run: &mut Run,
        resuming: bool,
    ) -> Result<ProcessResult> {
        let run_started = Instant::now();
        let started_at = run.started_at;
        let mut tracker = RunTracker::new();
        let mut results: HashMap<String, Value> = HashMap::new();
        let mut artifacts: Vec<Artifact> = Vec::new();

        for (item_idx, item) in spec.pipeline.iter().enumerate() {
            match item {
                PipelineItem::Checkpoint { checkpoint } => {
                    if let Err(failure) = self
                        .pause_at_checkpoint(store, run, checkpoint, item_idx, &artifacts)
                        .await
                    {
                        return self
                            .fail_run(store, spec, run, inputs, started_at, run_started, &results, &artifacts, failure, None)
                            .await;
                    }
                }
                PipelineItem::Step(step) => {
                    run.current_step = item_idx;

                    if let Some(when) = &step.when {
                        if !condition_met(when, &results) {
                            self.skip_step(store, run, step, "Condition not met").await?;
                            continue;
                        }
                    }

                    let args = match resolve_args(step, inputs, &results) {
                        Ok(args) => args,
                        Err(e) => {
                            return self
                                .fail_run(store, spec, run, inputs, started_at, run_started, &results, &artifacts, e, Some(&step.name))
                                .await;
                        }
                    };
                    let args_json =
                        serde_json::to_string(&args).context("Failed to serialize step args")?;

                    if let Err(violation) = spec
                        .limits
                        .check(&tracker)
                        .and_then(|_| spec.limits.validate_input(&args_json))
                    {
                        return self
                            .handle_limit_violation(store, spec, run, inputs, started_at, run_started, &results, &artifacts, violation)
                            .await;
                    }

                    let idem_key = generate_idempotency_key(run.id, &step.name, &args_json);

                    if resuming && store.is_step_completed(&idem_key).await? {
                        if let Some(result) = store.load_step_result(&step.name).await? {
                            info!(step = %step.name, "Step already completed, skipping");
                            artifacts.extend(collect_artifacts(&result));
                            results.insert(step.name.clone(), result);
                            run.step_statuses
                                .insert(step.name.clone(), StepStatus::Completed);
                            continue;
                        }
                        // Mirror missing: fall through and re-execute
                        debug!(step = %step.name, "Completed step has no mirrored result, re-executing");
                    }

                    let ctx = TaskContext::new(run.id);
                    let descriptor = TaskDescriptor::build(
                        step.name.clone(),
                        step.title().to_string(),
                        step.agent.clone(),
                        step.output_schema.clone(),
                        step.labels.clone(),
                        &ctx,
                    );

                    store
                        .write_json(&descriptor.io.input_json_path, &args)
                        .await?;

                    match self
                        .execute_step_with_retry(
                            store,
                            run,
                            step,
                            &descriptor,
                            &args,
                            &args_json,
                            &spec.limits,
                            &mut tracker,
                        )
                        .await
                    {
                        Ok(result) => {
                            artifacts.extend(collect_artifacts(&result));
                            results.insert(step.name.clone(), result);
                        }
                        Err(e) => {
                            return self
                                .fail_run(store, spec, run, inputs, started_at, run_started, &results, &artifacts, e, Some(&step.name))
                                .await;
                        }
                    }
                }
            }
        }

        self.complete_run(store, spec, run, inputs, started_at, run_started, &results, artifacts)
            .await
    }

    /// Suspend the run at a checkpoint until the gate resumes it
    async fn pause_at_checkpoint(
        &self,
        store: &RunStore,
        run: &mut Run,
        checkpoint: &CheckpointSpec,
        item_idx: usize,
        artifacts: &[Artifact],
    ) -> Result<()> {
        let request = CheckpointRequest {
            title: checkpoint.title.clone(),
            question: checkpoint.question.clone(),
            context: checkpoint.context.clone(),
            artifacts: if checkpoint.include_artifacts {
                artifacts.to_vec()
            } else {
                Vec::new()
            },
        };

        let reached = Event::new(
            run.id,
            None,
            EventType::CheckpointReached,
            format!("{}:checkpoint:{}", run.id, item_idx),
            format!("Checkpoint '{}': {}", checkpoint.title, checkpoint.question),
            StepStatus::Running,
        );
        store.append(&reached).await?;
        run.checkpoints_reached += 1;

        info!(checkpoint = %checkpoint.title, "Awaiting review");
        self.gate
            .review(&request)
            .await
            .with_context(|| format!("Checkpoint '{}' did not resume", checkpoint.title))?;

        let resumed = Event::new(
            run.id,
            None,
            EventType::CheckpointResumed,
            format!("{}:checkpoint:{}:resumed", run.id, item_idx),
            format!("Checkpoint '{}' resumed", checkpoint.title),
            StepStatus::Running,
        );
        store.append(&resumed).await?;

        Ok(())
    }

    /// Journal a skipped step
    async fn skip_step(
        &self,
        store: &RunStore,
        run: &mut Run,
        step: &StepSpec,
        reason: &str,
    ) -> Result<()> {
        debug!(step = %step.name, reason, "Skipping step");

        let event = Event::new(
            run.id,
            Some(step.name.clone()),
            EventType::StepSkipped,
            format!("{}:{}:skipped", run.id, step.name),
            format!("Step '{}' skipped: {}", step.name, reason),
            StepStatus::Skipped,
        );
        store.append(&event).await?;
        run.step_statuses
            .insert(step.name.clone(), StepStatus::Skipped);

        Ok(())
    }

    /// Execute a step with retry, validating every result before use
    #[allow(clippy::too_many_arguments)]
    async fn execute_step_with_retry(
        &self,
        store: &RunStore,
        run: &mut Run,
        step: &StepSpec,
        descriptor: &TaskDescriptor,
        args: &Value,
        args_json: &str,
        limits: &RunLimits,
        tracker: &mut RunTracker,
    ) -> Result<Value> {
        let idem_key = generate_idempotency_key(run.id, &step.name, args_json);
        let timeout = step.timeout(limits);

        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let step_start = Instant::now();

            let start_event = Event::new(
                run.id,
                Some(step.name.clone()),
                EventType::StepStarted,
                idem_key.clone(),
                format!("Step '{}' attempt {}", step.name, attempt),
                StepStatus::Running,
            );
            store.append(&start_event).await?;
            run.step_statuses
                .insert(step.name.clone(), StepStatus::Running);

            let result = self
                .attempt_step(descriptor, step, args, limits, timeout)
                .await;

            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok((value, output_bytes)) => {
                    store
                        .write_json(&descriptor.io.output_json_path, &value)
                        .await?;
                    store.store_step_result(&step.name, &value).await?;

                    tracker.record_step(args_json.len() as u64, output_bytes);

                    let complete_event = Event::new(
                        run.id,
                        Some(step.name.clone()),
                        EventType::StepCompleted,
                        idem_key,
                        format!("Step '{}' completed in {}ms", step.name, duration_ms),
                        StepStatus::Completed,
                    )
                    .with_duration(duration_ms);
                    store.append(&complete_event).await?;
                    run.step_statuses
                        .insert(step.name.clone(), StepStatus::Completed);

                    return Ok(value);
                }
                Err(e) => {
                    if step.retry.should_retry(attempt) {
                        let delay = step.retry.delay_for_attempt(attempt);

                        let retry_event = Event::new(
                            run.id,
                            Some(step.name.clone()),
                            EventType::StepRetrying,
                            format!("{}:retry:{}", idem_key, attempt),
                            format!(
                                "Step '{}' failed, retrying in {:?}: {}",
                                step.name, delay, e
                            ),
                            StepStatus::Running,
                        )
                        .with_error(e.to_string());
                        store.append(&retry_event).await?;

                        warn!(
                            step = %step.name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Step failed, retrying"
                        );

                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let fail_event = Event::new(
                        run.id,
                        Some(step.name.clone()),
                        EventType::StepFailed,
                        idem_key,
                        format!(
                            "Step '{}' failed after {} attempts: {}",
                            step.name, attempt, e
                        ),
                        StepStatus::Failed,
                    )
                    .with_duration(duration_ms)
                    .with_error(e.to_string());
                    store.append(&fail_event).await?;
                    run.step_statuses
                        .insert(step.name.clone(), StepStatus::Failed);

                    error!(
                        step = %step.name,
                        attempt,
                        error = %e,
                        "Step failed permanently"
                    );

                    return Err(e);
                }
            }
        }
    }

    /// One execution attempt: run the agent, then gate the result.
    ///
    /// A result that fails the schema gate never reaches the caller.
    async fn attempt_step(
        &self,
        descriptor: &TaskDescriptor,
        step: &StepSpec,
        args: &Value,
        limits: &RunLimits,
        timeout: std::time::Duration,
    ) -> Result<(Value, u64)> {
        let value = self.executor.execute(descriptor, args, timeout).await?;

        let serialized =
            serde_json::to_string(&value).context("Failed to serialize step result")?;
        limits.validate_output(&serialized)?;
        schema::validate_result(&step.name, &value, &step.output_schema)?;

        Ok((value, serialized.len() as u64))
    }

    /// Handle a limit violation by journaling and returning a failed result
    #[allow(clippy::too_many_arguments)]
    async fn handle_limit_violation(
        &self,
        store: &RunStore,
        spec: &ProcessSpec,
        run: &mut Run,
        inputs: &Value,
        started_at: DateTime<Utc>,
        run_started: Instant,
        results: &HashMap<String, Value>,
        artifacts: &[Artifact],
        violation: LimitViolation,
    ) -> Result<ProcessResult> {
        let error_msg = violation.to_string();
        error!(%error_msg, "Run limit reached");

        run.state = RunState::LimitReached {
            limit: error_msg.clone(),
        };
        run.completed_at = Some(Utc::now());

        let event = Event::new(
            run.id,
            None,
            EventType::LimitReached,
            format!("{}:limit", run.id),
            format!("Run limit reached: {}", error_msg),
            StepStatus::Failed,
        )
        .with_error(error_msg.clone());
        store.append(&event).await?;

        Ok(failed_result(
            spec,
            run,
            inputs,
            started_at,
            run_started,
            results,
            artifacts,
            error_msg,
            None,
        ))
    }

    /// Handle a run failure: journal it and return a `{success:false}` result
    #[allow(clippy::too_many_arguments)]
    async fn fail_run(
        &self,
        store: &RunStore,
        spec: &ProcessSpec,
        run: &mut Run,
        inputs: &Value,
        started_at: DateTime<Utc>,
        run_started: Instant,
        results: &HashMap<String, Value>,
        artifacts: &[Artifact],
        error: anyhow::Error,
        failed_step: Option<&str>,
    ) -> Result<ProcessResult> {
        let error_msg = error.to_string();
        error!(%error_msg, "Run failed");

        run.state = RunState::Failed {
            error: error_msg.clone(),
        };
        run.completed_at = Some(Utc::now());

        let event = Event::new(
            run.id,
            None,
            EventType::RunFailed,
            format!("{}:complete", run.id),
            format!("Run failed: {}", error_msg),
            StepStatus::Failed,
        )
        .with_error(error_msg.clone());
        store.append(&event).await?;

        Ok(failed_result(
            spec,
            run,
            inputs,
            started_at,
            run_started,
            results,
            artifacts,
            error_msg,
            failed_step,
        ))
    }

    /// Complete a successful run
    #[allow(clippy::too_many_arguments)]
    async fn complete_run(
        &self,
        store: &RunStore,
        spec: &ProcessSpec,
        run: &mut Run,
        inputs: &Value,
        started_at: DateTime<Utc>,
        run_started: Instant,
        results: &HashMap<String, Value>,
        artifacts: Vec<Artifact>,
    ) -> Result<ProcessResult> {
        info!(run_id = %run.id, "Run completed successfully");

        run.state = RunState::Completed;
        run.completed_at = Some(Utc::now());

        let event = Event::new(
            run.id,
            None,
            EventType::RunCompleted,
            format!("{}:complete", run.id),
            format!("Process '{}' completed", spec.name),
            StepStatus::Completed,
        );
        store.append(&event).await?;

        Ok(ProcessResult {
            success: true,
            outputs: project_outputs(spec, results),
            artifacts,
            duration_ms: run_started.elapsed().as_millis() as u64,
            metadata: ProcessMetadata {
                run_id: run.id,
                process: spec.name.clone(),
                started_at,
                inputs: inputs.clone(),
            },
            error: None,
            details: None,
        })
    }

    /// Get status of a run by ID
    pub async fn get_run_status(&self, run_id: Uuid) -> Result<Run> {
        let store = self.open_store(run_id).await?;
        let events = store.replay().await?;

        if events.is_empty() {
            anyhow::bail!("Run {} not found", run_id);
        }

        Run::from_events(&events).context("Failed to reconstruct run state")
    }

    /// List recent runs
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let run_ids = match &self.base_dir {
            Some(base) => RunStore::list_runs_in(base).await?,
            None => RunStore::list_runs().await?,
        };

        let mut runs = Vec::new();
        for run_id in run_ids.into_iter().take(limit) {
            if let Ok(run) = self.get_run_status(run_id).await {
                runs.push(run);
            }
        }

        // Sort by start time (most recent first)
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(runs)
    }
}

/// Overlay caller-supplied inputs onto the process defaults
fn merge_inputs(spec: &ProcessSpec, inputs: Value) -> Result<Value> {
    let mut merged: Map<String, Value> = spec
        .defaults
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match inputs {
        Value::Null => {}
        Value::Object(supplied) => {
            for (key, value) in supplied {
                merged.insert(key, value);
            }
        }
        other => anyhow::bail!("Process inputs must be a JSON object, got: {}", other),
    }

    Ok(Value::Object(merged))
}

/// Evaluate a step's condition against prior results
fn condition_met(when: &WhenClause, results: &HashMap<String, Value>) -> bool {
    results
        .get(&when.step)
        .and_then(|result| result.get(&when.field))
        .map(|value| *value == when.equals)
        .unwrap_or(false)
}

/// Assemble a step's args object from its input bindings
fn resolve_args(
    step: &StepSpec,
    inputs: &Value,
    results: &HashMap<String, Value>,
) -> Result<Value> {
    let mut args = Map::new();

    for (name, binding) in &step.inputs {
        let value = match binding {
            InputBinding::ProcessInput { input } => {
                inputs.get(input).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Step '{}' references unknown process input '{}'",
                        step.name,
                        input
                    )
                })?
            }
            InputBinding::StepField { step: from, field } => results
                .get(from)
                .and_then(|result| result.get(field))
                .cloned()
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "Step '{}' references missing field '{}' of step '{}'",
                        step.name,
                        field,
                        from
                    )
                })?,
            InputBinding::StepResult { step: from } => {
                results.get(from).cloned().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Step '{}' references result of step '{}' which did not run",
                        step.name,
                        from
                    )
                })?
            }
            InputBinding::Literal { value } => value.clone(),
        };

        args.insert(name.clone(), value);
    }

    Ok(Value::Object(args))
}

/// Project the curated output subset from step results
fn project_outputs(spec: &ProcessSpec, results: &HashMap<String, Value>) -> Map<String, Value> {
    let mut outputs = Map::new();

    for (name, field_ref) in &spec.outputs {
        match results
            .get(&field_ref.step)
            .and_then(|result| result.get(&field_ref.field))
        {
            Some(value) => {
                outputs.insert(name.clone(), value.clone());
            }
            None => {
                warn!(
                    output = %name,
                    step = %field_ref.step,
                    field = %field_ref.field,
                    "Output projection has no value"
                );
            }
        }
    }

    outputs
}

/// Build a standardized failure result
#[allow(clippy::too_many_arguments)]
fn failed_result(
    spec: &ProcessSpec,
    run: &Run,
    inputs: &Value,
    started_at: DateTime<Utc>,
    run_started: Instant,
    results: &HashMap<String, Value>,
    artifacts: &[Artifact],
    error: String,
    failed_step: Option<&str>,
) -> ProcessResult {
    ProcessResult {
        success: false,
        outputs: project_outputs(spec, results),
        artifacts: artifacts.to_vec(),
        duration_ms: run_started.elapsed().as_millis() as u64,
        metadata: ProcessMetadata {
            run_id: run.id,
            process: spec.name.clone(),
            started_at,
            inputs: inputs.clone(),
        },
        error: Some(error),
        details: failed_step.map(|step| serde_json::json!({ "failed_step": step })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::RetryPolicy;
    use serde_json::json;

    fn step_with_inputs(inputs: &[(&str, InputBinding)]) -> StepSpec {
        StepSpec {
            name: "second".to_string(),
            title: None,
            agent: crate::domain::AgentPrompt {
                role: "r".to_string(),
                task: "t".to_string(),
                instructions: vec![],
                output_format: None,
            },
            labels: vec![],
            inputs: inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            output_schema: Value::Null,
            when: None,
            retry: RetryPolicy::default(),
            timeout_seconds: None,
        }
    }

    #[test]
    fn test_resolve_args_all_binding_forms() {
        let mut results = HashMap::new();
        results.insert("first".to_string(), json!({"model": {"vars": 2}}));

        let step = step_with_inputs(&[
            (
                "problem",
                InputBinding::ProcessInput {
                    input: "problem".to_string(),
                },
            ),
            (
                "model",
                InputBinding::StepField {
                    step: "first".to_string(),
                    field: "model".to_string(),
                },
            ),
            (
                "upstream",
                InputBinding::StepResult {
                    step: "first".to_string(),
                },
            ),
            (
                "solver",
                InputBinding::Literal {
                    value: json!("glpk"),
                },
            ),
        ]);

        let inputs = json!({"problem": "minimize cost"});
        let args = resolve_args(&step, &inputs, &results).unwrap();

        assert_eq!(args["problem"], json!("minimize cost"));
        assert_eq!(args["model"], json!({"vars": 2}));
        assert_eq!(args["upstream"], json!({"model": {"vars": 2}}));
        assert_eq!(args["solver"], json!("glpk"));
    }

    #[test]
    fn test_resolve_args_missing_input_fails() {
        let step = step_with_inputs(&[(
            "problem",
            InputBinding::ProcessInput {
                input: "missing".to_string(),
            },
        )]);

        let err = resolve_args(&step, &json!({}), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown process input"));
    }

    #[test]
    fn test_condition_met() {
        let mut results = HashMap::new();
        results.insert("solve".to_string(), json!({"feasible": false}));

        let when = WhenClause {
            step: "solve".to_string(),
            field: "feasible".to_string(),
            equals: json!(false),
        };
        assert!(condition_met(&when, &results));

        let when_true = WhenClause {
            equals: json!(true),
            ..when.clone()
        };
        assert!(!condition_met(&when_true, &results));

        // Missing step or field: condition is not met
        let when_missing = WhenClause {
            step: "absent".to_string(),
            field: "feasible".to_string(),
            equals: json!(false),
        };
        assert!(!condition_met(&when_missing, &results));
    }

    #[test]
    fn test_merge_inputs_defaults_and_overrides() {
        let yaml = r#"
name: defaults
description: Input defaults
defaults:
  targetServiceLevel: 0.95
  horizonWeeks: 12
pipeline:
  - name: only
    agent: { role: a, task: t }
"#;
        let spec = ProcessSpec::from_yaml(yaml).unwrap();

        let merged = merge_inputs(&spec, json!({"horizonWeeks": 26})).unwrap();
        assert_eq!(merged["targetServiceLevel"], json!(0.95));
        assert_eq!(merged["horizonWeeks"], json!(26));

        let merged = merge_inputs(&spec, Value::Null).unwrap();
        assert_eq!(merged["horizonWeeks"], json!(12));

        assert!(merge_inputs(&spec, json!([1, 2])).is_err());
    }
}

//! Checkpoint Integration Tests
//!
//! Tests for human-review gates: blocking, artifact presentation, abort
//! behavior, and non-interference with step results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use taskline::core::{
    AutoApproveGate, CheckpointError, CheckpointGate, CheckpointRequest, ProcessRunner,
    ProcessSpec, RunStore,
};
use taskline::domain::{EventType, TaskDescriptor};
use taskline::AgentExecutor;

struct ScriptedAgent {
    responses: HashMap<String, Value>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    fn new(responses: &[(&str, Value)]) -> Self {
        Self {
            responses: responses
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentExecutor for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        descriptor: &TaskDescriptor,
        _args: &Value,
        _timeout: Duration,
    ) -> anyhow::Result<Value> {
        self.calls.lock().unwrap().push(descriptor.name.clone());
        self.responses
            .get(&descriptor.name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no scripted response for step '{}'", descriptor.name))
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Gate that records every request it sees, then resumes
struct RecordingGate {
    requests: Mutex<Vec<CheckpointRequest>>,
}

impl RecordingGate {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<CheckpointRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CheckpointGate for RecordingGate {
    fn name(&self) -> &str {
        "recording"
    }

    async fn review(&self, request: &CheckpointRequest) -> Result<(), CheckpointError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Gate that rejects every checkpoint
struct AbortGate;

#[async_trait]
impl CheckpointGate for AbortGate {
    fn name(&self) -> &str {
        "abort"
    }

    async fn review(&self, request: &CheckpointRequest) -> Result<(), CheckpointError> {
        Err(CheckpointError::Aborted(request.title.clone()))
    }
}

fn checkpointed_yaml() -> &'static str {
    r#"
name: reviewed-forecast
description: Forecast with a mid-run review
pipeline:
  - name: forecast
    agent: { role: planner, task: Forecast demand }
    output_schema:
      type: object
      required: [forecast, artifacts]

  - checkpoint:
      title: Review forecast
      question: Is the forecast plausible?
      context: { horizonWeeks: 12 }

  - name: plan
    agent: { role: planner, task: Plan inventory }
    inputs:
      forecast: { step: forecast, field: forecast }
    output_schema:
      type: object
      required: [plan, artifacts]

outputs:
  plan: { step: plan, field: plan }
"#
}

fn responses() -> Vec<(&'static str, Value)> {
    vec![
        (
            "forecast",
            json!({"forecast": [5, 6], "artifacts": ["reports/forecast.csv"]}),
        ),
        ("plan", json!({"plan": {"reorder": 3}, "artifacts": []})),
    ]
}

#[tokio::test]
async fn test_checkpoint_presents_accumulated_artifacts() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&responses()));
    let gate = Arc::new(RecordingGate::new());

    let spec = ProcessSpec::from_yaml(checkpointed_yaml()).unwrap();
    let runner =
        ProcessRunner::new(agent, gate.clone()).with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();
    assert!(result.success);

    let requests = gate.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].title, "Review forecast");
    assert_eq!(requests[0].question, "Is the forecast plausible?");
    assert_eq!(requests[0].context, json!({"horizonWeeks": 12}));
    assert_eq!(requests[0].artifacts.len(), 1);
    assert_eq!(requests[0].artifacts[0].path, "reports/forecast.csv");
}

#[tokio::test]
async fn test_checkpoint_does_not_alter_results() {
    // The same process runs with and without a reviewer in the loop;
    // outputs and artifacts must be identical either way.
    let spec = ProcessSpec::from_yaml(checkpointed_yaml()).unwrap();

    let temp_reviewed = TempDir::new().unwrap();
    let reviewed = ProcessRunner::new(
        Arc::new(ScriptedAgent::new(&responses())),
        Arc::new(RecordingGate::new()),
    )
    .with_base_dir(temp_reviewed.path());
    let reviewed_result = reviewed.run(&spec, Value::Null).await.unwrap();

    let temp_auto = TempDir::new().unwrap();
    let auto = ProcessRunner::new(
        Arc::new(ScriptedAgent::new(&responses())),
        Arc::new(AutoApproveGate),
    )
    .with_base_dir(temp_auto.path());
    let auto_result = auto.run(&spec, Value::Null).await.unwrap();

    assert!(reviewed_result.success && auto_result.success);
    assert_eq!(reviewed_result.outputs, auto_result.outputs);
    assert_eq!(reviewed_result.artifacts, auto_result.artifacts);
}

#[tokio::test]
async fn test_checkpoint_events_journaled() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&responses()));

    let spec = ProcessSpec::from_yaml(checkpointed_yaml()).unwrap();
    let runner =
        ProcessRunner::new(agent, Arc::new(AutoApproveGate)).with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();

    let reached_pos = events
        .iter()
        .position(|e| e.event_type == EventType::CheckpointReached)
        .unwrap();
    let resumed_pos = events
        .iter()
        .position(|e| e.event_type == EventType::CheckpointResumed)
        .unwrap();
    assert!(reached_pos < resumed_pos);

    // The checkpoint sits between the two step completions
    let forecast_done = events
        .iter()
        .position(|e| {
            e.event_type == EventType::StepCompleted
                && e.step_id.as_deref() == Some("forecast")
        })
        .unwrap();
    let plan_started = events
        .iter()
        .position(|e| {
            e.event_type == EventType::StepStarted && e.step_id.as_deref() == Some("plan")
        })
        .unwrap();
    assert!(forecast_done < reached_pos);
    assert!(resumed_pos < plan_started);
}

#[tokio::test]
async fn test_aborted_checkpoint_fails_run() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&responses()));

    let spec = ProcessSpec::from_yaml(checkpointed_yaml()).unwrap();
    let runner = ProcessRunner::new(agent.clone(), Arc::new(AbortGate)).with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("Checkpoint 'Review forecast' did not resume"));

    // Steps after the checkpoint never ran
    assert_eq!(agent.calls(), vec!["forecast"]);

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();
    assert!(events.iter().any(|e| e.event_type == EventType::RunFailed));
    assert!(!events
        .iter()
        .any(|e| e.event_type == EventType::CheckpointResumed));
}

#[tokio::test]
async fn test_checkpoint_without_artifacts_when_excluded() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
name: quiet-review
description: Checkpoint without the artifact list
pipeline:
  - name: forecast
    agent: { role: planner, task: Forecast demand }
    output_schema:
      type: object
      required: [forecast, artifacts]

  - checkpoint:
      title: Quick check
      question: Continue?
      include_artifacts: false

  - name: plan
    agent: { role: planner, task: Plan inventory }
    output_schema:
      type: object
      required: [plan, artifacts]
"#;

    let agent = Arc::new(ScriptedAgent::new(&responses()));
    let gate = Arc::new(RecordingGate::new());

    let spec = ProcessSpec::from_yaml(yaml).unwrap();
    let runner = ProcessRunner::new(agent, gate.clone()).with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();
    assert!(result.success);

    let requests = gate.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].artifacts.is_empty());
}

//! Orchestration Integration Tests
//!
//! End-to-end tests of process execution through the public API, using a
//! scripted in-memory agent instead of a subprocess.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use taskline::core::{AutoApproveGate, ProcessRunner, ProcessSpec, RunStore};
use taskline::domain::{EventType, TaskDescriptor};
use taskline::AgentExecutor;

/// Agent that replays scripted results per step and records call order
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

fn forecast_yaml() -> &'static str {
    r#"
name: demand-forecast
description: Forecast demand and plan inventory
pipeline:
  - name: forecast
    agent:
      role: demand planner
      task: Produce a demand forecast
    inputs:
      history: { input: history }
    output_schema:
      type: object
      required: [forecast, artifacts]

  - name: plan
    agent:
      role: inventory planner
      task: Plan inventory from the forecast
    inputs:
      forecast: { step: forecast, field: forecast }
    output_schema:
      type: object
      required: [plan, artifacts]

  - name: review
    agent:
      role: reviewer
      task: Summarize the plan
    inputs:
      plan: { step: plan, field: plan }
    output_schema:
      type: object
      required: [summary, artifacts]

outputs:
  forecast: { step: forecast, field: forecast }
  summary: { step: review, field: summary }
"#
}

fn runner_with(agent: Arc<ScriptedAgent>, temp: &TempDir) -> ProcessRunner {
    ProcessRunner::new(agent, Arc::new(AutoApproveGate)).with_base_dir(temp.path())
}

#[tokio::test]
async fn test_steps_execute_sequentially_in_order() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&[
        ("forecast", json!({"forecast": [10, 12], "artifacts": []})),
        ("plan", json!({"plan": {"reorder": 5}, "artifacts": []})),
        ("review", json!({"summary": "ok", "artifacts": []})),
    ]));

    let spec = ProcessSpec::from_yaml(forecast_yaml()).unwrap();
    let runner = runner_with(agent.clone(), &temp);

    let result = runner
        .run(&spec, json!({"history": [8, 9, 11]}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(agent.calls(), vec!["forecast", "plan", "review"]);
    assert_eq!(result.outputs["forecast"], json!([10, 12]));
    assert_eq!(result.outputs["summary"], json!("ok"));
    assert!(result.error.is_none());
}

#[tokio::test]
async fn test_artifacts_accumulate_in_step_order() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&[
        (
            "forecast",
            json!({"forecast": [1], "artifacts": ["reports/forecast.csv"]}),
        ),
        (
            "plan",
            json!({"plan": {}, "artifacts": [
                {"path": "reports/plan.md", "format": "md"},
                "reports/orders.json"
            ]}),
        ),
        ("review", json!({"summary": "done", "artifacts": []})),
    ]));

    let spec = ProcessSpec::from_yaml(forecast_yaml()).unwrap();
    let runner = runner_with(agent, &temp);

    let result = runner.run(&spec, json!({"history": []})).await.unwrap();

    assert!(result.success);
    let paths: Vec<&str> = result.artifacts.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["reports/forecast.csv", "reports/plan.md", "reports/orders.json"]
    );
    assert_eq!(result.artifacts[1].format.as_deref(), Some("md"));
}

#[tokio::test]
async fn test_schema_violation_fails_run_before_later_steps() {
    let temp = TempDir::new().unwrap();
    // The plan step omits its required "plan" field
    let agent = Arc::new(ScriptedAgent::new(&[
        ("forecast", json!({"forecast": [1], "artifacts": []})),
        ("plan", json!({"artifacts": []})),
        ("review", json!({"summary": "unreachable", "artifacts": []})),
    ]));

    let spec = ProcessSpec::from_yaml(forecast_yaml()).unwrap();
    let runner = runner_with(agent.clone(), &temp);

    let result = runner.run(&spec, json!({"history": []})).await.unwrap();

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("failed schema validation"));
    assert_eq!(result.details, Some(json!({"failed_step": "plan"})));

    // The gated result never reached the next step
    assert_eq!(agent.calls(), vec!["forecast", "plan"]);

    // Earlier artifacts and outputs survive into the failure result
    assert_eq!(result.outputs["forecast"], json!([1]));
}

#[tokio::test]
async fn test_conditional_step_skipped_when_condition_false() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
name: solve-or-diagnose
description: Conditional diagnosis
pipeline:
  - name: solve
    agent: { role: solver, task: Solve }
    output_schema:
      type: object
      required: [feasible]
  - name: diagnose
    agent: { role: solver, task: Diagnose }
    when: { step: solve, field: feasible, equals: false }
outputs:
  feasible: { step: solve, field: feasible }
"#;

    let agent = Arc::new(ScriptedAgent::new(&[
        ("solve", json!({"feasible": true})),
        ("diagnose", json!({"cause": "unreachable"})),
    ]));

    let spec = ProcessSpec::from_yaml(yaml).unwrap();
    let runner = runner_with(agent.clone(), &temp);

    let result = runner.run(&spec, Value::Null).await.unwrap();

    assert!(result.success);
    assert_eq!(agent.calls(), vec!["solve"]);

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::StepSkipped
            && e.step_id.as_deref() == Some("diagnose")));
}

#[tokio::test]
async fn test_task_io_written_at_descriptor_paths() {
    let temp = TempDir::new().unwrap();
    let agent = Arc::new(ScriptedAgent::new(&[
        ("forecast", json!({"forecast": [2], "artifacts": []})),
        ("plan", json!({"plan": {}, "artifacts": []})),
        ("review", json!({"summary": "ok", "artifacts": []})),
    ]));

    let spec = ProcessSpec::from_yaml(forecast_yaml()).unwrap();
    let runner = runner_with(agent, &temp);

    let result = runner.run(&spec, json!({"history": [1]})).await.unwrap();
    assert!(result.success);

    // Every task directory holds an input.json and, once executed, a result.json
    let tasks_dir = temp
        .path()
        .join(result.metadata.run_id.to_string())
        .join("tasks");
    let mut task_dirs: Vec<_> = std::fs::read_dir(&tasks_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    task_dirs.sort();

    assert_eq!(task_dirs.len(), 3);
    for dir in task_dirs {
        assert!(dir.join("input.json").exists());
        assert!(dir.join("result.json").exists());

        let result_content = std::fs::read_to_string(dir.join("result.json")).unwrap();
        let parsed: Value = serde_json::from_str(&result_content).unwrap();
        assert!(parsed.is_object());
    }
}

#[tokio::test]
async fn test_max_steps_limit_halts_run() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
name: too-long
description: Exceeds the step budget
limits:
  max_steps: 1
pipeline:
  - name: first
    agent: { role: a, task: t }
  - name: second
    agent: { role: a, task: t }
"#;

    let agent = Arc::new(ScriptedAgent::new(&[
        ("first", json!({"out": 1})),
        ("second", json!({"out": 2})),
    ]));

    let spec = ProcessSpec::from_yaml(yaml).unwrap();
    let runner = runner_with(agent.clone(), &temp);

    let result = runner.run(&spec, Value::Null).await.unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("Maximum steps"));
    assert_eq!(agent.calls(), vec!["first"]);

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == EventType::LimitReached));
}

#[tokio::test]
async fn test_defaults_flow_into_step_args() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
name: defaults
description: Defaults reach steps
defaults:
  targetServiceLevel: 0.95
pipeline:
  - name: only
    agent: { role: a, task: t }
    inputs:
      target: { input: targetServiceLevel }
"#;

    // Echoes its args back so the test can observe them
    struct EchoAgent;

    #[async_trait]
    impl AgentExecutor for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            _descriptor: &TaskDescriptor,
            args: &Value,
            _timeout: Duration,
        ) -> anyhow::Result<Value> {
            Ok(json!({"received": args}))
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let spec = ProcessSpec::from_yaml(yaml).unwrap();
    let runner =
        ProcessRunner::new(Arc::new(EchoAgent), Arc::new(AutoApproveGate)).with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();
    assert!(result.success);

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let stored = store.load_step_result("only").await.unwrap().unwrap();
    assert_eq!(stored["received"]["target"], json!(0.95));
}

#[tokio::test]
async fn test_retry_then_success() {
    let temp = TempDir::new().unwrap();
    let yaml = r#"
name: flaky
description: Retry on transient failure
pipeline:
  - name: flaky
    agent: { role: a, task: t }
    retry:
      max_attempts: 3
      initial_delay_ms: 1
    output_schema:
      type: object
      required: [answer]
"#;

    /// Fails the first two attempts, then returns a valid result
    struct FlakyAgent {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl AgentExecutor for FlakyAgent {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(
            &self,
            _descriptor: &TaskDescriptor,
            _args: &Value,
            _timeout: Duration,
        ) -> anyhow::Result<Value> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if *attempts < 3 {
                anyhow::bail!("transient failure");
            }
            Ok(json!({"answer": 42}))
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let spec = ProcessSpec::from_yaml(yaml).unwrap();
    let runner = ProcessRunner::new(
        Arc::new(FlakyAgent {
            attempts: Mutex::new(0),
        }),
        Arc::new(AutoApproveGate),
    )
    .with_base_dir(temp.path());

    let result = runner.run(&spec, Value::Null).await.unwrap();
    assert!(result.success);

    let store = RunStore::open_in(temp.path(), result.metadata.run_id)
        .await
        .unwrap();
    let events = store.replay().await.unwrap();
    let retries = events
        .iter()
        .filter(|e| e.event_type == EventType::StepRetrying)
        .count();
    assert_eq!(retries, 2);
}

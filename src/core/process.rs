//! Process definitions and loading.
//!
//! Processes are defined in YAML and consist of an ordered pipeline of
//! steps and checkpoints, a map of input bindings per step, and a final
//! output projection that curates which step fields make it into the
//! terminal result.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::descriptor::AgentPrompt;

use super::limits::RunLimits;

/// A complete process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process name (used in CLI)
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Run limits for this process
    #[serde(default)]
    pub limits: RunLimits,

    /// Default values for process inputs (overridden by caller-supplied inputs)
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,

    /// Ordered pipeline of steps and checkpoints
    pub pipeline: Vec<PipelineItem>,

    /// Projection of step fields into the terminal result
    #[serde(default)]
    pub outputs: BTreeMap<String, FieldRef>,
}

impl ProcessSpec {
    /// Load a process from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read process file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a process from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse process YAML")
    }

    /// Steps in pipeline order
    pub fn steps(&self) -> impl Iterator<Item = &StepSpec> {
        self.pipeline.iter().filter_map(|item| match item {
            PipelineItem::Step(step) => Some(step),
            PipelineItem::Checkpoint { .. } => None,
        })
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&StepSpec> {
        self.steps().find(|s| s.name == name)
    }

    /// Validate the process definition.
    ///
    /// Step names must be unique (name collisions fail fast here rather
    /// than silently shadowing), bindings and conditions may only reference
    /// earlier steps, checkpoint questions must be non-empty, and output
    /// projections must reference declared steps.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Process name cannot be empty");
        }

        if self.steps().next().is_none() {
            anyhow::bail!("Process must have at least one step");
        }

        let mut seen: HashSet<&str> = HashSet::new();

        for (i, item) in self.pipeline.iter().enumerate() {
            match item {
                PipelineItem::Checkpoint { checkpoint } => {
                    if checkpoint.question.trim().is_empty() {
                        anyhow::bail!("Checkpoint at position {} has an empty question", i);
                    }
                }
                PipelineItem::Step(step) => {
                    if step.name.is_empty() {
                        anyhow::bail!("Step at position {} has an empty name", i);
                    }

                    if !seen.insert(step.name.as_str()) {
                        anyhow::bail!("Duplicate step name '{}'", step.name);
                    }

                    for (arg, binding) in &step.inputs {
                        if let Some(referenced) = binding.referenced_step() {
                            if !seen.contains(referenced) || referenced == step.name {
                                anyhow::bail!(
                                    "Step '{}' input '{}' references step '{}' which is not an earlier step",
                                    step.name,
                                    arg,
                                    referenced
                                );
                            }
                        }
                    }

                    if let Some(when) = &step.when {
                        if !seen.contains(when.step.as_str()) {
                            anyhow::bail!(
                                "Step '{}' condition references step '{}' which is not an earlier step",
                                step.name,
                                when.step
                            );
                        }
                    }
                }
            }
        }

        for (output, field_ref) in &self.outputs {
            if !seen.contains(field_ref.step.as_str()) {
                anyhow::bail!(
                    "Output '{}' references non-existent step '{}'",
                    output,
                    field_ref.step
                );
            }
        }

        Ok(())
    }

    /// Surface mismatches between declared output schemas and the fields
    /// the process actually reads downstream.
    ///
    /// Process definitions sometimes declare `required` fields nothing
    /// ever reads, or read fields their schemas never require. These are
    /// likely authoring bugs; we report them instead of guessing intent.
    pub fn schema_advisories(&self) -> Vec<String> {
        let mut advisories = Vec::new();

        for step in self.steps() {
            let declared: HashSet<&str> = step
                .output_schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
                .unwrap_or_default();

            let mut read: HashSet<&str> = HashSet::new();
            // The runner collects artifacts from every result
            read.insert("artifacts");
            let mut whole_result_read = false;

            for later in self.steps() {
                for binding in later.inputs.values() {
                    match binding {
                        InputBinding::StepField { step: from, field } if from == &step.name => {
                            read.insert(field.as_str());
                        }
                        InputBinding::StepResult { step: from } if from == &step.name => {
                            whole_result_read = true;
                        }
                        _ => {}
                    }
                }
                if let Some(when) = &later.when {
                    if when.step == step.name {
                        read.insert(when.field.as_str());
                    }
                }
            }

            for field_ref in self.outputs.values() {
                if field_ref.step == step.name {
                    read.insert(field_ref.field.as_str());
                }
            }

            if !whole_result_read {
                for field in declared.iter() {
                    if !read.contains(field) {
                        advisories.push(format!(
                            "step '{}' requires field '{}' that nothing downstream reads",
                            step.name, field
                        ));
                    }
                }
            }

            for field in read.iter() {
                if *field != "artifacts" && !declared.contains(field) && !step.output_schema.is_null()
                {
                    advisories.push(format!(
                        "field '{}' of step '{}' is read downstream but not required by its schema",
                        field, step.name
                    ));
                }
            }
        }

        advisories.sort();
        advisories
    }
}

/// One entry in a process pipeline: a step or a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineItem {
    /// Human-review suspension point
    Checkpoint { checkpoint: CheckpointSpec },

    /// A delegated task execution
    Step(StepSpec),
}

/// Declarative checkpoint: pause the run and surface a summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSpec {
    /// Display title
    pub title: String,

    /// Prompt presented to the reviewer (required, non-empty)
    pub question: String,

    /// Arbitrary serializable summary context
    #[serde(default)]
    pub context: Value,

    /// Whether to attach the accumulated artifact list
    #[serde(default = "default_true")]
    pub include_artifacts: bool,
}

fn default_true() -> bool {
    true
}

/// A single step in a process pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name (unique within the process)
    pub name: String,

    /// Display title (defaults to the name)
    #[serde(default)]
    pub title: Option<String>,

    /// Prompt block for the external agent
    pub agent: AgentPrompt,

    /// Classification labels
    #[serde(default)]
    pub labels: Vec<String>,

    /// How to assemble this step's args (arg name -> binding)
    #[serde(default)]
    pub inputs: BTreeMap<String, InputBinding>,

    /// JSON-Schema-like contract the result must satisfy
    #[serde(default)]
    pub output_schema: Value,

    /// Only execute when a prior step's field equals a value
    #[serde(default)]
    pub when: Option<WhenClause>,

    /// Retry policy for this step (default: single attempt)
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Override timeout for this step (uses limits.step_timeout_seconds if not set)
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl StepSpec {
    /// Display title, falling back to the step name
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Get the effective timeout for this step
    pub fn timeout(&self, limits: &RunLimits) -> Duration {
        let seconds = self.timeout_seconds.unwrap_or(limits.step_timeout_seconds);
        Duration::from_secs(seconds)
    }
}

/// Source of one argument of a step
///
/// Supports multiple YAML formats:
/// - Process input: `problem: { input: problem }`
/// - Prior step field: `model: { step: formulate, field: model }`
/// - Full prior result: `upstream: { step: formulate }`
/// - Literal: `solver: { value: "glpk" }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputBinding {
    /// A named process input
    ProcessInput { input: String },

    /// One field of a prior step's result
    StepField { step: String, field: String },

    /// A prior step's entire result object
    StepResult { step: String },

    /// A literal value
    Literal { value: Value },
}

impl InputBinding {
    /// The prior step this binding reads from, if any
    pub fn referenced_step(&self) -> Option<&str> {
        match self {
            InputBinding::StepField { step, .. } | InputBinding::StepResult { step } => {
                Some(step.as_str())
            }
            _ => None,
        }
    }
}

/// Conditional gate on a prior step's result field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhenClause {
    /// Prior step to inspect
    pub step: String,

    /// Field of that step's result
    pub field: String,

    /// Value the field must equal for the step to run
    pub equals: Value,
}

/// Retry policy for failed steps.
///
/// The default is a single attempt: step failures are fatal to the run
/// unless a process opts in to retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms);
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);

        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Reference to one field of one step's result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRef {
    /// Step whose result is projected
    pub step: String,

    /// Field of that result
    pub field: String,
}

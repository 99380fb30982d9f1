//! Task descriptors: declarative units of delegated work.
//!
//! A descriptor pairs a task name with the prompt the external agent
//! receives, the schema its result must satisfy, and the fixed on-disk
//! I/O locations for the invocation. Descriptors are pure data: building
//! one performs no I/O.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured prompt for the external agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPrompt {
    /// Capability/role the agent should assume (e.g., "operations-research analyst")
    pub role: String,

    /// One-line statement of the task
    pub task: String,

    /// Ordered instruction list
    #[serde(default)]
    pub instructions: Vec<String>,

    /// Hint about the expected output format (e.g., "json")
    #[serde(default)]
    pub output_format: Option<String>,
}

/// Input/output storage locations for one task invocation.
///
/// Paths are relative to the run directory and derived deterministically
/// from the invocation's effect id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIo {
    /// Where the caller-assembled args are persisted
    pub input_json_path: String,

    /// Where the agent's result is persisted
    pub output_json_path: String,
}

impl TaskIo {
    /// Derive the I/O paths for an effect id
    pub fn for_effect(effect_id: &str) -> Self {
        Self {
            input_json_path: format!("tasks/{}/input.json", effect_id),
            output_json_path: format!("tasks/{}/result.json", effect_id),
        }
    }
}

/// Per-invocation context supplied to the descriptor factory
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// The run this invocation belongs to
    pub run_id: Uuid,

    /// Unique identifier for this invocation (drives the I/O paths)
    pub effect_id: String,
}

impl TaskContext {
    /// Create a context with a fresh effect id
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            effect_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a context with an explicit effect id
    pub fn with_effect_id(run_id: Uuid, effect_id: impl Into<String>) -> Self {
        Self {
            run_id,
            effect_id: effect_id.into(),
        }
    }
}

/// A declarative unit of delegated work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Task name (unique within a process)
    pub name: String,

    /// Display title
    pub title: String,

    /// Prompt for the external agent
    pub agent: AgentPrompt,

    /// JSON-Schema-like output contract (`type`, `required`, `properties`)
    pub output_schema: serde_json::Value,

    /// I/O locations for this invocation
    pub io: TaskIo,

    /// Classification labels (insertion order irrelevant)
    #[serde(default)]
    pub labels: Vec<String>,
}

impl TaskDescriptor {
    /// Build a descriptor for one invocation.
    ///
    /// Pure: identical inputs produce identical titles, schemas, and I/O
    /// paths. No side effects occur until the runner executes the task.
    pub fn build(
        name: impl Into<String>,
        title: impl Into<String>,
        agent: AgentPrompt,
        output_schema: serde_json::Value,
        labels: Vec<String>,
        ctx: &TaskContext,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            agent,
            output_schema,
            io: TaskIo::for_effect(&ctx.effect_id),
            labels,
        }
    }

    /// Field names listed in `output_schema.required`
    pub fn required_fields(&self) -> Vec<&str> {
        self.output_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

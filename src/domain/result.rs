//! Results produced by pipeline steps and processes.
//!
//! A step yields a dynamically-shaped result object (validated against the
//! step's declared output schema before use). Artifacts referenced by step
//! results accumulate, append-only and in step order, into the run's
//! artifact list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reference to an external document produced by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Path to the document (storage layout is the runtime's concern)
    pub path: String,

    /// Optional format hint (e.g., "json", "csv", "md")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Artifact {
    /// Create an artifact reference with no format hint
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: None,
        }
    }

    /// Attach a format hint
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Extract artifact references from a step result.
///
/// Steps report artifacts under an `artifacts` field, either as bare path
/// strings or as `{path, format}` objects. Anything else is ignored; the
/// schema gate is responsible for shape complaints.
pub fn collect_artifacts(result: &Value) -> Vec<Artifact> {
    let Some(entries) = result.get("artifacts").and_then(|a| a.as_array()) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(path) => Some(Artifact::new(path.clone())),
            Value::Object(_) => serde_json::from_value(entry.clone()).ok(),
            _ => None,
        })
        .collect()
}

/// Metadata attached to a terminal process result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessMetadata {
    /// The run that produced this result
    pub run_id: Uuid,

    /// Name of the process definition
    pub process: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Echo of the inputs the run was invoked with
    pub inputs: Value,
}

/// Terminal return value of a process run.
///
/// Aggregates the curated output projection, the full artifact list, and
/// run metadata. Failures are data, not panics: a failed run returns
/// `success: false` with `error`/`details` populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Whether the run completed without a fatal error
    pub success: bool,

    /// Curated subset of step fields, per the process `outputs` projection
    pub outputs: serde_json::Map<String, Value>,

    /// Every artifact reported by every executed step, in step order
    pub artifacts: Vec<Artifact>,

    /// Wall-clock duration of the run in milliseconds
    pub duration_ms: u64,

    /// Run metadata
    pub metadata: ProcessMetadata,

    /// Error summary when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured failure details when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

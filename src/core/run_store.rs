//! Append-only run store with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity and
//! easy inspection. Task inputs and results live under the run directory
//! at the fixed layout every descriptor declares:
//! `tasks/{effect_id}/input.json` and `tasks/{effect_id}/result.json`.
//! Completed step results are additionally mirrored at
//! `results/{step_name}.json` so resumed runs can reload them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Event, EventType};

/// File-based run store using JSONL events plus JSON task io
pub struct RunStore {
    /// Directory containing the run
    run_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Path to the mirrored step results directory
    results_dir: PathBuf,
}

impl RunStore {
    /// Create or open a run store under the configured runs directory
    pub async fn open(run_id: Uuid) -> Result<Self> {
        let base_dir = crate::config::runs_dir()?;
        Self::open_in(&base_dir, run_id).await
    }

    /// Create or open a run store under an explicit base directory
    pub async fn open_in(base_dir: &Path, run_id: Uuid) -> Result<Self> {
        let run_dir = base_dir.join(run_id.to_string());
        let results_dir = run_dir.join("results");

        fs::create_dir_all(&results_dir).await.with_context(|| {
            format!("Failed to create results directory: {}", results_dir.display())
        })?;

        let events_path = run_dir.join("events.jsonl");

        Ok(Self {
            run_dir,
            events_path,
            results_dir,
        })
    }

    /// Get the run directory
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Persist a JSON document at a path relative to the run directory.
    ///
    /// Used for the descriptor-declared task io paths.
    pub async fn write_json(&self, relative_path: &str, value: &Value) -> Result<PathBuf> {
        let path = self.run_dir.join(relative_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write: {}", path.display()))?;

        Ok(path)
    }

    /// Mirror a completed step result for resume reconstruction
    pub async fn store_step_result(&self, step_name: &str, result: &Value) -> Result<PathBuf> {
        let path = self.results_dir.join(format!("{}.json", step_name));

        let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write step result: {}", path.display()))?;

        Ok(path)
    }

    /// Load a mirrored step result, if present
    pub async fn load_step_result(&self, step_name: &str) -> Result<Option<Value>> {
        let path = self.results_dir.join(format!("{}.json", step_name));

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read step result: {}", path.display()))?;

        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse step result: {}", path.display()))?;

        Ok(Some(value))
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Check if a step is already completed (idempotency check)
    pub async fn is_step_completed(&self, idempotency_key: &str) -> Result<bool> {
        let events = self.replay().await?;

        let completed = events.iter().any(|e| {
            e.idempotency_key == idempotency_key
                && matches!(e.event_type, EventType::StepCompleted)
        });

        Ok(completed)
    }

    /// List all run IDs under the configured runs directory
    pub async fn list_runs() -> Result<Vec<Uuid>> {
        let base_dir = crate::config::runs_dir()?;
        Self::list_runs_in(&base_dir).await
    }

    /// List all run IDs under an explicit base directory
    pub async fn list_runs_in(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        runs.push(uuid);
                    }
                }
            }
        }

        Ok(runs)
    }
}

/// Generate an idempotency key for a step invocation
pub fn generate_idempotency_key(run_id: Uuid, step_name: &str, args_json: &str) -> String {
    let args_hash = hash_args(args_json);
    format!("{}:{}:{}", run_id, step_name, args_hash)
}

/// Hash serialized step args (first 16 hex chars of SHA-256)
pub fn hash_args(args_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(args_json.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

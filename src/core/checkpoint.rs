//! Checkpoint gates: human-in-the-loop suspension points.
//!
//! A checkpoint presents accumulated results to a reviewer and blocks the
//! run until resumed. The reviewer's response is never branched on by the
//! process itself; a gate either resumes the run or aborts it. Blocking
//! forever is the default, with an optional timeout plus resume policy
//! for unattended operation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::Artifact;

/// Ephemeral request presented to the reviewer at a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRequest {
    /// Display title
    pub title: String,

    /// Prompt to the reviewer (required, non-empty)
    pub question: String,

    /// Arbitrary serializable summary context
    pub context: Value,

    /// Artifacts accumulated so far, when the checkpoint includes them
    pub artifacts: Vec<Artifact>,
}

/// What to do when a gate's timeout expires without a resume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Resume the run as if the reviewer had approved
    Approve,

    /// Fail the run
    Abort,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::Abort
    }
}

/// Checkpoint failures
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint '{0}' timed out awaiting review")]
    TimedOut(String),

    #[error("checkpoint '{0}' aborted")]
    Aborted(String),

    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for checkpoint gates
#[async_trait]
pub trait CheckpointGate: Send + Sync {
    /// Human-readable gate name
    fn name(&self) -> &str;

    /// Present the request and block until the run may proceed
    async fn review(&self, request: &CheckpointRequest) -> Result<(), CheckpointError>;
}

/// Gate that resumes immediately, logging the request.
///
/// Used for unattended runs (`--yes`) and as the test default.
pub struct AutoApproveGate;

#[async_trait]
impl CheckpointGate for AutoApproveGate {
    fn name(&self) -> &str {
        "auto-approve"
    }

    async fn review(&self, request: &CheckpointRequest) -> Result<(), CheckpointError> {
        info!(
            checkpoint = %request.title,
            artifacts = request.artifacts.len(),
            "Checkpoint auto-approved"
        );
        Ok(())
    }
}

/// Gate that prints the request to stdout and waits for a line on stdin.
///
/// Any input resumes the run; the response content is not inspected.
/// With a timeout configured, expiry applies the resume policy.
pub struct ConsoleGate {
    timeout: Option<Duration>,
    on_timeout: ResumePolicy,
}

impl Default for ConsoleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleGate {
    /// Create a gate that blocks indefinitely
    pub fn new() -> Self {
        Self {
            timeout: None,
            on_timeout: ResumePolicy::Abort,
        }
    }

    /// Add a timeout and the policy applied when it expires
    pub fn with_timeout(mut self, timeout: Duration, on_timeout: ResumePolicy) -> Self {
        self.timeout = Some(timeout);
        self.on_timeout = on_timeout;
        self
    }

    fn print_request(request: &CheckpointRequest) {
        println!();
        println!("=== Checkpoint: {} ===", request.title);
        println!("{}", request.question);

        if !request.context.is_null() {
            if let Ok(pretty) = serde_json::to_string_pretty(&request.context) {
                println!("\nContext:\n{}", pretty);
            }
        }

        if !request.artifacts.is_empty() {
            println!("\nArtifacts:");
            for artifact in &request.artifacts {
                match &artifact.format {
                    Some(format) => println!("  - {} ({})", artifact.path, format),
                    None => println!("  - {}", artifact.path),
                }
            }
        }

        println!("\nPress Enter to resume the run.");
    }

    async fn wait_for_input() -> Result<(), CheckpointError> {
        // stdin has no async story worth the trouble here
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| ())
        })
        .await
        .map_err(|e| CheckpointError::Io(std::io::Error::other(e)))?
        .map_err(CheckpointError::Io)
    }
}

#[async_trait]
impl CheckpointGate for ConsoleGate {
    fn name(&self) -> &str {
        "console"
    }

    async fn review(&self, request: &CheckpointRequest) -> Result<(), CheckpointError> {
        Self::print_request(request);

        match self.timeout {
            None => Self::wait_for_input().await,
            Some(limit) => match tokio::time::timeout(limit, Self::wait_for_input()).await {
                Ok(result) => result,
                Err(_) => match self.on_timeout {
                    ResumePolicy::Approve => {
                        warn!(
                            checkpoint = %request.title,
                            "Checkpoint review timed out; resuming per policy"
                        );
                        Ok(())
                    }
                    ResumePolicy::Abort => Err(CheckpointError::TimedOut(request.title.clone())),
                },
            },
        }
    }
}

//! Executor interfaces for the external agent.
//!
//! The actual analysis behind every task is delegated to an external
//! agent. Executors provide a unified interface for handing a descriptor
//! and its args to that agent and getting a JSON result back.

pub mod prompt;
pub mod subprocess;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::domain::TaskDescriptor;

// Re-export the subprocess executor
pub use subprocess::SubprocessAgent;

/// Trait for external agent executors
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Human-readable executor name
    fn name(&self) -> &str;

    /// Execute one task invocation.
    ///
    /// Returns the agent's raw result object; schema conformance is the
    /// runner's concern, not the executor's.
    async fn execute(
        &self,
        descriptor: &TaskDescriptor,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value>;

    /// Health check (is the agent reachable/runnable)
    async fn health_check(&self) -> Result<()>;
}

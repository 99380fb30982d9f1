//! Subprocess executor: delegates tasks to an external agent CLI.
//!
//! Spawns the configured command, pipes the rendered prompt to its stdin,
//! and parses the first JSON value out of stdout. One process per task,
//! prompt in, JSON out.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::TaskDescriptor;

use super::prompt::{parse_agent_output, render_prompt, DEFAULT_TEMPLATE};
use super::AgentExecutor;

/// Agent executor using subprocess mode
pub struct SubprocessAgent {
    /// Command to spawn (e.g., an agent CLI)
    command: String,

    /// Extra arguments passed to the command
    args: Vec<String>,

    /// Prompt template; falls back to the built-in one
    template: Option<String>,
}

impl SubprocessAgent {
    /// Create an executor for a command with arguments
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            template: None,
        }
    }

    /// Use a custom prompt template instead of the built-in one
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// The command this executor spawns
    pub fn command(&self) -> &str {
        &self.command
    }

    async fn execute_subprocess(
        &self,
        descriptor: &TaskDescriptor,
        args: &Value,
        step_timeout: Duration,
    ) -> Result<String> {
        let template = self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE);
        let prompt = render_prompt(template, descriptor, args);

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to spawn agent process '{}' for task '{}'",
                    self.command, descriptor.name
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .context("Failed to write prompt to agent stdin")?;
            // Drop stdin to signal EOF
        }

        let output = timeout(step_timeout, child.wait_with_output())
            .await
            .with_context(|| {
                format!(
                    "Task '{}' timed out after {:?}",
                    descriptor.name, step_timeout
                )
            })?
            .with_context(|| format!("Failed to wait for agent process for task '{}'", descriptor.name))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Task '{}' failed: agent exited with code {}: {}",
                descriptor.name,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("Agent output is not valid UTF-8")?;

        Ok(stdout)
    }
}

#[async_trait]
impl AgentExecutor for SubprocessAgent {
    fn name(&self) -> &str {
        "subprocess"
    }

    async fn execute(
        &self,
        descriptor: &TaskDescriptor,
        args: &Value,
        timeout: Duration,
    ) -> Result<Value> {
        let stdout = self.execute_subprocess(descriptor, args, timeout).await?;
        parse_agent_output(&stdout)
    }

    async fn health_check(&self) -> Result<()> {
        let output = Command::new(&self.command)
            .arg("--help")
            .output()
            .await
            .with_context(|| format!("Failed to run agent health check for '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Agent health check failed: {}", stderr);
        }

        Ok(())
    }
}

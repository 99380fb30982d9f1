//! Run limits and enforcement for process execution.
//!
//! Prevents runaway execution through configurable limits on:
//! - Number of steps
//! - Input/output sizes
//! - Step and run timeouts

use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Limits for process execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLimits {
    /// Maximum number of steps per run (default: 50)
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum serialized step-input size in bytes (default: 10MB)
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,

    /// Maximum serialized step-result size in bytes (default: 10MB)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,

    /// Per-step timeout in seconds (default: 300 = 5 min)
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,

    /// Total run timeout in seconds (default: 3600 = 1 hour)
    #[serde(default = "default_run_timeout")]
    pub run_timeout_seconds: u64,
}

fn default_max_steps() -> u32 {
    50
}
fn default_max_input_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_max_output_bytes() -> u64 {
    10 * 1024 * 1024
} // 10MB
fn default_step_timeout() -> u64 {
    300
} // 5 min
fn default_run_timeout() -> u64 {
    3600
} // 1 hour

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_input_bytes: default_max_input_bytes(),
            max_output_bytes: default_max_output_bytes(),
            step_timeout_seconds: default_step_timeout(),
            run_timeout_seconds: default_run_timeout(),
        }
    }
}

impl RunLimits {
    /// Validate a serialized step input against the size limit
    pub fn validate_input(&self, input: &str) -> Result<(), LimitViolation> {
        let size = input.len() as u64;
        if size > self.max_input_bytes {
            return Err(LimitViolation::MaxInputBytes {
                actual: size,
                limit: self.max_input_bytes,
            });
        }
        Ok(())
    }

    /// Validate a serialized step result against the size limit
    pub fn validate_output(&self, output: &str) -> Result<(), LimitViolation> {
        let size = output.len() as u64;
        if size > self.max_output_bytes {
            return Err(LimitViolation::MaxOutputBytes {
                actual: size,
                limit: self.max_output_bytes,
            });
        }
        Ok(())
    }

    /// Check current tracker state against limits
    pub fn check(&self, tracker: &RunTracker) -> Result<(), LimitViolation> {
        if tracker.steps_executed >= self.max_steps {
            return Err(LimitViolation::MaxSteps {
                actual: tracker.steps_executed,
                limit: self.max_steps,
            });
        }

        let elapsed = tracker.started_at.elapsed().as_secs();
        if elapsed >= self.run_timeout_seconds {
            return Err(LimitViolation::RunTimeout {
                elapsed_seconds: elapsed,
                limit_seconds: self.run_timeout_seconds,
            });
        }

        Ok(())
    }
}

/// Tracks resource usage during a run
#[derive(Debug, Clone)]
pub struct RunTracker {
    /// Number of steps executed
    pub steps_executed: u32,

    /// Total input bytes processed
    pub input_bytes: u64,

    /// Total output bytes produced
    pub output_bytes: u64,

    /// When the run started
    pub started_at: Instant,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    /// Create a new tracker
    pub fn new() -> Self {
        Self {
            steps_executed: 0,
            input_bytes: 0,
            output_bytes: 0,
            started_at: Instant::now(),
        }
    }

    /// Record a step execution
    pub fn record_step(&mut self, input_bytes: u64, output_bytes: u64) {
        self.steps_executed += 1;
        self.input_bytes += input_bytes;
        self.output_bytes += output_bytes;
    }

    /// Get elapsed time in seconds
    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Limit violation errors
#[derive(Debug, Clone, Error)]
pub enum LimitViolation {
    #[error("Maximum steps exceeded: {actual} >= {limit}")]
    MaxSteps { actual: u32, limit: u32 },

    #[error("Maximum input bytes exceeded: {actual} > {limit}")]
    MaxInputBytes { actual: u64, limit: u64 },

    #[error("Maximum output bytes exceeded: {actual} > {limit}")]
    MaxOutputBytes { actual: u64, limit: u64 },

    #[error("Run timeout: {elapsed_seconds}s >= {limit_seconds}s")]
    RunTimeout {
        elapsed_seconds: u64,
        limit_seconds: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = RunLimits::default();
        assert_eq!(limits.max_steps, 50);
        assert_eq!(limits.max_input_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.step_timeout_seconds, 300);
        assert_eq!(limits.run_timeout_seconds, 3600);
    }

    #[test]
    fn test_input_validation() {
        let limits = RunLimits {
            max_input_bytes: 100,
            ..Default::default()
        };

        assert!(limits.validate_input("short").is_ok());

        let long_input = "x".repeat(200);
        let result = limits.validate_input(&long_input);
        assert!(matches!(result, Err(LimitViolation::MaxInputBytes { .. })));
    }

    #[test]
    fn test_output_validation() {
        let limits = RunLimits {
            max_output_bytes: 10,
            ..Default::default()
        };

        assert!(limits.validate_output("ok").is_ok());
        assert!(matches!(
            limits.validate_output("much too long for the limit"),
            Err(LimitViolation::MaxOutputBytes { .. })
        ));
    }

    #[test]
    fn test_tracker_step_counting() {
        let limits = RunLimits {
            max_steps: 2,
            ..Default::default()
        };

        let mut tracker = RunTracker::new();
        assert!(limits.check(&tracker).is_ok());

        tracker.record_step(100, 100);
        assert!(limits.check(&tracker).is_ok());

        tracker.record_step(100, 100);
        let result = limits.check(&tracker);
        assert!(matches!(result, Err(LimitViolation::MaxSteps { .. })));
    }

    #[test]
    fn test_tracker_elapsed() {
        let tracker = RunTracker::new();
        assert!(tracker.elapsed_seconds() < 1);
    }
}

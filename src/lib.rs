//! taskline - Journaled multi-agent process runner
//!
//! A Rust orchestrator for linear agent pipelines with human checkpoints,
//! using subprocess agents as the execution backend.
//!
//! # Architecture
//!
//! The system is built around event journaling:
//! - All state changes are recorded as immutable events
//! - Current state is derived by replaying events
//! - Interrupted runs can be resumed from the last completed step
//!
//! Every step executes against a task descriptor with a deterministic io
//! layout (`tasks/{effect_id}/input.json` and `tasks/{effect_id}/result.json`)
//! and every result passes a schema gate before later steps can read it.
//!
//! # Modules
//!
//! - `agent`: Agent execution (prompt rendering, subprocess backend)
//! - `core`: Orchestration logic (RunStore, ProcessSpec, Limits, Checkpoints)
//! - `domain`: Data structures (TaskDescriptor, Event, Run, ProcessResult)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run a process
//! taskline run forecast --inputs inputs.json
//!
//! # Check run status
//! taskline status <run-id>
//!
//! # Resume an interrupted run
//! taskline resume <run-id> forecast --inputs inputs.json
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{
    AutoApproveGate, CheckpointGate, CheckpointRequest, ConsoleGate, ProcessRunner, ProcessSpec,
    ResumePolicy, RunLimits, RunStore, SchemaViolation,
};
pub use domain::{
    Artifact, Event, EventType, ProcessResult, Run, RunState, TaskContext, TaskDescriptor,
};

pub use agent::{AgentExecutor, SubprocessAgent};

//! Core orchestration logic.
//!
//! This module contains:
//! - RunStore: Append-only event journal plus task io persistence
//! - ProcessSpec: Process definitions and loading
//! - Schema: Result validation gate
//! - Limits: Run limits and enforcement
//! - Checkpoint: Human review gates
//! - ProcessRunner: Main execution engine

pub mod checkpoint;
pub mod limits;
pub mod process;
pub mod run_store;
pub mod runner;
pub mod schema;

// Re-export commonly used types
pub use checkpoint::{
    AutoApproveGate, CheckpointError, CheckpointGate, CheckpointRequest, ConsoleGate, ResumePolicy,
};
pub use limits::{LimitViolation, RunLimits, RunTracker};
pub use process::{
    CheckpointSpec, FieldRef, InputBinding, PipelineItem, ProcessSpec, RetryPolicy, StepSpec,
    WhenClause,
};
pub use run_store::{generate_idempotency_key, hash_args, RunStore};
pub use runner::ProcessRunner;
pub use schema::{validate_result, SchemaViolation};

//! Domain types for the taskline orchestrator.
//!
//! This module contains the core data structures:
//! - Descriptor: declarative task records and their I/O contract
//! - Events: Immutable records of state changes
//! - Run: Process execution state
//! - Result: Artifacts and terminal process results

pub mod descriptor;
pub mod events;
pub mod result;
pub mod run;

// Re-export commonly used types
pub use descriptor::{AgentPrompt, TaskContext, TaskDescriptor, TaskIo};
pub use events::{Event, EventType, StepStatus};
pub use result::{collect_artifacts, Artifact, ProcessMetadata, ProcessResult};
pub use run::{Run, RunState};

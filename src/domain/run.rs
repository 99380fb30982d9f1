//! Run state and reconstruction from events.
//!
//! A Run represents a single execution of a process definition.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StepStatus};

/// A process execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub id: Uuid,

    /// Name of the process being executed
    pub process_name: String,

    /// Current state of the run
    pub state: RunState,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run completed (if applicable)
    pub completed_at: Option<DateTime<Utc>>,

    /// Index of the current pipeline item
    pub current_step: usize,

    /// Number of checkpoints reached so far
    pub checkpoints_reached: usize,

    /// Status of each step (step_name -> status)
    pub step_statuses: HashMap<String, StepStatus>,
}

impl Run {
    /// Create a new run for a process
    pub fn new(id: Uuid, process_name: String) -> Self {
        Self {
            id,
            process_name,
            state: RunState::Running,
            started_at: Utc::now(),
            completed_at: None,
            current_step: 0,
            checkpoints_reached: 0,
            step_statuses: HashMap::new(),
        }
    }

    /// Reconstruct run state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut run = Self {
            id: first_event.run_id,
            process_name: String::new(),
            state: RunState::Running,
            started_at: first_event.timestamp,
            completed_at: None,
            current_step: 0,
            checkpoints_reached: 0,
            step_statuses: HashMap::new(),
        };

        for event in events {
            run.apply_event(event);
        }

        Some(run)
    }

    /// Apply a single event to update run state
    pub fn apply_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::RunStarted => {
                self.state = RunState::Running;
                self.started_at = event.timestamp;
            }
            EventType::RunCompleted => {
                self.state = RunState::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::RunFailed => {
                self.state = RunState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StepStarted => {
                if let Some(ref step_id) = event.step_id {
                    self.step_statuses
                        .insert(step_id.clone(), StepStatus::Running);
                }
            }
            EventType::StepCompleted => {
                if let Some(ref step_id) = event.step_id {
                    self.step_statuses
                        .insert(step_id.clone(), StepStatus::Completed);
                    self.current_step += 1;
                }
            }
            EventType::StepFailed => {
                if let Some(ref step_id) = event.step_id {
                    self.step_statuses
                        .insert(step_id.clone(), StepStatus::Failed);
                }
            }
            EventType::StepRetrying => {
                if let Some(ref step_id) = event.step_id {
                    self.step_statuses
                        .insert(step_id.clone(), StepStatus::Running);
                }
            }
            EventType::StepSkipped => {
                if let Some(ref step_id) = event.step_id {
                    self.step_statuses
                        .insert(step_id.clone(), StepStatus::Skipped);
                    self.current_step += 1;
                }
            }
            EventType::CheckpointReached => {
                self.checkpoints_reached += 1;
            }
            EventType::CheckpointResumed => {}
            EventType::LimitReached => {
                self.state = RunState::LimitReached {
                    limit: event.error.clone().unwrap_or_default(),
                };
                self.completed_at = Some(event.timestamp);
            }
        }
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.state, RunState::Running)
    }

    /// Check if the run has completed (successfully or not)
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Check if a specific step is completed
    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.step_statuses
            .get(step_name)
            .map(|s| *s == StepStatus::Completed)
            .unwrap_or(false)
    }
}

/// State of a process run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunState {
    /// Currently executing
    Running,

    /// Completed successfully
    Completed,

    /// Failed with error
    Failed { error: String },

    /// A run limit was reached
    LimitReached { limit: String },
}

impl Default for RunState {
    fn default() -> Self {
        Self::Running
    }
}

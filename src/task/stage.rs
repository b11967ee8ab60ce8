//! Per-task progress through one run.
//!
//! # State Machine
//! ```text
//! Pending -> Sampling -> Sampled ------> Reasoning -> Done
//!        \           \-> SampleFailed -/           \-> ReasoningFailed
//!         \           \-> Failed
//!          \-> Reasoning            (reason-only runs)
//!           \-> Failed              (evidence or attempts missing)
//!
//! Sampled | SampleFailed -> Done   (sample-only runs)
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Selected but not started
    Pending,
    /// Attempt calls in flight
    Sampling,
    /// Every attempt produced a usable answer
    Sampled,
    /// At least one attempt failed; usable attempts may remain
    SampleFailed,
    /// The reasoning call is in flight
    Reasoning,
    /// Reasoning call returned
    Done,
    /// Reasoning call failed
    ReasoningFailed,
    /// Short-circuited before reasoning
    Failed,
}

impl TaskStage {
    /// # Property
    /// `is_terminal() => no outgoing transition`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStage::Done | TaskStage::ReasoningFailed | TaskStage::Failed
        )
    }

    pub fn can_transition_to(&self, next: TaskStage) -> bool {
        use TaskStage::*;
        matches!(
            (self, next),
            (Pending, Sampling)
                | (Pending, Reasoning)
                | (Pending, Failed)
                | (Sampling, Sampled)
                | (Sampling, SampleFailed)
                | (Sampled, Reasoning)
                | (Sampled, Done)
                | (SampleFailed, Reasoning)
                | (SampleFailed, Failed)
                | (SampleFailed, Done)
                | (Reasoning, Done)
                | (Reasoning, ReasoningFailed)
        )
    }
}

/// Tracks one task's stage and rejects illegal moves.
#[derive(Debug, Clone)]
pub struct StageTracker {
    stage: TaskStage,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            stage: TaskStage::Pending,
        }
    }

    pub fn stage(&self) -> TaskStage {
        self.stage
    }

    /// # Errors
    /// Returns `StageError::InvalidTransition` if `next` is not reachable.
    pub fn advance(&mut self, next: TaskStage) -> Result<(), StageError> {
        if self.stage.can_transition_to(next) {
            self.stage = next;
            Ok(())
        } else {
            Err(StageError::InvalidTransition {
                from: self.stage,
                to: next,
            })
        }
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("Invalid stage transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskStage, to: TaskStage },
}

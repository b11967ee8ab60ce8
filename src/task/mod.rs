//! Task module - task identity, attempts, results and per-task stages.
//!
//! Values here are plain data: constructors enforce the invariants and no
//! function performs IO.

mod attempt;
mod record;
mod stage;
pub mod task;

pub use attempt::{Attempt, FailureKind, FinalAnswer};
pub use record::{AttemptRecord, TaskResult};
pub use stage::{StageError, StageTracker, TaskStage};
pub use task::{Task, TaskId};

//! # Scene Consensus
//!
//! Consensus inference for multiple-choice questions about short driving
//! clips: several independent vision attempts per question, then one
//! reasoning pass that converges on a single answer.
//!
//! This library provides:
//! - A bounded dispatcher shared by every remote call of a run
//! - Multi-attempt sampling and a cross-attempt consensus reasoner
//! - Answer extraction into a closed label set
//! - Gap detection over the result directory for backfill runs
//!
//! ## Architecture
//!
//! ```text
//!   questions.csv ──► Pipeline ──────────────────────────► final_answers/
//!                        │                                      │
//!          frames ──► Sampler ──┐                               │
//!                               ├──► Dispatcher ──► endpoint    │
//!          attempts ─► Reasoner ┘    (K slots)                  │
//!                                                               ▼
//!                        RunSelection ◄──── Gap detector ◄──────┘
//! ```
//!
//! ## Task Flow
//! 1. Read tasks and filter by the run selection
//! 2. Sample N attempts per task through the dispatcher
//! 3. Reason over the usable attempts with one call
//! 4. Write one result per task, then report ids still lacking a label
//!
//! ## Modules
//! - `pipeline`: Per-task stage machine and the run report
//! - `dispatch`: Concurrency gate with per-call deadlines
//! - `llm`: Chat-completions client abstraction
//! - `gaps`: Gap detection, selections and CSV export

pub mod answer;
pub mod config;
pub mod dispatch;
pub mod evidence;
pub mod gaps;
pub mod llm;
pub mod pipeline;
pub mod prompts;
pub mod reasoner;
pub mod sampler;
pub mod source;
pub mod store;
pub mod task;
pub mod util;

pub use config::Config;
pub use gaps::RunSelection;
pub use pipeline::{Pipeline, RunMode, RunReport};

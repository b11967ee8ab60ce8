//! Pipeline driver: runs the selected tasks through sampling and reasoning.
//!
//! # State Machine
//!
//! ```text
//! Pending ──► Sampling ──► Sampled ──────┐
//!    │            │                      ├──► Reasoning ──► Done
//!    │            └──────► SampleFailed ─┘         │
//!    │                          │                  └──► ReasoningFailed
//!    └──────────────────────────┴──► Failed
//! ```
//!
//! A reason-only run starts at `Pending ──► Reasoning` from stored attempts.
//!
//! # Invariants
//! - A task outside the selection is never loaded, sampled or reasoned about
//! - The reasoner is called once per task with usable attempts, never otherwise
//! - A task is counted complete only after its record has been written

use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::evidence::EvidenceProvider;
use crate::gaps::RunSelection;
use crate::llm::{ChatOptions, LlmClient};
use crate::reasoner::{ConsensusReasoner, ReasonerError};
use crate::sampler::AttemptSampler;
use crate::store::{AttemptStore, ResultSink, StoreError};
use crate::task::{
    Attempt, AttemptRecord, FailureKind, StageError, StageTracker, Task, TaskId, TaskResult,
    TaskStage,
};

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Sample, then reason
    Full,
    /// Sample and store attempt records only
    SampleOnly,
    /// Reason over previously stored attempt records
    ReasonOnly,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::SampleOnly => write!(f, "sample-only"),
            RunMode::ReasonOnly => write!(f, "reason-only"),
        }
    }
}

/// Tunables for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub sampler_model: String,
    pub reasoner_model: String,
    pub sampler_options: ChatOptions,
    pub reasoner_options: ChatOptions,
    pub max_concurrent_requests: usize,
    pub call_timeout: Duration,
    pub attempts_per_task: usize,
    pub task_parallelism: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Reasoner(#[from] ReasonerError),
}

/// How one task ended.
#[derive(Debug, Clone, PartialEq)]
enum TaskOutcome {
    Labelled,
    /// Sample-only run stored at least one usable attempt
    Sampled,
    Failed { kind: FailureKind, retryable: bool },
}

impl TaskOutcome {
    fn from_result(result: &TaskResult) -> Self {
        match result.failure {
            None => TaskOutcome::Labelled,
            Some(kind) => TaskOutcome::Failed {
                kind,
                retryable: result.is_retryable(),
            },
        }
    }
}

/// Summary of a run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Ids that ended without a label (or, sample-only, without usable attempts)
    pub failed_ids: Vec<TaskId>,
    /// Failed ids whose failure was transient
    pub retryable_ids: Vec<TaskId>,
    /// Selected ids that the task source does not contain
    pub unknown_ids: Vec<TaskId>,
    pub peak_in_flight: usize,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run {} ({})", self.run_id, self.mode)?;
        writeln!(
            f,
            "  {} attempted, {} succeeded, {} failed in {:.1}s (peak {} calls in flight)",
            self.attempted,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64(),
            self.peak_in_flight
        )?;
        if !self.failed_ids.is_empty() {
            writeln!(f, "  Without answer: {}", join_ids(&self.failed_ids))?;
        }
        if !self.retryable_ids.is_empty() {
            writeln!(f, "  Worth a backfill: {}", join_ids(&self.retryable_ids))?;
        }
        if !self.unknown_ids.is_empty() {
            writeln!(f, "  Not in task source: {}", join_ids(&self.unknown_ids))?;
        }
        Ok(())
    }
}

/// Drives one run. Build a new pipeline per run so the dispatcher, and with
/// it the concurrency accounting, is fresh.
pub struct Pipeline {
    run_id: Uuid,
    settings: PipelineSettings,
    dispatcher: Dispatcher,
    sampler: AttemptSampler,
    reasoner: ConsensusReasoner,
    evidence: Arc<dyn EvidenceProvider>,
    attempts: AttemptStore,
    results: Arc<dyn ResultSink>,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        client: Arc<dyn LlmClient>,
        evidence: Arc<dyn EvidenceProvider>,
        attempts: AttemptStore,
        results: Arc<dyn ResultSink>,
    ) -> Self {
        let dispatcher = Dispatcher::new(settings.max_concurrent_requests, settings.call_timeout);
        let sampler = AttemptSampler::new(
            client.clone(),
            dispatcher.clone(),
            settings.sampler_model.clone(),
            settings.sampler_options.clone(),
        );
        let reasoner = ConsensusReasoner::new(
            client,
            dispatcher.clone(),
            settings.reasoner_model.clone(),
            settings.reasoner_options.clone(),
        );
        Self {
            run_id: Uuid::new_v4(),
            settings,
            dispatcher,
            sampler,
            reasoner,
            evidence,
            attempts,
            results,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run every task in `tasks` that `selection` includes.
    ///
    /// Individual task failures are recorded and counted; they never abort
    /// the batch.
    pub async fn run(&self, tasks: &[Task], selection: &RunSelection, mode: RunMode) -> RunReport {
        let started = Instant::now();
        let selected: Vec<&Task> = tasks.iter().filter(|t| selection.includes(t.id())).collect();
        let unknown_ids = match selection {
            RunSelection::All => Vec::new(),
            RunSelection::Only(ids) | RunSelection::Gaps(ids) => {
                let known: BTreeSet<&TaskId> = tasks.iter().map(Task::id).collect();
                ids.iter().filter(|id| !known.contains(id)).cloned().collect()
            }
        };
        for id in &unknown_ids {
            tracing::warn!(task_id = %id, "Selected id not found in task source");
        }

        tracing::info!(
            run_id = %self.run_id,
            mode = %mode,
            selection = %selection,
            tasks = selected.len(),
            max_in_flight = self.dispatcher.limit(),
            "Starting run"
        );

        let outcomes: Vec<(TaskId, TaskOutcome)> = stream::iter(selected)
            .map(|task| async move {
                let outcome = match self.process(task, mode).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(task_id = %task.id(), error = %e, "Task aborted");
                        TaskOutcome::Failed {
                            kind: FailureKind::RemoteCallFailure,
                            retryable: true,
                        }
                    }
                };
                (task.id().clone(), outcome)
            })
            .buffer_unordered(self.settings.task_parallelism.max(1))
            .collect()
            .await;

        let mut report = RunReport {
            run_id: self.run_id,
            mode,
            attempted: outcomes.len(),
            succeeded: 0,
            failed: 0,
            failed_ids: Vec::new(),
            retryable_ids: Vec::new(),
            unknown_ids,
            peak_in_flight: self.dispatcher.peak_in_flight(),
            elapsed: started.elapsed(),
        };
        for (id, outcome) in outcomes {
            match outcome {
                TaskOutcome::Labelled | TaskOutcome::Sampled => report.succeeded += 1,
                TaskOutcome::Failed { retryable, .. } => {
                    report.failed += 1;
                    if retryable {
                        report.retryable_ids.push(id.clone());
                    }
                    report.failed_ids.push(id);
                }
            }
        }
        report.failed_ids.sort();
        report.retryable_ids.sort();

        tracing::info!(
            run_id = %self.run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            "Run finished"
        );
        report
    }

    async fn process(&self, task: &Task, mode: RunMode) -> Result<TaskOutcome, PipelineError> {
        let mut tracker = StageTracker::new();
        match mode {
            RunMode::ReasonOnly => self.reason_from_store(task, &mut tracker).await,
            RunMode::Full | RunMode::SampleOnly => {
                let attempts = match self.sample(task, mode, &mut tracker).await? {
                    Ok(attempts) => attempts,
                    Err(outcome) => return Ok(outcome),
                };
                if mode == RunMode::Full {
                    return self.reason(task, attempts, &mut tracker).await;
                }

                let usable = attempts.iter().filter(|a| a.is_usable()).count();
                if usable == 0 {
                    tracker.advance(TaskStage::Failed)?;
                    tracing::warn!(task_id = %task.id(), "No usable attempts sampled");
                    let result =
                        TaskResult::total_failure(task.id().clone(), self.run_id, &attempts);
                    Ok(TaskOutcome::from_result(&result))
                } else {
                    tracker.advance(TaskStage::Done)?;
                    tracing::info!(task_id = %task.id(), usable, "Attempts stored");
                    Ok(TaskOutcome::Sampled)
                }
            }
        }
    }

    /// Load evidence, sample and store the attempt record.
    ///
    /// The inner `Err` carries the outcome of a task that ended here. Only a
    /// full run records that outcome in the result sink.
    async fn sample(
        &self,
        task: &Task,
        mode: RunMode,
        tracker: &mut StageTracker,
    ) -> Result<Result<Vec<Attempt>, TaskOutcome>, PipelineError> {
        let requested = self.settings.attempts_per_task;
        let evidence = match self.evidence.load(task.id()).await {
            Ok(evidence) => evidence,
            Err(e) => {
                tracker.advance(TaskStage::Failed)?;
                tracing::warn!(task_id = %task.id(), error = %e, "Evidence missing, skipping task");
                let result = TaskResult::failed(
                    task.id().clone(),
                    self.run_id,
                    FailureKind::EvidenceMissing,
                    e.to_string(),
                    requested,
                );
                if mode == RunMode::Full {
                    self.results.write(&result).await?;
                }
                return Ok(Err(TaskOutcome::from_result(&result)));
            }
        };

        tracker.advance(TaskStage::Sampling)?;
        let attempts = self.sampler.sample(task, &evidence, requested).await;

        let usable = attempts.iter().filter(|a| a.is_usable()).count();
        if usable == attempts.len() {
            tracker.advance(TaskStage::Sampled)?;
        } else {
            tracker.advance(TaskStage::SampleFailed)?;
            if usable > 0 {
                tracing::warn!(
                    task_id = %task.id(),
                    usable,
                    requested = attempts.len(),
                    failure = %FailureKind::PartialAttemptFailure,
                    "Some attempts failed"
                );
            }
        }
        tracing::debug!(task_id = %task.id(), stage = ?tracker.stage(), "Sampling finished");

        let record =
            AttemptRecord::new(task.id().clone(), self.run_id, task.question(), attempts.clone());
        self.attempts.write(&record).await?;
        Ok(Ok(attempts))
    }

    async fn reason_from_store(
        &self,
        task: &Task,
        tracker: &mut StageTracker,
    ) -> Result<TaskOutcome, PipelineError> {
        let Some(record) = self.attempts.load(task.id()).await? else {
            tracker.advance(TaskStage::Failed)?;
            tracing::warn!(task_id = %task.id(), "No stored attempts");
            let result = TaskResult::failed(
                task.id().clone(),
                self.run_id,
                FailureKind::MissingAttempts,
                "no stored attempt record",
                0,
            );
            self.results.write(&result).await?;
            return Ok(TaskOutcome::from_result(&result));
        };
        self.reason(task, record.attempts, tracker).await
    }

    /// Reason over the usable subset of `attempts`, or record a total
    /// failure when there is none.
    async fn reason(
        &self,
        task: &Task,
        attempts: Vec<Attempt>,
        tracker: &mut StageTracker,
    ) -> Result<TaskOutcome, PipelineError> {
        let requested = attempts.len();
        let usable: Vec<Attempt> = attempts.iter().filter(|a| a.is_usable()).cloned().collect();
        if usable.is_empty() {
            tracker.advance(TaskStage::Failed)?;
            tracing::error!(task_id = %task.id(), "Every attempt failed, skipping reasoning");
            let result = TaskResult::total_failure(task.id().clone(), self.run_id, &attempts);
            self.results.write(&result).await?;
            return Ok(TaskOutcome::from_result(&result));
        }

        tracker.advance(TaskStage::Reasoning)?;
        let answer = self.reasoner.reconcile(task.question(), &usable).await?;
        let next = if answer.error.is_some() {
            TaskStage::ReasoningFailed
        } else {
            TaskStage::Done
        };
        tracker.advance(next)?;

        let id = task.id().clone();
        let result = TaskResult::from_answer(id, self.run_id, answer, requested, usable.len());
        self.results.write(&result).await?;
        match result.label {
            Some(label) => tracing::info!(task_id = %task.id(), label = %label, "Task answered"),
            None => tracing::warn!(
                task_id = %task.id(),
                failure = ?result.failure,
                "Task finished without a label"
            ),
        }
        Ok(TaskOutcome::from_result(&result))
    }
}

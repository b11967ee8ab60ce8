//! Durable records written by a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attempt::{Attempt, FailureKind, FinalAnswer};
use super::task::TaskId;
use crate::answer::OptionLabel;
use crate::llm::LlmErrorKind;

/// The one output record per task per run.
///
/// # Invariants
/// - `label` is one of the closed option set or absent, never free text
/// - `failure.is_none() <=> label.is_some()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: TaskId,
    #[serde(default)]
    pub run_id: Uuid,
    #[serde(default, alias = "answer")]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub label: Option<OptionLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<LlmErrorKind>,
    #[serde(default)]
    pub failure: Option<FailureKind>,
    #[serde(default)]
    pub attempts_requested: usize,
    #[serde(default)]
    pub attempts_succeeded: usize,
    #[serde(default)]
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Result of a reasoning call over `attempts_succeeded` usable attempts.
    pub fn from_answer(
        id: TaskId,
        run_id: Uuid,
        answer: FinalAnswer,
        attempts_requested: usize,
        attempts_succeeded: usize,
    ) -> Self {
        let failure = answer.failure();
        let error = match (&answer.error, failure) {
            (Some(e), _) => Some(e.clone()),
            (None, Some(FailureKind::ExtractionFailure)) => {
                Some("no <answer> label found in reasoning response".to_string())
            }
            _ => None,
        };
        Self {
            id,
            run_id,
            raw_text: answer.raw_text,
            finish_reason: answer.finish_reason,
            label: answer.label,
            explanation: answer.explanation,
            error,
            error_kind: answer.error_kind,
            failure,
            attempts_requested,
            attempts_succeeded,
            completed_at: Utc::now(),
        }
    }

    /// Terminal failure reached without a reasoning call.
    pub fn failed(
        id: TaskId,
        run_id: Uuid,
        failure: FailureKind,
        error: impl Into<String>,
        attempts_requested: usize,
    ) -> Self {
        Self {
            id,
            run_id,
            raw_text: None,
            finish_reason: None,
            label: None,
            explanation: None,
            error: Some(error.into()),
            error_kind: None,
            failure: Some(failure),
            attempts_requested,
            attempts_succeeded: 0,
            completed_at: Utc::now(),
        }
    }

    /// Every attempt in `attempts` failed; no reasoning call was made.
    ///
    /// `error_kind` is set only when every attempt hit a permanent remote
    /// error, which makes the result not retryable. Otherwise it carries the
    /// first transient kind, if any.
    pub fn total_failure(id: TaskId, run_id: Uuid, attempts: &[Attempt]) -> Self {
        let permanent = !attempts.is_empty()
            && attempts
                .iter()
                .all(|a| a.error_kind.map_or(false, |k| !k.is_transient()));
        let error_kind = if permanent {
            attempts.first().and_then(|a| a.error_kind)
        } else {
            attempts
                .iter()
                .find_map(|a| a.error_kind.filter(|k| k.is_transient()))
        };
        let error = match attempts.iter().find_map(|a| a.error.as_deref()) {
            Some(first) => format!("all {} sampled attempts failed: {}", attempts.len(), first),
            None => format!("all {} sampled attempts failed", attempts.len()),
        };
        Self {
            error_kind,
            ..Self::failed(id, run_id, FailureKind::TotalFailure, error, attempts.len())
        }
    }

    pub fn is_success(&self) -> bool {
        self.label.is_some()
    }

    /// Stored label, or one extracted from the raw text for records that
    /// predate the `label` field.
    pub fn resolved_label(&self) -> Option<OptionLabel> {
        self.label
            .or_else(|| self.raw_text.as_deref().and_then(crate::answer::extract))
    }

    /// The failure was transient, so a backfill run may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.failure {
            None => false,
            Some(FailureKind::RemoteCallFailure) | Some(FailureKind::TotalFailure) => {
                self.error_kind.map_or(true, |k| k.is_transient())
            }
            Some(FailureKind::EvidenceMissing) | Some(FailureKind::MissingAttempts) => false,
            Some(_) => true,
        }
    }
}

/// Audit trail of one sampling round for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    #[serde(alias = "video_id")]
    pub id: TaskId,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub question: Option<String>,
    pub attempts: Vec<Attempt>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    pub fn new(id: TaskId, run_id: Uuid, question: &str, attempts: Vec<Attempt>) -> Self {
        Self {
            id,
            run_id: Some(run_id),
            question: Some(question.to_string()),
            attempts,
            recorded_at: Some(Utc::now()),
        }
    }

    pub fn usable_attempts(&self) -> Vec<Attempt> {
        self.attempts.iter().filter(|a| a.is_usable()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;

    fn answer(label: Option<OptionLabel>) -> FinalAnswer {
        FinalAnswer {
            raw_text: Some("text".to_string()),
            finish_reason: Some("stop".to_string()),
            label,
            explanation: None,
            error: None,
            error_kind: None,
        }
    }

    #[test]
    fn success_has_no_failure() {
        let reasoned = answer(Some(OptionLabel::B));
        let r = TaskResult::from_answer(TaskId::new("00001"), Uuid::new_v4(), reasoned, 3, 2);
        assert!(r.is_success());
        assert_eq!(r.failure, None);
        assert_eq!(r.error, None);
        assert!(!r.is_retryable());
    }

    #[test]
    fn unlabelled_answer_records_extraction_failure() {
        let r = TaskResult::from_answer(TaskId::new("00001"), Uuid::new_v4(), answer(None), 3, 3);
        assert!(!r.is_success());
        assert_eq!(r.failure, Some(FailureKind::ExtractionFailure));
        assert!(r.error.is_some());
    }

    #[test]
    fn permanent_remote_error_is_not_retryable() {
        let err = LlmError::client_error(400, "invalid image".to_string());
        let reasoned = FinalAnswer::from_error(&err);
        let r = TaskResult::from_answer(TaskId::new("7"), Uuid::new_v4(), reasoned, 1, 1);
        assert_eq!(r.failure, Some(FailureKind::RemoteCallFailure));
        assert!(!r.is_retryable());

        let err = LlmError::timeout(std::time::Duration::from_secs(1));
        let reasoned = FinalAnswer::from_error(&err);
        let r = TaskResult::from_answer(TaskId::new("7"), Uuid::new_v4(), reasoned, 1, 1);
        assert!(r.is_retryable());
    }

    #[test]
    fn total_failure_is_retryable_unless_every_error_is_permanent() {
        let bad_request = LlmError::client_error(400, "invalid image".to_string());
        let overloaded = LlmError::server_error(503, "overloaded".to_string());
        let id = TaskId::new("00009");

        let all_permanent: Vec<Attempt> =
            (1..=3).map(|n| Attempt::from_error(n, &bad_request)).collect();
        let r = TaskResult::total_failure(id.clone(), Uuid::new_v4(), &all_permanent);
        assert_eq!(r.failure, Some(FailureKind::TotalFailure));
        assert_eq!(r.error_kind, Some(LlmErrorKind::ClientError));
        assert_eq!(r.attempts_requested, 3);
        assert!(!r.is_retryable());

        let mixed = vec![
            Attempt::from_error(1, &bad_request),
            Attempt::from_error(2, &overloaded),
        ];
        let r = TaskResult::total_failure(id.clone(), Uuid::new_v4(), &mixed);
        assert_eq!(r.error_kind, Some(LlmErrorKind::ServerError));
        assert!(r.is_retryable());

        let unlabelled = Attempt {
            attempt_number: 1,
            raw_text: Some("no tags here".to_string()),
            finish_reason: Some("stop".to_string()),
            error: None,
            error_kind: None,
            label: None,
        };
        let attempts = [unlabelled, all_permanent[0].clone()];
        let r = TaskResult::total_failure(id, Uuid::new_v4(), &attempts);
        assert_eq!(r.error_kind, None);
        assert!(r.is_retryable());
    }

    #[test]
    fn label_round_trips_as_symbol_or_null() {
        let reasoned = answer(Some(OptionLabel::D));
        let r = TaskResult::from_answer(TaskId::new("00004"), Uuid::new_v4(), reasoned, 3, 3);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["label"], "D");
        assert_eq!(value["id"], "00004");

        let f = TaskResult::failed(
            TaskId::new("00005"),
            Uuid::new_v4(),
            FailureKind::TotalFailure,
            "all failed",
            3,
        );
        let value = serde_json::to_value(&f).unwrap();
        assert!(value["label"].is_null());
        assert_eq!(value["failure"], "total_failure");
    }

    #[test]
    fn legacy_record_resolves_label_from_text() {
        let json = r#"{"id": "00012", "answer": "... <answer>E. none</answer>", "finish_reason": "stop", "error": null}"#;
        let r: TaskResult = serde_json::from_str(json).unwrap();
        assert_eq!(r.label, None);
        assert_eq!(r.resolved_label(), Some(OptionLabel::E));
    }

    #[test]
    fn free_text_label_is_rejected_on_load() {
        let json = serde_json::json!({
            "id": "00001",
            "run_id": Uuid::new_v4(),
            "label": "the answer is B",
            "completed_at": Utc::now(),
        });
        assert!(serde_json::from_value::<TaskResult>(json).is_err());
    }
}

//! Attempt and final-answer values produced by the inference stages.

use serde::{Deserialize, Serialize};

use crate::answer::{self, OptionLabel};
use crate::llm::{ChatResponse, LlmError, LlmErrorKind};

/// Outcome of one independent sampling call.
///
/// # Invariants
/// - `attempt_number >= 1`
/// - Exactly one of `raw_text` / `error` is populated by the constructors;
///   a record with neither (or empty text) is treated as a failure
/// - `label` is derived from `raw_text`, never set independently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub attempt_number: u32,
    #[serde(default, alias = "answer")]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<LlmErrorKind>,
    #[serde(default)]
    pub label: Option<OptionLabel>,
}

impl Attempt {
    /// Build a successful attempt and extract its label.
    pub fn from_response(attempt_number: u32, response: ChatResponse) -> Self {
        let label = response.content.as_deref().and_then(answer::extract);
        Self {
            attempt_number,
            raw_text: response.content,
            finish_reason: response.finish_reason,
            error: None,
            error_kind: None,
            label,
        }
    }

    pub fn from_error(attempt_number: u32, error: &LlmError) -> Self {
        Self {
            attempt_number,
            raw_text: None,
            finish_reason: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind),
            label: None,
        }
    }

    /// Re-derive `label` from `raw_text`; used for records loaded from disk.
    pub fn relabel(mut self) -> Self {
        self.label = self.raw_text.as_deref().and_then(answer::extract);
        self
    }

    /// Text was returned and no error was recorded.
    pub fn has_text(&self) -> bool {
        self.error.is_none()
            && self
                .raw_text
                .as_deref()
                .map_or(false, |t| !t.trim().is_empty())
    }

    /// Usable for reasoning: text present and a label could be extracted.
    ///
    /// An attempt whose text has no recognizable label counts as failed
    /// for aggregation.
    pub fn is_usable(&self) -> bool {
        self.has_text() && self.label.is_some()
    }

    /// Which failure this attempt represents, if any.
    pub fn failure(&self) -> Option<FailureKind> {
        if self.is_usable() {
            None
        } else if self.has_text() {
            Some(FailureKind::ExtractionFailure)
        } else {
            Some(FailureKind::RemoteCallFailure)
        }
    }
}

/// Failure taxonomy recorded on results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No evidence for the task; no remote call was made
    EvidenceMissing,
    /// Timeout, transport error or endpoint error
    RemoteCallFailure,
    /// Response text had no recognizable label
    ExtractionFailure,
    /// Some sampled attempts failed (non-terminal)
    PartialAttemptFailure,
    /// Every sampled attempt failed
    TotalFailure,
    /// Reason-only run found no stored attempts for the task
    MissingAttempts,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::EvidenceMissing => "evidence missing",
            FailureKind::RemoteCallFailure => "remote call failure",
            FailureKind::ExtractionFailure => "extraction failure",
            FailureKind::PartialAttemptFailure => "partial attempt failure",
            FailureKind::TotalFailure => "total failure",
            FailureKind::MissingAttempts => "missing attempts",
        };
        f.write_str(s)
    }
}

/// Output of the consensus reasoner.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub raw_text: Option<String>,
    pub finish_reason: Option<String>,
    pub label: Option<OptionLabel>,
    pub explanation: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<LlmErrorKind>,
}

impl FinalAnswer {
    pub fn from_response(response: ChatResponse) -> Self {
        let text = response.content.as_deref().unwrap_or_default();
        Self {
            label: answer::extract(text),
            explanation: answer::extract_explanation(text),
            raw_text: response.content,
            finish_reason: response.finish_reason,
            error: None,
            error_kind: None,
        }
    }

    pub fn from_error(error: &LlmError) -> Self {
        Self {
            raw_text: None,
            finish_reason: None,
            label: None,
            explanation: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind),
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        if self.error.is_some() {
            Some(FailureKind::RemoteCallFailure)
        } else if self.label.is_none() {
            Some(FailureKind::ExtractionFailure)
        } else {
            None
        }
    }
}

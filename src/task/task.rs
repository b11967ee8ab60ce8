//! Task identity and the immutable task definition.
//!
//! # Invariants
//! - `id` is unique within a run
//! - A `Task` is never mutated after it is read from the task source

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Stable identifier of a task, e.g. `"00023"`.
///
/// # Properties
/// - Two ids compare equal when both are numeric with the same value
///   (`"23" == "00023"`), otherwise when the strings match exactly
/// - Numeric ids order by value and sort before non-numeric ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

/// Normalized comparison key of a [`TaskId`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum IdKey<'a> {
    Numeric(u32),
    Text(&'a str),
}

impl TaskId {
    /// Wrap a raw identifier, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Format a numeric id zero-padded to `width` digits.
    pub fn from_number(number: u32, width: usize) -> Self {
        Self(format!("{:0width$}", number, width = width))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric value if the id is made of ASCII digits only.
    pub fn number(&self) -> Option<u32> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    fn key(&self) -> IdKey<'_> {
        match self.number() {
            Some(n) => IdKey::Numeric(n),
            None => IdKey::Text(&self.0),
        }
    }
}

impl PartialEq for TaskId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TaskId {}

impl Hash for TaskId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state)
    }
}

impl PartialOrd for TaskId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(raw: &str) -> Self {
        TaskId::new(raw)
    }
}

/// One question-plus-evidence unit. The answer options are embedded in
/// `question`; evidence is looked up by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    question: String,
}

impl Task {
    pub fn new(id: TaskId, question: impl Into<String>) -> Self {
        Self {
            id,
            question: question.into(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn question(&self) -> &str {
        &self.question
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::collections::HashSet;

    #[test]
    fn numeric_ids_compare_by_value() {
        assert_eq!(TaskId::new("00023"), TaskId::new("23"));
        assert_ne!(TaskId::new("00023"), TaskId::new("00024"));
        assert!(TaskId::new("9") < TaskId::new("00010"));

        let mut set = HashSet::new();
        set.insert(TaskId::new("00023"));
        assert!(set.contains(&TaskId::new("23")));
    }

    #[test]
    fn text_ids_compare_exactly() {
        assert_eq!(TaskId::new("clip-a"), TaskId::new(" clip-a "));
        assert_ne!(TaskId::new("clip-a"), TaskId::new("clip-b"));
        assert!(TaskId::new("99999") < TaskId::new("clip-a"));
    }

    #[test]
    fn from_number_zero_pads() {
        assert_eq!(TaskId::from_number(3, 5).as_str(), "00003");
        assert_eq!(TaskId::from_number(251, 5).number(), Some(251));
        assert_eq!(TaskId::from_number(123456, 5).as_str(), "123456");
    }

    #[test]
    fn number_rejects_signs_and_text() {
        assert_eq!(TaskId::new("-3").number(), None);
        assert_eq!(TaskId::new("+3").number(), None);
        assert_eq!(TaskId::new("3a").number(), None);
        assert_eq!(TaskId::new("").number(), None);
    }

    #[test]
    fn ordered_sets_sort_numerically() {
        let ids: BTreeSet<TaskId> =
            ["00010", "2", "00001"].iter().map(|s| TaskId::new(s)).collect();
        let sorted: Vec<_> = ids.iter().map(|id| id.as_str()).collect();
        assert_eq!(sorted, vec!["00001", "2", "00010"]);
    }
}

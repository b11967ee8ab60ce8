//! Answer extraction from free-text model responses.
//!
//! Grammar (first matching marker pair wins, label is case-sensitive):
//!
//! ```text
//! answer      := "<answer>" LABEL ( "</answer>" | SEP TRAILER "</answer>" )
//! LABEL       := "A" | "B" | "C" | "D" | "E"
//! SEP         := "." | whitespace
//! TRAILER     := any characters except "<"
//! explanation := "<explanation>" ANY* "</explanation>"
//! ```
//!
//! Only the leading label character is significant; trailing text inside the
//! markers is never interpreted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Label followed by a separator and tag-free text up to the closing tag.
///
/// The trailer cannot contain `<`, so an unclosed marker never pairs with a
/// later marker's closing tag.
static ANSWER_WITH_TRAILER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<answer>([A-E])[.\s][^<]*?</answer>").expect("valid answer regex")
});

/// Bare label.
static ANSWER_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<answer>([A-E])</answer>").expect("valid answer regex"));

static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<explanation>(.*?)</explanation>").expect("valid explanation regex")
});

/// One of the fixed multiple-choice option symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
    E,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; 5] = [
        OptionLabel::A,
        OptionLabel::B,
        OptionLabel::C,
        OptionLabel::D,
        OptionLabel::E,
    ];

    /// Parse a single label symbol. Anything else is `None`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "A" => Some(OptionLabel::A),
            "B" => Some(OptionLabel::B),
            "C" => Some(OptionLabel::C),
            "D" => Some(OptionLabel::D),
            "E" => Some(OptionLabel::E),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionLabel::A => "A",
            OptionLabel::B => "B",
            OptionLabel::C => "C",
            OptionLabel::D => "D",
            OptionLabel::E => "E",
        }
    }
}

impl std::fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the chosen option label, or `None` if no marker pair matches.
///
/// The trailing-content form is tried before the bare form; within a form the
/// first occurrence in the text wins.
pub fn extract(raw_text: &str) -> Option<OptionLabel> {
    [&*ANSWER_WITH_TRAILER, &*ANSWER_BARE]
        .into_iter()
        .find_map(|re| re.captures(raw_text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| OptionLabel::from_symbol(m.as_str()))
}

/// Extract the optional `<explanation>` block, trimmed. Empty blocks are `None`.
pub fn extract_explanation(raw_text: &str) -> Option<String> {
    EXPLANATION
        .captures(raw_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_label() {
        assert_eq!(extract("<answer>C</answer>"), Some(OptionLabel::C));
    }

    #[test]
    fn test_label_with_trailing_text() {
        assert_eq!(
            extract("<answer>C. because of the stop sign</answer>"),
            Some(OptionLabel::C)
        );
        assert_eq!(extract("<answer>B 27 km/h</answer>"), Some(OptionLabel::B));
    }

    #[test]
    fn test_no_tags() {
        assert_eq!(extract("no tags here"), None);
        assert_eq!(extract(""), None);
    }

    #[test]
    fn test_label_outside_closed_set() {
        assert_eq!(extract("<answer>F</answer>"), None);
        assert_eq!(extract("<answer>c</answer>"), None);
    }

    #[test]
    fn test_label_must_lead_marker() {
        assert_eq!(extract("<answer> A</answer>"), None);
        assert_eq!(extract("<answer>AB</answer>"), None);
    }

    #[test]
    fn test_first_match_wins() {
        let text = "Attempt said <answer>A</answer> but final is <answer>D</answer>";
        assert_eq!(extract(text), Some(OptionLabel::A));
    }

    #[test]
    fn test_trailing_form_preferred_over_bare() {
        let text = "<answer>A</answer> ... <answer>E. revised</answer>";
        assert_eq!(extract(text), Some(OptionLabel::E));
    }

    #[test]
    fn test_multiline_trailer() {
        let text = "Final:\n<answer>D.\nThe pedestrian is\ncrossing</answer>";
        assert_eq!(extract(text), Some(OptionLabel::D));
    }

    #[test]
    fn test_unclosed_marker_does_not_pair_with_later_close() {
        let text = "<answer>A. unclosed\nmore <answer>B</answer>";
        assert_eq!(extract(text), Some(OptionLabel::B));

        let text = "<answer>C. first\n<answer>D. second</answer>";
        assert_eq!(extract(text), Some(OptionLabel::D));
    }

    #[test]
    fn test_embedded_in_long_response() {
        let text = "1. **Frame-by-Frame Analysis:** ...\n4. **Best Answer:** <answer>B</answer>\n";
        assert_eq!(extract(text), Some(OptionLabel::B));
    }

    #[test]
    fn test_explanation() {
        let text = "<answer>B</answer>\n<explanation>\n  Attempt 2 noticed the signal.\n</explanation>";
        assert_eq!(
            extract_explanation(text).as_deref(),
            Some("Attempt 2 noticed the signal.")
        );
        assert_eq!(extract_explanation("<explanation>  </explanation>"), None);
        assert_eq!(extract_explanation("<answer>B</answer>"), None);
    }

    #[test]
    fn test_label_serializes_as_symbol() {
        let json = serde_json::to_string(&OptionLabel::D).unwrap();
        assert_eq!(json, "\"D\"");
        assert!(serde_json::from_str::<OptionLabel>("\"Z\"").is_err());
        assert!(OptionLabel::ALL
            .iter()
            .all(|l| OptionLabel::from_symbol(l.as_str()) == Some(*l)));
    }
}

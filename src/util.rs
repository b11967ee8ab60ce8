//! Shared utility functions used across the codebase.

use std::collections::BTreeSet;

use crate::task::TaskId;

/// Parse a comma or whitespace separated id list, e.g. `"3, 00006 12"`.
///
/// Empty items are skipped and duplicates (numerically equal ids) collapse.
pub fn parse_id_list(raw: &str) -> BTreeSet<TaskId> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TaskId::new)
        .collect()
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_list_splits_and_dedupes() {
        let ids = parse_id_list(" 3, 00006 ,,12 3\n");
        let ids: Vec<&str> = ids.iter().map(TaskId::as_str).collect();
        assert_eq!(ids, vec!["3", "00006", "12"]);
    }

    #[test]
    fn parse_id_list_empty() {
        assert!(parse_id_list(" , ").is_empty());
    }

    #[test]
    fn truncate_chars_handles_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}

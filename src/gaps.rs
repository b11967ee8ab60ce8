//! Gap detection, run selection and answer export.
//!
//! A run writes one record per selected task. Comparing the sink against the
//! expected id range tells the operator which ids still lack a label; the
//! resulting [`RunSelection`] restricts the next invocation to exactly those
//! ids.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::Path;

use crate::answer::OptionLabel;
use crate::store::{ResultSink, SinkEntry, StoreError};
use crate::task::TaskId;

/// Which tasks a run touches. Every stage consults the same selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunSelection {
    All,
    /// Explicit allow-list supplied by the operator
    Only(BTreeSet<TaskId>),
    /// Ids the gap detector found without a label
    Gaps(BTreeSet<TaskId>),
}

impl RunSelection {
    pub fn includes(&self, id: &TaskId) -> bool {
        match self {
            RunSelection::All => true,
            RunSelection::Only(ids) | RunSelection::Gaps(ids) => ids.contains(id),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RunSelection::All => false,
            RunSelection::Only(ids) | RunSelection::Gaps(ids) => ids.is_empty(),
        }
    }
}

impl std::fmt::Display for RunSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunSelection::All => write!(f, "all"),
            RunSelection::Only(ids) => write!(f, "only {} ids", ids.len()),
            RunSelection::Gaps(ids) => write!(f, "{} gap ids", ids.len()),
        }
    }
}

/// Coverage of the expected range by the sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapReport {
    /// In-range ids with no labelled record
    pub missing: BTreeSet<u32>,
    /// In-range ids with a labelled record
    pub succeeded: BTreeSet<u32>,
    pub warnings: Vec<String>,
}

impl GapReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Selection covering exactly the missing ids, formatted to `width` digits.
    pub fn selection(&self, width: usize) -> RunSelection {
        RunSelection::Gaps(
            self.missing
                .iter()
                .map(|&n| TaskId::from_number(n, width))
                .collect(),
        )
    }

    /// Append notes raised while the entries were read.
    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        let mut notes: Vec<String> = warnings.into_iter().collect();
        notes.append(&mut self.warnings);
        self.warnings = notes;
        self
    }
}

/// Compare sink entries against the expected range.
///
/// Never fails: malformed or out-of-range ids are reported as warnings and
/// counted in neither set. The result depends only on the inputs.
pub fn detect_gaps(expected: RangeInclusive<u32>, entries: &[SinkEntry]) -> GapReport {
    let mut report = GapReport::default();

    for entry in entries {
        let Some(number) = TaskId::new(&entry.raw_id).number() else {
            report
                .warnings
                .push(format!("malformed id '{}' in sink", entry.raw_id));
            continue;
        };
        if !expected.contains(&number) {
            report.warnings.push(format!(
                "id '{}' outside expected range {}..={}",
                entry.raw_id,
                expected.start(),
                expected.end()
            ));
            continue;
        }
        if entry.label.is_some() {
            report.succeeded.insert(number);
        }
    }

    report.missing = expected.filter(|n| !report.succeeded.contains(n)).collect();
    report
}

/// Scan `sink` and compute its gaps, including the sink's own read warnings.
pub async fn scan_gaps(
    sink: &dyn ResultSink,
    expected: RangeInclusive<u32>,
) -> Result<GapReport, StoreError> {
    let scan = sink.entries().await?;
    Ok(detect_gaps(expected, &scan.entries).with_warnings(scan.warnings))
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to write answers CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write answers CSV: {0}")]
    Io(#[from] std::io::Error),
}

/// Write `id,answer` rows for every labelled in-range record, sorted by id.
///
/// Returns the gap report of the scan so the caller can surface missing ids.
pub async fn export_answers(
    sink: &dyn ResultSink,
    expected: RangeInclusive<u32>,
    width: usize,
    path: &Path,
) -> Result<GapReport, ExportError> {
    let scan = sink.entries().await?;
    let report = detect_gaps(expected.clone(), &scan.entries).with_warnings(scan.warnings);

    let mut answers: BTreeMap<u32, OptionLabel> = BTreeMap::new();
    for entry in &scan.entries {
        let (Some(number), Some(label)) = (TaskId::new(&entry.raw_id).number(), entry.label) else {
            continue;
        };
        if expected.contains(&number) {
            answers.entry(number).or_insert(label);
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["id", "answer"])?;
    for (number, label) in &answers {
        let id = TaskId::from_number(*number, width);
        writer.write_record([id.as_str(), label.as_str()])?;
    }
    writer.flush()?;

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    if !report.is_complete() {
        tracing::warn!(missing = ?report.missing, "Missing answers for ids");
    }
    tracing::info!(path = %path.display(), written = answers.len(), "Answers exported");
    Ok(report)
}

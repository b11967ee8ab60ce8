//! Task source: `(id, question)` rows from a CSV file.

use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::task::{Task, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to open task source {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed task row {row}: {source}")]
    Row {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Row {
    id: String,
    question: String,
}

/// Read every task from the CSV file at `path`.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>, SourceError> {
    let file = std::fs::File::open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_tasks(file)
}

/// Parse tasks from any CSV reader with `id` and `question` header columns.
///
/// Extra columns are ignored. Rows with a blank id are skipped, and a repeated
/// id keeps its first occurrence.
pub fn read_tasks<R: Read>(reader: R) -> Result<Vec<Task>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for (index, result) in reader.deserialize::<Row>().enumerate() {
        let row = result.map_err(|source| SourceError::Row {
            row: index + 1,
            source,
        })?;
        let id = TaskId::new(&row.id);
        if id.as_str().is_empty() {
            tracing::warn!(row = index + 1, "Skipping task row with blank id");
            continue;
        }
        if !seen.insert(id.clone()) {
            tracing::warn!(task_id = %id, "Duplicate task id in source, keeping first");
            continue;
        }
        tasks.push(Task::new(id, row.question));
    }
    Ok(tasks)
}

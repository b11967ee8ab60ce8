//! JSON record stores for results and attempt audit trails.
//!
//! Both stores keep one `<id>_result.json` file per task in their own
//! directory. Writes go to a sibling `.json.tmp` file that is then renamed
//! over the target, so readers only ever observe complete records.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::answer::OptionLabel;
use crate::task::{AttemptRecord, TaskId, TaskResult};

const RECORD_SUFFIX: &str = "_result.json";
const LOCK_FILE: &str = ".run.lock";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create store directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record for {id}: {source}")]
    Serialize {
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Another run holds the lock on {}", path.display())]
    Locked { path: PathBuf },
}

/// One record found while scanning a sink.
///
/// `raw_id` is taken from the file name and may be malformed; validation is
/// left to the gap detector. `label` is absent for failed or unreadable
/// records.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkEntry {
    pub raw_id: String,
    pub label: Option<OptionLabel>,
}

/// Entries plus the notes raised while reading them.
#[derive(Debug, Default, Clone)]
pub struct SinkScan {
    pub entries: Vec<SinkEntry>,
    pub warnings: Vec<String>,
}

/// Destination for per-task results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Persist `result`, replacing any earlier record for the same id.
    async fn write(&self, result: &TaskResult) -> Result<(), StoreError>;

    /// List every record currently in the sink.
    async fn entries(&self) -> Result<SinkScan, StoreError>;
}

/// Directory of `<id>_result.json` files.
#[derive(Debug, Clone)]
struct RecordDir {
    dir: PathBuf,
}

impl RecordDir {
    async fn open(dir: PathBuf) -> Result<Self, StoreError> {
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}{}", id.as_str(), RECORD_SUFFIX))
    }

    async fn write<T: Serialize>(&self, id: &TaskId, record: &T) -> Result<PathBuf, StoreError> {
        let data = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Serialize {
            id: id.clone(),
            source,
        })?;
        let path = self.path_for(id);
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|source| StoreError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path).await.map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `(raw id, path)` for every record file, sorted by file name.
    async fn list(&self) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|source| StoreError::Read {
                path: self.dir.clone(),
                source,
            })?;
        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|source| StoreError::Read {
            path: self.dir.clone(),
            source,
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(raw_id) = name.strip_suffix(RECORD_SUFFIX) {
                found.push((raw_id.to_string(), entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }
}

/// The result sink used by the CLI.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    records: RecordDir,
}

impl FileResultStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            records: RecordDir::open(dir.into()).await?,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.records.dir
    }

    pub async fn load(&self, id: &TaskId) -> Result<Option<TaskResult>, StoreError> {
        let path = self.records.path_for(id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.records.read(&path).await.map(Some)
    }

    /// Take the exclusive run lock on this sink.
    pub fn lock(&self) -> Result<RunLock, StoreError> {
        RunLock::acquire(&self.records.dir)
    }
}

#[async_trait]
impl ResultSink for FileResultStore {
    async fn write(&self, result: &TaskResult) -> Result<(), StoreError> {
        let path = self.records.write(&result.id, result).await?;
        tracing::debug!(task_id = %result.id, path = %path.display(), "Result written");
        Ok(())
    }

    async fn entries(&self) -> Result<SinkScan, StoreError> {
        let mut scan = SinkScan::default();
        for (raw_id, path) in self.records.list().await? {
            let label = match self.records.read::<TaskResult>(&path).await {
                Ok(result) => result.resolved_label(),
                Err(e) => {
                    scan.warnings.push(format!("unreadable record for '{}': {}", raw_id, e));
                    None
                }
            };
            scan.entries.push(SinkEntry { raw_id, label });
        }
        Ok(scan)
    }
}

/// Store of sampling-stage audit records, read back by reason-only runs.
#[derive(Debug, Clone)]
pub struct AttemptStore {
    records: RecordDir,
}

impl AttemptStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self {
            records: RecordDir::open(dir.into()).await?,
        })
    }

    pub async fn write(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        self.records.write(&record.id, record).await?;
        Ok(())
    }

    /// Load the record for `id`; attempt labels are re-derived from their text.
    pub async fn load(&self, id: &TaskId) -> Result<Option<AttemptRecord>, StoreError> {
        let path = self.records.path_for(id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        let mut record: AttemptRecord = self.records.read(&path).await?;
        record.attempts = record.attempts.into_iter().map(|a| a.relabel()).collect();
        Ok(Some(record))
    }
}

/// Exclusive advisory lock on a results directory, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        use fs2::FileExt;

        let path = dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked { path: path.clone() })?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

//! Evidence provider: ordered still frames for a task.
//!
//! Frames are produced ahead of time by an external extraction step and laid
//! out as `<frames_dir>/<task id>/frame_*.jpg`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::task::TaskId;

/// Ordered frames attached to a sampling call, as data URLs.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub frames: Vec<String>,
}

impl Evidence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("No frames found for task {id} in {}", dir.display())]
    NotFound { id: TaskId, dir: PathBuf },

    #[error("Failed to read frame {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    /// Load the evidence for `id`. An empty result is reported as `NotFound`.
    async fn load(&self, id: &TaskId) -> Result<Evidence, EvidenceError>;
}

/// Reads `frame_*.jpg` files from one directory per task.
pub struct FrameDirectory {
    root: PathBuf,
    expected_frames: usize,
}

impl FrameDirectory {
    pub fn new(root: impl Into<PathBuf>, expected_frames: usize) -> Self {
        Self {
            root: root.into(),
            expected_frames,
        }
    }

    fn frame_paths(dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.starts_with("frame_") && name.to_ascii_lowercase().ends_with(".jpg")
            })
            .map(|e| e.into_path())
            .collect()
    }
}

#[async_trait]
impl EvidenceProvider for FrameDirectory {
    async fn load(&self, id: &TaskId) -> Result<Evidence, EvidenceError> {
        let dir = self.root.join(id.as_str());
        let paths = Self::frame_paths(&dir);
        if paths.is_empty() {
            return Err(EvidenceError::NotFound {
                id: id.clone(),
                dir,
            });
        }
        if paths.len() != self.expected_frames {
            tracing::warn!(
                task_id = %id,
                found = paths.len(),
                expected = self.expected_frames,
                "Unexpected frame count"
            );
        }

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| EvidenceError::Read {
                    path: path.clone(),
                    source,
                })?;
            frames.push(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)));
        }
        Ok(Evidence { frames })
    }
}

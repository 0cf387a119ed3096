//! On-disk storage of generated images.

use std::path::{Path, PathBuf};

use chrono::Utc;
use easel_core::types::JobId;

/// Writes finished images into the output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every image of a job and return their paths in order.
    ///
    /// Files are named `<YYYYMMDD-HHMMSS>-<job suffix>-<n>.png`. The
    /// directory is created on demand.
    pub async fn save(&self, job_id: JobId, images: &[Vec<u8>]) -> std::io::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        // The tail of a v7 UUID is random; the head is the timestamp.
        let simple = job_id.simple().to_string();
        let suffix = &simple[simple.len() - 8..];

        let mut paths = Vec::with_capacity(images.len());
        for (index, bytes) in images.iter().enumerate() {
            let path = self.dir.join(format!("{stamp}-{suffix}-{index}.png"));
            tokio::fs::write(&path, bytes).await?;
            paths.push(path);
        }
        Ok(paths)
    }
}

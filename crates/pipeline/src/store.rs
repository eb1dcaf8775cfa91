//! One JSON document per completed run.
//!
//! Records are written to `metadata_<run_id>.json` through a temporary
//! file that is synced and then renamed into place, so a crash never
//! leaves a truncated record under the final name. A record is never
//! rewritten with different content.

use std::path::{Path, PathBuf};

use lofi_core::metadata::MetadataRecord;
use lofi_core::naming::metadata_filename;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("A different record for run {run_id} already exists")]
    Conflict { run_id: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(metadata_filename(run_id))
    }

    pub fn exists(&self, run_id: &str) -> bool {
        self.path_for(run_id).exists()
    }

    /// Serialized form: pretty JSON with a trailing newline.
    pub fn encode(record: &MetadataRecord) -> Result<Vec<u8>, StoreError> {
        let mut bytes = serde_json::to_vec_pretty(record)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Write `record` atomically and return its path.
    ///
    /// Persisting an identical record again rewrites the same bytes;
    /// persisting a different record under an existing run id fails with
    /// [`StoreError::Conflict`] and leaves the existing file untouched.
    pub async fn persist(&self, record: &MetadataRecord) -> Result<PathBuf, StoreError> {
        let bytes = Self::encode(record)?;
        let path = self.path_for(&record.timestamp_id);

        match tokio::fs::read(&path).await {
            Ok(existing) if existing != bytes => {
                return Err(StoreError::Conflict {
                    run_id: record.timestamp_id.clone(),
                });
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&path)(e)),
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;

        let tmp = self
            .dir
            .join(format!(".{}.tmp", metadata_filename(&record.timestamp_id)));
        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_error(&tmp))?;
        file.write_all(&bytes).await.map_err(io_error(&tmp))?;
        file.sync_all().await.map_err(io_error(&tmp))?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_error(&path)(e));
        }

        tracing::info!(run_id = %record.timestamp_id, path = %path.display(), "Metadata record saved");
        Ok(path)
    }

    pub async fn load(&self, run_id: &str) -> Result<MetadataRecord, StoreError> {
        let path = self.path_for(run_id);
        let bytes = tokio::fs::read(&path).await.map_err(io_error(&path))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

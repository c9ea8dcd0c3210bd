//! Read model of completed packages.

use std::path::{Path, PathBuf};

use ota_protocol::PackageRecord;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

const MANIFEST_VERSION: u32 = 1;

/// Errors loading or saving the package manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported manifest version {0}")]
    Version(u32),
}

#[derive(Serialize, Deserialize)]
struct Manifest {
    version: u32,
    packages: Vec<PackageRecord>,
}

/// Answers "which packages does this agent have".
///
/// Records are kept ordered by `completed_at`; records completing at the same
/// instant keep the order in which they were recorded.
#[derive(Default)]
pub struct ReportService {
    records: RwLock<Vec<PackageRecord>>,
    manifest_path: Option<PathBuf>,
}

impl ReportService {
    /// Creates an in-memory read model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the manifest at `path` (if it exists) and keeps it up to date.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ManifestError> {
        let path = path.into();
        let mut records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let manifest: Manifest = serde_json::from_slice(&bytes)?;
                if manifest.version != MANIFEST_VERSION {
                    return Err(ManifestError::Version(manifest.version));
                }
                manifest.packages
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        // Stable sort keeps file order for equal timestamps.
        records.sort_by_key(|r| r.completed_at);
        info!(path = %path.display(), packages = records.len(), "package manifest loaded");

        Ok(Self {
            records: RwLock::new(records),
            manifest_path: Some(path),
        })
    }

    /// Adds a completed package.
    ///
    /// The record is visible to [`list`](Self::list) even if the manifest
    /// cannot be written; the write error is returned for logging.
    pub async fn record(&self, record: PackageRecord) -> Result<(), ManifestError> {
        let mut records = self.records.write().await;
        let pos = records.partition_point(|r| r.completed_at <= record.completed_at);
        records.insert(pos, record);

        // Written under the lock so concurrent finishes persist in order.
        match &self.manifest_path {
            Some(path) => save_manifest(path, &records).await,
            None => Ok(()),
        }
    }

    /// Every known package, oldest completion first.
    pub async fn list(&self) -> Vec<PackageRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Rewrites the manifest atomically (temp file + rename).
async fn save_manifest(path: &Path, records: &[PackageRecord]) -> Result<(), ManifestError> {
    let manifest = Manifest {
        version: MANIFEST_VERSION,
        packages: records.to_vec(),
    };
    let json = serde_json::to_vec_pretty(&manifest)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        warn!(path = %path.display(), "manifest rename failed: {e}");
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

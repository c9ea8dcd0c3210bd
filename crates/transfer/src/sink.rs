use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::chunked::Payload;
use crate::types::PackageMeta;
use crate::validation::validate_name_component;

/// Errors writing a verified package to disk.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid package name: {0}")]
    InvalidName(String),
}

/// Writes verified packages into a directory.
///
/// Packages land at `<vendor>/<name>/<version>.pkg`. Each component is a
/// validated plain name, so distinct metadata never shares a path. Files
/// appear atomically: the bytes go to a hidden temporary file next to the
/// destination that is renamed into place. Re-delivering the same package
/// replaces the earlier file.
#[derive(Debug, Clone)]
pub struct PackageSink {
    dir: PathBuf,
}

impl PackageSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path for a package.
    pub fn path_for(&self, meta: &PackageMeta) -> Result<PathBuf, SinkError> {
        for (field, value) in [
            ("vendor", &meta.vendor),
            ("name", &meta.name),
            ("version", &meta.version),
        ] {
            validate_name_component(field, value)
                .map_err(|e| SinkError::InvalidName(e.to_string()))?;
        }
        Ok(self
            .dir
            .join(&meta.vendor)
            .join(&meta.name)
            .join(format!("{}.pkg", meta.version)))
    }

    /// Writes `payload` and returns the final path. Blocking.
    pub fn store(&self, meta: &PackageMeta, payload: &Payload) -> Result<PathBuf, SinkError> {
        let dest = self.path_for(meta)?;
        let parent = dest.parent().unwrap_or(self.dir.as_path());
        fs::create_dir_all(parent)?;

        let tmp = parent.join(format!(".{}.part", uuid::Uuid::new_v4()));
        let replaced = dest.exists();
        let result = write_file(&tmp, payload).and_then(|()| fs::rename(&tmp, &dest));
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(path = %dest.display(), size = payload.len(), replaced, "package stored");
        Ok(dest)
    }
}

fn write_file(path: &Path, payload: &Payload) -> std::io::Result<()> {
    let file = fs::File::create(path)?;
    let mut w = BufWriter::new(file);
    payload.write_to(&mut w)?;
    w.flush()?;
    w.get_ref().sync_all()
}

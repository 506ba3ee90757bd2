use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use wayback_core::TimestampFormat;

use crate::paths::snapshot_path;
use crate::rewriter::AnnotatedResponse;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("cannot use {} as output directory: {reason}", path.display())]
    OutputDir { path: PathBuf, reason: String },
    #[error("refusing to store a response with status {0}")]
    NotStored(u16),
    #[error("cannot encode manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Creates `dir` if needed and checks that files can be created in it.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let unusable = |reason: String| PersistError::OutputDir {
        path: dir.to_path_buf(),
        reason,
    };
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => return Err(unusable("not a directory".to_string())),
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|err| unusable(err.to_string()))?;
        }
        Err(err) => return Err(unusable(err.to_string())),
    }
    tempfile::tempfile_in(dir)
        .map(drop)
        .map_err(|err| unusable(format!("not writable: {err}")))
}

/// Writes whole files into one directory. Content is staged in a temp
/// file next to the target and renamed over it, so readers never see a
/// partial file.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.dir.join(filename);
        let failed = |source: io::Error| PersistError::Write {
            path: target.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(&failed)?;
        let mut staged = NamedTempFile::new_in(&self.dir).map_err(&failed)?;
        staged
            .write_all(content)
            .and_then(|()| staged.as_file().sync_all())
            .map_err(&failed)?;
        staged.persist(&target).map_err(|err| failed(err.error))?;
        Ok(target)
    }
}

/// Stores annotated snapshots under the output root.
pub struct SnapshotWriter {
    root: PathBuf,
    format: TimestampFormat,
}

impl SnapshotWriter {
    pub fn new(root: PathBuf, format: TimestampFormat) -> Self {
        Self { root, format }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, response: &AnnotatedResponse) -> PathBuf {
        snapshot_path(&self.root, &response.original_url, response.timestamp, self.format)
    }

    /// Writes the body of a 2xx response; anything else is refused.
    pub fn write(&self, response: &AnnotatedResponse) -> Result<PathBuf, PersistError> {
        if !response.is_success() {
            return Err(PersistError::NotStored(response.status));
        }
        let target = self.path_for(response);
        let (Some(dir), Some(name)) = (target.parent(), target.file_name()) else {
            return Err(PersistError::OutputDir {
                path: target.clone(),
                reason: "no file name".to_string(),
            });
        };
        AtomicFileWriter::new(dir.to_path_buf()).write(&name.to_string_lossy(), &response.body)
    }
}

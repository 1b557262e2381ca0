//! Pipeline-owned scratch directory
//!
//! Generated scripts, migration metadata and certificate files all land here.
//! The directory lives exactly as long as its [`ScratchDir`] guard: dropping
//! the guard removes it, whichever way the pipeline exits.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::Result;

const SCRATCH_PREFIX: &str = "mgradm-";

/// RAII guard owning a unique scratch directory
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `root`, or the system temp dir when `None`
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "created scratch directory");
        Ok(Self {
            dir: Some(dir),
            path,
        })
    }

    /// Location of the directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of `name` inside the directory
    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(path = %self.path.display(), "removed scratch directory"),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove scratch directory"
                ),
            }
        }
    }
}

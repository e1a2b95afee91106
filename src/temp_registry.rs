use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tempfile::TempDir;

use crate::error::SortError;

/// Hands out uniquely named paths for sorted runs under a private working
/// directory and deletes everything on disposal. Cleanup is best effort; the
/// registry is never a reason for a sort to fail.
pub(crate) struct TempFileRegistry {
    dir: TempDir,
    counter: AtomicUsize,
    created: Mutex<Vec<PathBuf>>,
}

impl TempFileRegistry {
    /// Create the working directory as a uniquely named subdirectory of
    /// `base`, or of the system temp directory when no base is given.
    pub(crate) fn new(base: Option<&Path>) -> Result<TempFileRegistry, SortError> {
        let builder_result = match base {
            Some(base) => tempfile::Builder::new().prefix("sort-").tempdir_in(base),
            None => tempfile::Builder::new().prefix("sort-").tempdir(),
        };
        let dir = builder_result.map_err(|e| {
            let shown = base.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
            SortError::temp(&shown, e)
        })?;
        log::info!("working directory: {}", dir.path().display());
        Ok(TempFileRegistry {
            dir,
            counter: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
        })
    }

    /// Path for a phase one sorted run.
    pub(crate) fn chunk_path(&self) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.register(self.dir.path().join(format!("chunk_{id:06}")))
    }

    /// Path for one merge pass output.
    pub(crate) fn merge_path(&self, pass: usize) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        self.register(self.dir.path().join(format!("merge_p{pass}_i{id:06}")))
    }

    fn register(&self, path: PathBuf) -> PathBuf {
        self.created.lock().unwrap().push(path.clone());
        path
    }

    /// Delete every handed out file and the working directory, suppressing
    /// individual failures.
    pub(crate) fn dispose(&self) {
        for path in self.created.lock().unwrap().drain(..) {
            let _ = fs::remove_file(path);
        }
        if let Err(e) = fs::remove_dir_all(self.dir.path()) {
            log::warn!(
                "failed to remove working directory {}: {}",
                self.dir.path().display(),
                e
            );
        }
    }
}

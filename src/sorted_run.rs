use std::path::{Path, PathBuf};

/// One sorted run on disk: a phase one chunk file or a merge pass
/// intermediate.
#[derive(Debug, Clone)]
pub(crate) struct SortedRun {
    path: PathBuf,
    compressed: bool,
}

impl SortedRun {
    pub(crate) fn new(path: PathBuf, compressed: bool) -> SortedRun {
        SortedRun { path, compressed }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn compressed(&self) -> bool {
        self.compressed
    }
}

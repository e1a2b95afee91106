use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors surfaced by [`Sort`](crate::sort::Sort) operations.
///
/// A record that fails to parse is not an error by default - the engine drops
/// it and continues. [`Sort::with_strict`](crate::sort::Sort::with_strict)
/// turns such records into [`SortError::MalformedRecord`].
#[derive(Error, Debug)]
pub enum SortError {
    #[error("failed to read input {path}: {source}")]
    InputUnavailable { path: PathBuf, source: io::Error },

    #[error("failed to write output {path}: {source}")]
    OutputUnavailable { path: PathBuf, source: io::Error },

    #[error("failed to access working file {path}: {source}")]
    TempUnavailable { path: PathBuf, source: io::Error },

    #[error("malformed record at byte {offset}: {snippet:?}")]
    MalformedRecord { offset: u64, snippet: String },

    #[error("sort cancelled")]
    Cancelled,

    #[error("buffer pool exhausted: {outstanding} buffers outstanding, limit {limit}")]
    ResourceExhausted { outstanding: usize, limit: usize },

    #[error("compressed stream failure on {path}: {source}")]
    Codec { path: PathBuf, source: io::Error },

    #[error("worker pool failure: {message}")]
    WorkerPool { message: String },
}

impl SortError {
    pub(crate) fn input(path: &Path, source: io::Error) -> SortError {
        SortError::InputUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn output(path: &Path, source: io::Error) -> SortError {
        SortError::OutputUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn temp(path: &Path, source: io::Error) -> SortError {
        SortError::TempUnavailable {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn codec(path: &Path, source: io::Error) -> SortError {
        SortError::Codec {
            path: path.to_path_buf(),
            source,
        }
    }
}

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::SortError;

/// One line aligned byte range of the input file. Unless the range ends at
/// end of file, the byte just before `end` is a newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileRange {
    start: u64,
    end: u64,
}

impl FileRange {
    pub(crate) fn start(&self) -> u64 {
        self.start
    }

    pub(crate) fn len(&self) -> u64 {
        self.end - self.start
    }
}

/// Splits a file into ranges of roughly the configured chunk size whose cuts
/// always fall immediately after a newline: the iterator seeks ahead by the
/// chunk size from each boundary, then reads forward to the next newline (or
/// end of file) to place the following cut. The ranges tile the input
/// exactly.
pub(crate) struct ChunkIterator {
    path: PathBuf,
    reader: BufReader<File>,
    length: u64,
    chunk_size: u64,
    pos: u64,
    probe: Vec<u8>,
}

impl ChunkIterator {
    pub(crate) fn new(path: &Path, chunk_size: u64) -> Result<ChunkIterator, SortError> {
        let length = path
            .metadata()
            .map_err(|e| SortError::input(path, e))?
            .len();
        let file = File::open(path).map_err(|e| SortError::input(path, e))?;
        Ok(ChunkIterator {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            length,
            chunk_size: chunk_size.max(1),
            pos: 0,
            probe: Vec::new(),
        })
    }

    /// Offset of the first byte after the next newline at or beyond
    /// `pos + chunk_size`.
    fn probe_boundary(&mut self) -> Result<u64, SortError> {
        self.reader
            .seek(SeekFrom::Start(self.pos + self.chunk_size))
            .map_err(|e| SortError::input(&self.path, e))?;
        self.probe.clear();
        self.reader
            .read_until(b'\n', &mut self.probe)
            .map_err(|e| SortError::input(&self.path, e))?;
        self.reader
            .stream_position()
            .map_err(|e| SortError::input(&self.path, e))
    }
}

impl Iterator for ChunkIterator {
    type Item = Result<FileRange, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.length {
            return None;
        }
        if self.pos + self.chunk_size >= self.length {
            let range = FileRange {
                start: self.pos,
                end: self.length,
            };
            self.pos = self.length;
            return Some(Ok(range));
        }
        match self.probe_boundary() {
            Ok(boundary) => {
                let boundary = boundary.min(self.length);
                let range = FileRange {
                    start: self.pos,
                    end: boundary,
                };
                self.pos = boundary;
                Some(Ok(range))
            }
            Err(e) => {
                self.pos = self.length;
                Some(Err(e))
            }
        }
    }
}

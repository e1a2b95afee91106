use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use zstd::stream::read::Decoder;

use crate::error::SortError;
use crate::line_record::LineRecord;

enum RunStream {
    Plain(BufReader<File>),
    Compressed(BufReader<Decoder<'static, BufReader<File>>>),
}

impl RunStream {
    fn read_line(&mut self, line: &mut Vec<u8>) -> std::io::Result<usize> {
        match self {
            RunStream::Plain(reader) => reader.read_until(b'\n', line),
            RunStream::Compressed(reader) => reader.read_until(b'\n', line),
        }
    }
}

/// Streams one sorted run as parsed records. The reader owns a single line
/// buffer that is reused for every record, so the current head and its bytes
/// are only valid until the next [`ChunkReader::advance`].
pub(crate) struct ChunkReader {
    path: PathBuf,
    compressed: bool,
    stream: RunStream,
    line: Vec<u8>,
    head: Option<LineRecord>,
}

impl ChunkReader {
    /// Open a run and prime the head with its first record.
    pub(crate) fn open(path: &Path, compressed: bool) -> Result<ChunkReader, SortError> {
        let file = File::open(path).map_err(|e| SortError::temp(path, e))?;
        let stream = if compressed {
            let decoder = Decoder::new(file).map_err(|e| SortError::codec(path, e))?;
            RunStream::Compressed(BufReader::new(decoder))
        } else {
            RunStream::Plain(BufReader::new(file))
        };
        let mut reader = ChunkReader {
            path: path.to_path_buf(),
            compressed,
            stream,
            line: Vec::new(),
            head: None,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// The current record, `None` once the run is exhausted.
    pub(crate) fn head(&self) -> Option<LineRecord> {
        self.head
    }

    /// Bytes backing the current head record.
    pub(crate) fn line_bytes(&self) -> &[u8] {
        &self.line
    }

    /// Read forward to the next well formed record, dropping lines that fail
    /// to parse. Returns false at end of stream.
    pub(crate) fn advance(&mut self) -> Result<bool, SortError> {
        loop {
            self.line.clear();
            let read = match self.stream.read_line(&mut self.line) {
                Ok(read) => read,
                Err(e) if self.compressed => return Err(SortError::codec(&self.path, e)),
                Err(e) => return Err(SortError::temp(&self.path, e)),
            };
            if read == 0 {
                self.head = None;
                return Ok(false);
            }
            if self.line.last() == Some(&b'\n') {
                self.line.pop();
            }
            if let Some(record) = LineRecord::parse(&self.line, 0, self.line.len()) {
                self.head = Some(record);
                return Ok(true);
            }
        }
    }
}

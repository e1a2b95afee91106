use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::config::CANCEL_CHECK_INTERVAL;
use crate::error::SortError;
use crate::line_record::LineRecord;
use crate::sort_command::ChunkingShared;
use crate::sorted_run::SortedRun;

/// Staging buffer in front of every run write; a record larger than this is
/// handed to the file in one write of its own.
pub(crate) const WRITE_STAGING_SIZE: usize = 256 * 1024;
/// Fast zstd level - the temp files only live for one merge pass.
pub(crate) const COMPRESSION_LEVEL: i32 = 1;

/// One sorted chunk handed from a sort worker to the write stage. The job
/// owns the chunk buffer; the writer returns it to the pool when done.
pub(crate) struct WriteJob {
    pub(crate) records: Vec<LineRecord>,
    pub(crate) buffer: Vec<u8>,
    pub(crate) target: PathBuf,
    pub(crate) compress: bool,
}

/// Drain the bounded write queue until every sorter has hung up. Buffers go
/// back to the pool even for jobs that are skipped or fail, so sorters
/// blocked on the queue always get released.
pub(crate) fn write_worker(jobs: Receiver<WriteJob>, shared: Arc<ChunkingShared>) {
    for job in jobs.iter() {
        let WriteJob {
            records,
            buffer,
            target,
            compress,
        } = job;
        if !shared.has_failed() && !shared.cancelled() {
            match write_chunk(&records, &buffer, &target, compress, &shared.cancel) {
                Ok(()) => {
                    log::debug!("wrote run {} ({} records)", target.display(), records.len());
                    shared.add_run(SortedRun::new(target, compress));
                }
                Err(e) => {
                    log::error!("failed to write run {}: {}", target.display(), e);
                    shared.record_failure(e);
                }
            }
        }
        shared.pool.release(buffer);
    }
}

/// Persist one sorted run: every record followed by a newline, the whole
/// stream optionally wrapped in the block codec.
pub(crate) fn write_chunk(
    records: &[LineRecord],
    buffer: &[u8],
    target: &Path,
    compress: bool,
    cancel: &AtomicBool,
) -> Result<(), SortError> {
    let file = File::create(target).map_err(|e| SortError::temp(target, e))?;
    if compress {
        let mut encoder = zstd::stream::write::Encoder::new(
            BufWriter::with_capacity(WRITE_STAGING_SIZE, file),
            COMPRESSION_LEVEL,
        )
        .map_err(|e| SortError::codec(target, e))?;
        write_records(&mut encoder, records, buffer, cancel, &|e| {
            SortError::codec(target, e)
        })?;
        let mut staging = encoder.finish().map_err(|e| SortError::codec(target, e))?;
        staging.flush().map_err(|e| SortError::codec(target, e))?;
    } else {
        let mut staging = BufWriter::with_capacity(WRITE_STAGING_SIZE, file);
        write_records(&mut staging, records, buffer, cancel, &|e| {
            SortError::temp(target, e)
        })?;
        staging.flush().map_err(|e| SortError::temp(target, e))?;
    }
    Ok(())
}

pub(crate) fn write_records<W, F>(
    writer: &mut W,
    records: &[LineRecord],
    buffer: &[u8],
    cancel: &AtomicBool,
    classify: &F,
) -> Result<(), SortError>
where
    W: Write,
    F: Fn(io::Error) -> SortError,
{
    for (n, record) in records.iter().enumerate() {
        if n % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(SortError::Cancelled);
        }
        writer.write_all(record.line_bytes(buffer)).map_err(classify)?;
        writer.write_all(b"\n").map_err(classify)?;
    }
    Ok(())
}

use std::cell::RefCell;
use std::cmp::max;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use command_executor::command::Command;
use crossbeam_channel::Sender;

use crate::buffer_pool::BufferPool;
use crate::chunk_iterator::FileRange;
use crate::chunk_writer::WriteJob;
use crate::config::{Config, CANCEL_CHECK_INTERVAL};
use crate::error::SortError;
use crate::line_record::LineRecord;
use crate::progress::{ProgressFn, SortPhase, SortProgress};
use crate::sorted_run::SortedRun;
use crate::string_number_sort;
use crate::temp_registry::TempFileRegistry;

thread_local! {
    static LINE_RECORDS_CAPACITY: RefCell<usize> = RefCell::new(1);
}

/// Initial guess used to pre-size the record list of the first chunk on each
/// worker thread; afterwards the largest count seen on the thread is reused.
const ESTIMATED_BYTES_PER_LINE: usize = 32;

/// State shared by the sort workers, the writer threads and the
/// orchestrator during the chunking phase.
pub(crate) struct ChunkingShared {
    pub(crate) input: PathBuf,
    pub(crate) config: Config,
    pub(crate) registry: Arc<TempFileRegistry>,
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) compress_runs: bool,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) failed: AtomicBool,
    pub(crate) failure: Mutex<Option<SortError>>,
    pub(crate) finished_runs: Mutex<Vec<SortedRun>>,
    pub(crate) bytes_processed: AtomicU64,
    pub(crate) last_reported: Mutex<u64>,
    pub(crate) total_bytes: u64,
    pub(crate) progress: Option<ProgressFn>,
}

impl ChunkingShared {
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Keep the first failure; later ones only flip the flag again.
    pub(crate) fn record_failure(&self, error: SortError) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.failed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn take_failure(&self) -> Option<SortError> {
        self.failure.lock().unwrap().take()
    }

    pub(crate) fn add_run(&self, run: SortedRun) {
        self.finished_runs.lock().unwrap().push(run);
    }

    /// Reports are serialized and never go backwards, even when workers
    /// finish out of order.
    fn report_chunking(&self, current: u64) {
        if let Some(progress) = &self.progress {
            let mut last = self.last_reported.lock().unwrap();
            if current < *last {
                return;
            }
            *last = current;
            progress(SortProgress {
                phase: SortPhase::Chunking,
                current,
                total: self.total_bytes,
            });
        }
    }
}

/// Sorts one input range: rents a buffer, reads the exact range, parses it
/// into records, runs the in-memory sort and hands the result to the write
/// queue. Blocking on a full queue is the backpressure that keeps the CPU
/// side at most one queue ahead of the writers.
pub(crate) struct SortCommand {
    range: FileRange,
    jobs: Sender<WriteJob>,
    shared: Arc<ChunkingShared>,
}

impl SortCommand {
    pub(crate) fn new(
        range: FileRange,
        jobs: Sender<WriteJob>,
        shared: Arc<ChunkingShared>,
    ) -> SortCommand {
        SortCommand {
            range,
            jobs,
            shared,
        }
    }

    fn sort_range(&self) -> Result<(), SortError> {
        let shared = &self.shared;
        if shared.has_failed() || shared.cancelled() {
            return Ok(());
        }

        let mut buffer = shared.pool.rent(self.range.len() as usize)?;
        let parsed = self
            .read_range(&mut buffer)
            .and_then(|_| self.parse_records(&buffer));
        let mut records = match parsed {
            Ok(records) => records,
            Err(e) => {
                shared.pool.release(buffer);
                return Err(e);
            }
        };

        string_number_sort::sort_records(&mut records, &buffer);

        if records.is_empty() {
            shared.pool.release(buffer);
        } else {
            let job = WriteJob {
                records,
                buffer,
                target: shared.registry.chunk_path(),
                compress: shared.compress_runs,
            };
            if let Err(send_error) = self.jobs.send(job) {
                shared.pool.release(send_error.into_inner().buffer);
                return Err(SortError::WorkerPool {
                    message: "write queue closed before chunking finished".to_string(),
                });
            }
        }

        let processed =
            shared.bytes_processed.fetch_add(self.range.len(), Ordering::Relaxed) + self.range.len();
        shared.report_chunking(processed);
        Ok(())
    }

    fn read_range(&self, buffer: &mut [u8]) -> Result<(), SortError> {
        let path = &self.shared.input;
        let mut file = File::open(path).map_err(|e| SortError::input(path, e))?;
        file.seek(SeekFrom::Start(self.range.start()))
            .map_err(|e| SortError::input(path, e))?;
        file.read_exact(buffer)
            .map_err(|e| SortError::input(path, e))
    }

    fn parse_records(&self, buffer: &[u8]) -> Result<Vec<LineRecord>, SortError> {
        let capacity = max(
            LINE_RECORDS_CAPACITY.with(|c| *c.borrow()),
            buffer.len() / ESTIMATED_BYTES_PER_LINE,
        );
        let mut records: Vec<LineRecord> = Vec::with_capacity(capacity);
        let mut start = 0;
        let mut scanned: usize = 0;
        while start < buffer.len() {
            if scanned % CANCEL_CHECK_INTERVAL == 0 && self.shared.cancelled() {
                return Err(SortError::Cancelled);
            }
            scanned += 1;
            let end = match buffer[start..].iter().position(|&b| b == b'\n') {
                Some(i) => start + i,
                None => buffer.len(),
            };
            match LineRecord::parse(buffer, start, end) {
                Some(record) => records.push(record),
                None if self.shared.config.strict() => {
                    return Err(SortError::MalformedRecord {
                        offset: self.range.start() + start as u64,
                        snippet: snippet(&buffer[start..end]),
                    });
                }
                None => {
                    log::debug!(
                        "dropping malformed record at byte {}",
                        self.range.start() + start as u64
                    );
                }
            }
            start = end + 1;
        }
        LINE_RECORDS_CAPACITY.with(|c| {
            let mut capacity = c.borrow_mut();
            *capacity = max(*capacity, records.len());
        });
        Ok(records)
    }
}

impl Command for SortCommand {
    fn execute(&self) -> Result<(), anyhow::Error> {
        if let Err(e) = self.sort_range() {
            let message = e.to_string();
            self.shared.record_failure(e);
            return Err(anyhow!(message));
        }
        Ok(())
    }
}

fn snippet(bytes: &[u8]) -> String {
    const SNIPPET_LIMIT: usize = 64;
    let shown = &bytes[..bytes.len().min(SNIPPET_LIMIT)];
    String::from_utf8_lossy(shown).into_owned()
}

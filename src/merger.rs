use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use command_executor::command::Command;
use command_executor::shutdown_mode::ShutdownMode;
use command_executor::thread_pool_builder::ThreadPoolBuilder;

use crate::chunk_reader::ChunkReader;
use crate::chunk_writer::{COMPRESSION_LEVEL, WRITE_STAGING_SIZE};
use crate::config::{Config, CANCEL_CHECK_INTERVAL, POOL_QUEUE_SIZE};
use crate::error::SortError;
use crate::line_record;
use crate::loser_tree::LoserTree;
use crate::progress::{ProgressFn, SortPhase, SortProgress};
use crate::sorted_run::SortedRun;
use crate::temp_registry::TempFileRegistry;

struct MergeShared {
    cancel: Arc<AtomicBool>,
    failed: AtomicBool,
    failure: Mutex<Option<SortError>>,
    progress: Option<ProgressFn>,
    runs_consumed: AtomicU64,
    runs_total: AtomicU64,
    last_reported: Mutex<u64>,
}

impl MergeShared {
    fn new(cancel: Arc<AtomicBool>, progress: Option<ProgressFn>, runs: usize) -> MergeShared {
        MergeShared {
            cancel,
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            progress,
            runs_consumed: AtomicU64::new(0),
            runs_total: AtomicU64::new(runs as u64),
            last_reported: Mutex::new(0),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(AtomicOrdering::Relaxed)
    }

    fn has_failed(&self) -> bool {
        self.failed.load(AtomicOrdering::Relaxed)
    }

    fn record_failure(&self, error: SortError) {
        let mut slot = self.failure.lock().unwrap();
        if slot.is_none() {
            *slot = Some(error);
        }
        self.failed.store(true, AtomicOrdering::Relaxed);
    }

    fn take_failure(&self) -> Option<SortError> {
        self.failure.lock().unwrap().take()
    }

    /// Reports are serialized and never go backwards, even when concurrent
    /// batch merges finish out of order.
    fn consumed(&self, count: usize) {
        let current = self
            .runs_consumed
            .fetch_add(count as u64, AtomicOrdering::Relaxed)
            + count as u64;
        if let Some(progress) = &self.progress {
            let mut last = self.last_reported.lock().unwrap();
            if current < *last {
                return;
            }
            *last = current;
            progress(SortProgress {
                phase: SortPhase::Merging,
                current,
                total: self.runs_total.load(AtomicOrdering::Relaxed),
            });
        }
    }
}

/// Merge sorted runs into `output`, in as many passes as the merge width
/// requires. Every pass before the last combines batches of runs into
/// compressed intermediates on a pool of at most `merge_tasks` concurrent
/// merges; the last pass writes the uncompressed output directly. Consumed
/// runs are deleted as soon as their merge finishes.
pub(crate) fn merge_runs(
    mut runs: Vec<SortedRun>,
    output: &Path,
    config: &Config,
    registry: &Arc<TempFileRegistry>,
    cancel: &Arc<AtomicBool>,
    progress: Option<ProgressFn>,
) -> Result<(), SortError> {
    let shared = Arc::new(MergeShared::new(cancel.clone(), progress, runs.len()));

    let mut pass = 0;
    while runs.len() > config.merge_width() {
        log::info!(
            "merge pass {pass}: {} runs, width {}, {} concurrent merges",
            runs.len(),
            config.merge_width(),
            config.merge_tasks()
        );
        let mut builder = ThreadPoolBuilder::new();
        let mut merging_pool = builder
            .with_name("merging".to_string())
            .with_tasks(config.merge_tasks())
            .with_queue_size(POOL_QUEUE_SIZE)
            .with_shutdown_mode(ShutdownMode::CompletePending)
            .build()
            .map_err(|e| SortError::WorkerPool {
                message: e.to_string(),
            })?;

        let mut next = Vec::new();
        for batch in runs.chunks(config.merge_width()) {
            let target = registry.merge_path(pass);
            next.push(SortedRun::new(target.clone(), true));
            merging_pool.submit(Box::new(MergeCommand {
                sources: batch.to_vec(),
                target,
                shared: shared.clone(),
            }));
        }
        merging_pool.shutdown();
        merging_pool.join().map_err(|e| SortError::WorkerPool {
            message: e.to_string(),
        })?;

        if let Some(e) = shared.take_failure() {
            return Err(e);
        }
        if shared.cancelled() {
            return Err(SortError::Cancelled);
        }
        shared
            .runs_total
            .fetch_add(next.len() as u64, AtomicOrdering::Relaxed);
        runs = next;
        pass += 1;
    }

    log::info!("final merge: {} runs into {}", runs.len(), output.display());
    merge_batch(&runs, output, false, &shared)
}

/// One batch merge on the merging pool, writing a compressed intermediate.
struct MergeCommand {
    sources: Vec<SortedRun>,
    target: PathBuf,
    shared: Arc<MergeShared>,
}

impl Command for MergeCommand {
    fn execute(&self) -> Result<(), anyhow::Error> {
        if self.shared.has_failed() || self.shared.cancelled() {
            return Ok(());
        }
        if let Err(e) = merge_batch(&self.sources, &self.target, true, &self.shared) {
            let message = e.to_string();
            self.shared.record_failure(e);
            return Err(anyhow!(message));
        }
        Ok(())
    }
}

/// Merge `sources` into `target` through a loser tree. `compress` also
/// decides whose failure the target's write errors are: intermediates belong
/// to the working directory, the uncompressed final target to the caller.
fn merge_batch(
    sources: &[SortedRun],
    target: &Path,
    compress: bool,
    shared: &MergeShared,
) -> Result<(), SortError> {
    let mut readers = Vec::with_capacity(sources.len());
    for run in sources {
        readers.push(ChunkReader::open(run.path(), run.compressed())?);
    }

    let file = File::create(target).map_err(|e| {
        if compress {
            SortError::temp(target, e)
        } else {
            SortError::output(target, e)
        }
    })?;

    if compress {
        let mut encoder = zstd::stream::write::Encoder::new(
            BufWriter::with_capacity(WRITE_STAGING_SIZE, file),
            COMPRESSION_LEVEL,
        )
        .map_err(|e| SortError::codec(target, e))?;
        merge_into(&mut encoder, &mut readers, shared, &|e| {
            SortError::codec(target, e)
        })?;
        let mut staging = encoder.finish().map_err(|e| SortError::codec(target, e))?;
        staging.flush().map_err(|e| SortError::codec(target, e))?;
    } else {
        let mut staging = BufWriter::with_capacity(WRITE_STAGING_SIZE, file);
        merge_into(&mut staging, &mut readers, shared, &|e| {
            SortError::output(target, e)
        })?;
        staging.flush().map_err(|e| SortError::output(target, e))?;
    }

    for run in sources {
        if let Err(e) = fs::remove_file(run.path()) {
            log::warn!(
                "failed to remove consumed run {}: {}",
                run.path().display(),
                e
            );
        }
    }
    shared.consumed(sources.len());
    Ok(())
}

fn merge_into<W, F>(
    writer: &mut W,
    readers: &mut [ChunkReader],
    shared: &MergeShared,
    classify: &F,
) -> Result<(), SortError>
where
    W: Write,
    F: Fn(io::Error) -> SortError,
{
    let mut tree = LoserTree::new(readers.len());
    for (i, reader) in readers.iter().enumerate() {
        if reader.head().is_some() {
            tree.activate(i);
        }
    }
    tree.build(&mut |a, b| compare_heads(readers, a, b));

    let mut since_check = 0;
    while let Some(winner) = tree.winner() {
        since_check += 1;
        if since_check >= CANCEL_CHECK_INTERVAL {
            since_check = 0;
            if shared.cancelled() {
                return Err(SortError::Cancelled);
            }
        }
        let reader = &readers[winner];
        let record = reader.head().unwrap();
        writer
            .write_all(record.line_bytes(reader.line_bytes()))
            .map_err(classify)?;
        writer.write_all(b"\n").map_err(classify)?;

        if readers[winner].advance()? {
            tree.replace_winner(&mut |a, b| compare_heads(readers, a, b));
        } else {
            tree.deactivate_winner(&mut |a, b| compare_heads(readers, a, b));
        }
    }
    Ok(())
}

fn compare_heads(readers: &[ChunkReader], a: usize, b: usize) -> Ordering {
    let (ra, rb) = (&readers[a], &readers[b]);
    let (ha, hb) = (ra.head().unwrap(), rb.head().unwrap());
    line_record::compare(&ha, ra.line_bytes(), &hb, rb.line_bytes())
}

use std::cmp::{max, Ordering};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread;

use command_executor::shutdown_mode::ShutdownMode;
use command_executor::thread_pool_builder::ThreadPoolBuilder;
use rlimit::{getrlimit, setrlimit, Resource};

use crate::buffer_pool::BufferPool;
use crate::chunk_iterator::{ChunkIterator, FileRange};
use crate::chunk_writer::write_worker;
use crate::config::{self, Config};
use crate::error::SortError;
use crate::line_record::{self, LineRecord};
use crate::merger;
use crate::progress::{ProgressFn, SortPhase, SortProgress};
use crate::sort_command::{ChunkingShared, SortCommand};
use crate::sorted_run::SortedRun;
use crate::temp_registry::TempFileRegistry;

const FALLBACK_TOTAL_MEMORY: u64 = 8 * 1024 * 1024 * 1024;

/// Sort a text file of `<number>. <string>` lines
///
/// Records are ordered by the string bytes, ties by ascending number. The
/// input is consumed in line aligned chunks that are sorted in parallel and
/// spilled to a working directory, then combined by a k-way merge; files many
/// times larger than memory sort in bounded space.
///
/// # Examples
/// ```
/// use std::path::PathBuf;
/// use numbered_text_sort::sort::Sort;
///
/// fn sort_records(input: PathBuf, output: PathBuf, tmp: PathBuf) -> Result<(), numbered_text_sort::error::SortError> {
///     let mut sort = Sort::new(input, output);
///
///     // set the number of CPU cores the sort will attempt to use. The
///     // default is to use all available cores.
///     sort.with_tasks(2);
///
///     // set the directory for intermediate results. The default is the
///     // system temp dir - std::env::temp_dir(), however, for large files it
///     // is recommended to provide a dedicated directory on the same file
///     // system as the output result.
///     sort.with_tmp_dir(tmp);
///
///     // watch the two phases go by
///     sort.with_progress(|p| log::debug!("{:?}", p));
///
///     sort.sort()
/// }
/// ```
pub struct Sort {
    input: PathBuf,
    output: PathBuf,
    tmp: Option<PathBuf>,
    tasks: usize,
    chunk_size_bytes: Option<u64>,
    merge_width: Option<usize>,
    strict: bool,
    progress: Option<ProgressFn>,
    cancel: Arc<AtomicBool>,
}

impl Sort {
    /// Create a default Sort definition.
    ///
    /// * intermediate results go to a unique subdirectory of std::env::temp_dir()
    /// * all available CPU cores are used
    /// * the chunk size is derived from total memory and the core count
    /// * the merge width is derived from the core count
    /// * records that fail to parse are dropped silently
    pub fn new(input: PathBuf, output: PathBuf) -> Sort {
        Sort {
            input,
            output,
            tmp: None,
            tasks: 0,
            chunk_size_bytes: None,
            merge_width: None,
            strict: false,
            progress: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set directory for intermediate files. By default use std::env::temp_dir().
    /// It is recommended for large files to create a dedicated directory for
    /// intermediate files on the same file system as the output target.
    pub fn with_tmp_dir(&mut self, tmp: PathBuf) {
        self.tmp = Some(tmp);
    }

    /// Set the number of tasks. The default is zero which will result in
    /// using all system cores.
    pub fn with_tasks(&mut self, tasks: usize) {
        self.tasks = tasks;
    }

    /// The input will be read in chunks of `chunk_size_bytes` respecting line
    /// boundaries. The default derives the chunk size from total memory and
    /// the task count.
    pub fn with_chunk_size_bytes(&mut self, chunk_size_bytes: u64) {
        self.chunk_size_bytes = Some(chunk_size_bytes);
    }

    /// Set how many sorted runs one merge combines. The default derives the
    /// width from the task count, bounded to keep file handles in check.
    /// Values below 2 are raised to 2.
    pub fn with_merge_width(&mut self, merge_width: usize) {
        self.merge_width = Some(merge_width);
    }

    /// Fail the sort on the first record that does not parse instead of
    /// dropping it.
    pub fn with_strict(&mut self) {
        self.strict = true;
    }

    /// Observe progress of the two phases.
    pub fn with_progress<F>(&mut self, progress: F)
    where
        F: Fn(SortProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
    }

    /// Provide the flag that cancels the sort. Cancellation is cooperative:
    /// the sort stops at the next blocking step, disposes its working
    /// directory and returns [`SortError::Cancelled`].
    pub fn with_cancel_flag(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = cancel;
    }

    /// Sort the input file into the output file.
    pub fn sort(&self) -> Result<(), SortError> {
        let config = self.create_config();
        let saved_limits = raise_open_file_limit(config.merge_width());
        let registry = Arc::new(TempFileRegistry::new(self.tmp.as_deref())?);
        let result = self.run(&config, &registry);
        registry.dispose();
        restore_open_file_limit(saved_limits);
        result
    }

    /// Verify that the input file is already sorted. Records that fail to
    /// parse are skipped, matching what a sort of the file would keep.
    pub fn check(&self) -> Result<bool, SortError> {
        let file = File::open(&self.input).map_err(|e| SortError::input(&self.input, e))?;
        let mut reader = BufReader::new(file);
        let mut line: Vec<u8> = Vec::new();
        let mut previous: Vec<u8> = Vec::new();
        let mut previous_record: Option<LineRecord> = None;
        loop {
            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| SortError::input(&self.input, e))?;
            if read == 0 {
                return Ok(true);
            }
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            let Some(record) = LineRecord::parse(&line, 0, line.len()) else {
                continue;
            };
            if let Some(previous_record) = &previous_record {
                if line_record::compare(previous_record, &previous, &record, &line)
                    == Ordering::Greater
                {
                    return Ok(false);
                }
            }
            std::mem::swap(&mut previous, &mut line);
            previous_record = Some(record);
        }
    }

    fn run(&self, config: &Config, registry: &Arc<TempFileRegistry>) -> Result<(), SortError> {
        log::info!(
            "start sorting {} into {}",
            self.input.display(),
            self.output.display()
        );
        let input_len = self
            .input
            .metadata()
            .map_err(|e| SortError::input(&self.input, e))?
            .len();
        if input_len == 0 {
            File::create(&self.output).map_err(|e| SortError::output(&self.output, e))?;
            self.report(SortPhase::Done, 0, 0);
            return Ok(());
        }

        let runs = self.chunking_phase(config, registry, input_len)?;
        merger::merge_runs(
            runs,
            &self.output,
            config,
            registry,
            &self.cancel,
            self.progress.clone(),
        )?;
        if self.cancelled() {
            return Err(SortError::Cancelled);
        }

        self.report(SortPhase::Done, input_len, input_len);
        log::info!("finish sorting {}", self.input.display());
        Ok(())
    }

    /// Phase one: split the input into line aligned ranges, sort them on the
    /// worker pool and spill each sorted run through the bounded write queue.
    /// The queue capacity times the chunk size is the phase's memory ceiling.
    fn chunking_phase(
        &self,
        config: &Config,
        registry: &Arc<TempFileRegistry>,
        input_len: u64,
    ) -> Result<Vec<SortedRun>, SortError> {
        let ranges = ChunkIterator::new(&self.input, config.chunk_size_bytes())?
            .collect::<Result<Vec<FileRange>, SortError>>()?;
        // single pass merges read the runs exactly once, so compressing them
        // buys nothing; multi pass runs live longer and stay compressed
        let compress_runs = ranges.len() > config.merge_width();
        log::info!(
            "chunking phase: {} ranges of <= {} bytes, {} tasks, {} writers, compress runs: {}",
            ranges.len(),
            config.chunk_size_bytes(),
            config.tasks(),
            config.writer_tasks(),
            compress_runs
        );

        let buffer_limit = config.tasks() + config.queue_capacity() + config.writer_tasks();
        let shared = Arc::new(ChunkingShared {
            input: self.input.clone(),
            config: config.clone(),
            registry: registry.clone(),
            pool: Arc::new(BufferPool::new(buffer_limit)),
            compress_runs,
            cancel: self.cancel.clone(),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            finished_runs: Mutex::new(Vec::new()),
            bytes_processed: AtomicU64::new(0),
            last_reported: Mutex::new(0),
            total_bytes: input_len,
            progress: self.progress.clone(),
        });

        let (job_sender, job_receiver) =
            crossbeam_channel::bounded(config.queue_capacity());

        thread::scope(|scope| -> Result<(), SortError> {
            for i in 0..config.writer_tasks() {
                let jobs = job_receiver.clone();
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("chunk-writer-{i}"))
                    .spawn_scoped(scope, move || write_worker(jobs, shared))
                    .map_err(|e| SortError::WorkerPool {
                        message: format!("failed to spawn writer: {e}"),
                    })?;
            }
            drop(job_receiver);

            let mut builder = ThreadPoolBuilder::new();
            let mut sorting_pool = builder
                .with_name("sorting".to_string())
                .with_tasks(config.tasks())
                .with_queue_size(config::POOL_QUEUE_SIZE)
                .with_shutdown_mode(ShutdownMode::CompletePending)
                .with_join_error_handler(|name, message| {
                    log::error!("thread {name} ended with an error {message}");
                })
                .build()
                .map_err(|e| SortError::WorkerPool {
                    message: e.to_string(),
                })?;

            for range in ranges {
                if shared.has_failed() || self.cancelled() {
                    break;
                }
                sorting_pool.submit(Box::new(SortCommand::new(
                    range,
                    job_sender.clone(),
                    shared.clone(),
                )));
            }
            drop(job_sender);
            sorting_pool.shutdown();
            sorting_pool.join().map_err(|e| SortError::WorkerPool {
                message: e.to_string(),
            })?;
            Ok(())
        })?;

        if let Some(e) = shared.take_failure() {
            if self.cancelled() {
                return Err(SortError::Cancelled);
            }
            return Err(e);
        }
        if self.cancelled() {
            return Err(SortError::Cancelled);
        }

        let runs = std::mem::take(&mut *shared.finished_runs.lock().unwrap());
        log::info!("chunking phase produced {} sorted runs", runs.len());
        Ok(runs)
    }

    fn create_config(&self) -> Config {
        let tasks = if self.tasks == 0 {
            num_cpus::get()
        } else {
            self.tasks
        };
        let chunk_size_bytes = match self.chunk_size_bytes {
            Some(size) => size.max(1),
            None => default_chunk_size(tasks),
        };
        let merge_width = match self.merge_width {
            Some(width) => max(width, 2),
            None => (tasks * 4).clamp(config::MIN_MERGE_WIDTH, config::MAX_MERGE_WIDTH),
        };
        let queue_capacity = max(2, tasks / 2);
        let writer_tasks = (tasks / 4).clamp(1, 4);
        let merge_tasks = max(1, tasks / 2);
        Config::new(
            tasks,
            chunk_size_bytes,
            merge_width,
            queue_capacity,
            writer_tasks,
            merge_tasks,
            self.strict,
        )
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(AtomicOrdering::Relaxed)
    }

    fn report(&self, phase: SortPhase, current: u64, total: u64) {
        if let Some(progress) = &self.progress {
            progress(SortProgress {
                phase,
                current,
                total,
            });
        }
    }
}

fn default_chunk_size(tasks: usize) -> u64 {
    let budget = (total_memory() as f64 * config::MEMORY_USAGE_RATIO / tasks as f64) as u64;
    budget.clamp(config::MIN_CHUNK_SIZE, config::MAX_CHUNK_SIZE)
}

#[cfg(unix)]
fn total_memory() -> u64 {
    // SAFETY: sysconf only reads kernel configuration
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages > 0 && page_size > 0 {
        pages as u64 * page_size as u64
    } else {
        FALLBACK_TOTAL_MEMORY
    }
}

#[cfg(not(unix))]
fn total_memory() -> u64 {
    FALLBACK_TOTAL_MEMORY
}

/// Raise the open file limit to cover the merge fan-in plus headroom.
/// Returns the limits to restore, `None` when nothing was changed. A refusal
/// is logged and ignored - the width clamp keeps the handle count modest.
fn raise_open_file_limit(merge_width: usize) -> Option<(u64, u64)> {
    let (soft, hard) = match getrlimit(Resource::NOFILE) {
        Ok(limits) => limits,
        Err(e) => {
            log::warn!("failed to query rlimit NOFILE: {e}");
            return None;
        }
    };
    let needed = (merge_width + 256) as u64;
    if needed <= soft {
        return None;
    }
    let new_soft = needed.min(hard);
    log::info!("raise rlimit NOFILE, soft: {soft} -> {new_soft}, hard: {hard}");
    match setrlimit(Resource::NOFILE, new_soft, hard) {
        Ok(()) => Some((soft, hard)),
        Err(e) => {
            log::warn!("failed to raise rlimit NOFILE: {e}");
            None
        }
    }
}

fn restore_open_file_limit(saved: Option<(u64, u64)>) {
    if let Some((soft, hard)) = saved {
        log::info!("restore rlimit NOFILE, soft: {soft}, hard: {hard}");
        if let Err(e) = setrlimit(Resource::NOFILE, soft, hard) {
            log::warn!("failed to restore rlimit NOFILE: {e}");
        }
    }
}

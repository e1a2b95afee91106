use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Error};
use benchmark_rs::benchmarks::Benchmarks;
use benchmark_rs::stopwatch::StopWatch;
use data_encoding::HEXLOWER;
use simple_logger::SimpleLogger;

use numbered_text_sort::generator;
use numbered_text_sort::sort::Sort;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Clone)]
pub struct BenchmarkConfig {
    files: BTreeMap<usize, PathBuf>,
    bench_results_dir: PathBuf,
    bench_tmp_dir: PathBuf,
    tasks: usize,
    chunk_size_bytes: u64,
    merge_width: Option<usize>,
    description: String,
}

impl BenchmarkConfig {
    pub fn new(
        files: BTreeMap<usize, PathBuf>,
        bench_results_dir: PathBuf,
        bench_tmp_dir: PathBuf,
        tasks: usize,
        chunk_size_bytes: u64,
        merge_width: Option<usize>,
        description: &str,
    ) -> BenchmarkConfig {
        BenchmarkConfig {
            files,
            bench_results_dir,
            bench_tmp_dir,
            tasks,
            chunk_size_bytes,
            merge_width,
            description: description.to_string(),
        }
    }

    pub fn get_input_path(&self, key: usize) -> PathBuf {
        self.files.get(&key).unwrap().clone()
    }

    pub fn bench_results_dir(&self) -> &PathBuf {
        &self.bench_results_dir
    }

    pub fn bench_tmp_dir(&self) -> &PathBuf {
        &self.bench_tmp_dir
    }

    pub fn tasks(&self) -> usize {
        self.tasks
    }

    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_bytes
    }

    pub fn merge_width(&self) -> Option<usize> {
        self.merge_width
    }
}

impl Display for BenchmarkConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "tasks: {}, chunk size: {}, merge width: {:?}, description: {}",
            self.tasks, self.chunk_size_bytes, self.merge_width, self.description,
        )
    }
}

fn temp_file_name(dir: &PathBuf) -> PathBuf {
    let mut result = PathBuf::from(dir);
    let name = HEXLOWER.encode(&rand::random::<[u8; 16]>());
    result.push(name);
    result
}

fn setup(
    bench_input_dir: &PathBuf,
    bench_results_dir: &PathBuf,
    bench_tmp_dir: &PathBuf,
) -> Result<(), anyhow::Error> {
    if bench_results_dir.exists() {
        fs::remove_dir_all(bench_results_dir.clone())
            .with_context(|| anyhow!("{}", bench_results_dir.to_string_lossy()))?;
    }
    for dir in [bench_input_dir, bench_results_dir, bench_tmp_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir.clone())
                .with_context(|| anyhow!("{}", dir.to_string_lossy()))?;
        }
    }
    Ok(())
}

fn create_input_files(
    count: usize,
    factor: u64,
    base_path: PathBuf,
) -> Result<BTreeMap<usize, PathBuf>, anyhow::Error> {
    let mut files: BTreeMap<usize, PathBuf> = BTreeMap::new();
    for i in 1..=count {
        let number_of_lines = i as u64 * factor;
        let path = base_path.join(PathBuf::from(number_of_lines.to_string()));
        if !path.exists() {
            generator::generate_file(&path, number_of_lines, number_of_lines)
                .with_context(|| anyhow!("path: {}", path.to_string_lossy()))?;
        }
        files.insert(number_of_lines as usize, path);
    }
    Ok(files)
}

fn sort(
    stop_watch: &mut StopWatch,
    config: BenchmarkConfig,
    work: usize,
) -> Result<(), anyhow::Error> {
    stop_watch.pause();
    let input_path = config.get_input_path(work);
    let output_path = temp_file_name(config.bench_results_dir());
    log::info!("Start sorting {}", input_path.to_string_lossy());
    stop_watch.resume();
    let mut text_file_sort = Sort::new(input_path.clone(), output_path.clone());
    text_file_sort.with_tmp_dir(config.bench_tmp_dir().clone());
    text_file_sort.with_tasks(config.tasks());
    text_file_sort.with_chunk_size_bytes(config.chunk_size_bytes());
    if let Some(width) = config.merge_width() {
        text_file_sort.with_merge_width(width);
    }
    text_file_sort.sort()?;
    stop_watch.pause();
    log::info!("Finish sorting {}", input_path.to_string_lossy());
    fs::remove_file(output_path.clone())
        .with_context(|| anyhow!("{}", output_path.to_string_lossy()))?;
    Ok(())
}

#[test]
fn text_file_sort_bench() -> Result<(), Error> {
    SimpleLogger::new().init().unwrap();
    log::info!("Started text_file_sort_bench.");

    let bench_input_dir = PathBuf::from("./target/benchmarks/input");
    let bench_results_dir = PathBuf::from("./target/benchmarks/results");
    let bench_tmp_dir = PathBuf::from("./target/benchmarks/results/tmp");
    setup(&bench_input_dir, &bench_results_dir, &bench_tmp_dir)?;

    let small_files = create_input_files(10, 10_000, bench_input_dir.clone())?;
    let large_files = create_input_files(10, 100_000, bench_input_dir.clone())?;

    let mut benchmarks = Benchmarks::new("numbered-text-sort");

    for tasks in [1, 2, 4, 8] {
        benchmarks.add(
            format!("small-files-{tasks}-tasks").as_str(),
            sort,
            BenchmarkConfig::new(
                small_files.clone(),
                bench_results_dir.clone(),
                bench_tmp_dir.clone(),
                tasks,
                1_000_000,
                None,
                "small files",
            ),
            small_files.keys().cloned().collect(),
            3,
            0,
        )?;

        benchmarks.add(
            format!("large-files-{tasks}-tasks").as_str(),
            sort,
            BenchmarkConfig::new(
                large_files.clone(),
                bench_results_dir.clone(),
                bench_tmp_dir.clone(),
                tasks,
                1_000_000,
                None,
                "large files",
            ),
            large_files.keys().cloned().collect(),
            3,
            0,
        )?;

        // a narrow width forces multi pass merging
        benchmarks.add(
            format!("large-files-{tasks}-tasks-multipass").as_str(),
            sort,
            BenchmarkConfig::new(
                large_files.clone(),
                bench_results_dir.clone(),
                bench_tmp_dir.clone(),
                tasks,
                1_000_000,
                Some(4),
                "large files, width 4",
            ),
            large_files.keys().cloned().collect(),
            3,
            0,
        )?;
    }

    benchmarks.run()?;
    benchmarks.save_to_csv(PathBuf::from("./target/benchmarks/"), true, true)?;
    benchmarks.save_to_json(PathBuf::from("./target/benchmarks/"))?;

    log::info!("Finished text_file_sort_bench.");
    Ok(())
}

use std::path::PathBuf;

use anyhow::Error;
use simple_logger::SimpleLogger;

use numbered_text_sort::byte_size;
use numbered_text_sort::generator;
use numbered_text_sort::progress::SortProgress;
use numbered_text_sort::sort::Sort;

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// cargo run -r --example sort_numbered_file
pub fn main() -> Result<(), Error> {
    SimpleLogger::new().init()?;

    let input_path = PathBuf::from("./target/demo-input.dat");
    let output_path = PathBuf::from("./target/demo-sorted.dat");
    let tmp_path = PathBuf::from("./target/");

    log::info!("generating {}", input_path.display());
    generator::generate_file(&input_path, 200_000, 42)?;

    let mut sort = Sort::new(input_path, output_path.clone());
    sort.with_tasks(2);
    sort.with_chunk_size_bytes(byte_size::parse("1MB")?);
    sort.with_tmp_dir(tmp_path);
    sort.with_progress(|p: SortProgress| {
        log::info!("{:?}: {} / {}", p.phase, p.current, p.total);
    });
    sort.sort()?;

    let check = Sort::new(output_path.clone(), PathBuf::from("./target/unused"));
    assert!(check.check()?);
    log::info!("{} is sorted", output_path.display());
    Ok(())
}

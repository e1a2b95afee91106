use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use numbered_text_sort::error::SortError;
use numbered_text_sort::generator;
use numbered_text_sort::progress::{SortPhase, SortProgress};
use numbered_text_sort::sort::Sort;

mod common;

#[test]
fn test_tiny_five_record_sort() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    fs::write(
        &input_path,
        "5. Banana\n1. Apple\n3. Apple\n2. Cherry\n4. Banana\n",
    )?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.sort()?;

    assert_eq!(
        fs::read_to_string(&output_path)?,
        "1. Apple\n3. Apple\n4. Banana\n5. Banana\n2. Cherry\n"
    );
    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

#[test]
fn test_empty_input() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    fs::write(&input_path, "")?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.sort()?;

    assert_eq!(fs::read(&output_path)?, b"");
    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

#[test]
fn test_single_record_without_trailing_newline() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    fs::write(&input_path, "42. Single Line")?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.sort()?;

    assert_eq!(fs::read_to_string(&output_path)?, "42. Single Line\n");
    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

#[test]
fn test_forced_multi_chunk() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    generator::generate_file(&input_path, 1000, 17)?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tasks(2);
    sort.with_chunk_size_bytes(1024);
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.sort()?;

    let output_lines = common::read_lines(output_path.clone())?;
    assert_eq!(output_lines.len(), 1000);
    assert_eq!(
        common::sorted_lines(input_path.clone())?,
        common::sorted_lines(output_path.clone())?
    );
    let check = Sort::new(output_path.clone(), common::temp_file_name("./target/results/"));
    assert!(check.check()?);

    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

#[test]
fn test_sort_is_idempotent() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let once_path = common::temp_file_name("./target/results/");
    let twice_path = common::temp_file_name("./target/results/");
    generator::generate_file(&input_path, 500, 23)?;

    let mut first = Sort::new(input_path.clone(), once_path.clone());
    first.with_tasks(2);
    first.with_chunk_size_bytes(2048);
    first.with_tmp_dir(PathBuf::from("./target/results/"));
    first.sort()?;

    let mut second = Sort::new(once_path.clone(), twice_path.clone());
    second.with_tasks(2);
    second.with_chunk_size_bytes(2048);
    second.with_tmp_dir(PathBuf::from("./target/results/"));
    second.sort()?;

    assert_eq!(fs::read(&once_path)?, fs::read(&twice_path)?);
    fs::remove_file(input_path)?;
    fs::remove_file(once_path)?;
    fs::remove_file(twice_path)?;
    Ok(())
}

#[test]
fn test_chunk_size_does_not_change_the_output() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let small_chunks_path = common::temp_file_name("./target/results/");
    let large_chunks_path = common::temp_file_name("./target/results/");
    generator::generate_file(&input_path, 800, 5)?;

    let mut small_chunks = Sort::new(input_path.clone(), small_chunks_path.clone());
    small_chunks.with_tasks(4);
    small_chunks.with_chunk_size_bytes(1024);
    small_chunks.with_tmp_dir(PathBuf::from("./target/results/"));
    small_chunks.sort()?;

    let mut large_chunks = Sort::new(input_path.clone(), large_chunks_path.clone());
    large_chunks.with_tasks(1);
    large_chunks.with_chunk_size_bytes(64 * 1024);
    large_chunks.with_tmp_dir(PathBuf::from("./target/results/"));
    large_chunks.sort()?;

    assert_eq!(
        fs::read(&small_chunks_path)?,
        fs::read(&large_chunks_path)?
    );
    fs::remove_file(input_path)?;
    fs::remove_file(small_chunks_path)?;
    fs::remove_file(large_chunks_path)?;
    Ok(())
}

#[test]
fn test_malformed_records_are_dropped() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    fs::write(
        &input_path,
        "not a record\n5. Banana\n1. Apple\nbad. number\n2. Cherry\n\n10.missing space\n",
    )?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.sort()?;

    assert_eq!(
        fs::read_to_string(&output_path)?,
        "1. Apple\n5. Banana\n2. Cherry\n"
    );
    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

#[test]
fn test_strict_mode_surfaces_malformed_records() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    fs::write(&input_path, "1. fine\nnot a record\n2. also fine\n")?;

    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_strict();
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    let result = sort.sort();

    match result {
        Err(SortError::MalformedRecord { offset, snippet }) => {
            assert_eq!(offset, 8);
            assert_eq!(snippet, "not a record");
        }
        other => panic!("expected a malformed record failure, got {other:?}"),
    }
    fs::remove_file(input_path)?;
    Ok(())
}

#[test]
fn test_progress_is_monotonic_and_phased() -> Result<(), anyhow::Error> {
    common::setup();
    let input_path = common::temp_file_name("./target/results/");
    let output_path = common::temp_file_name("./target/results/");
    generator::generate_file(&input_path, 1000, 31)?;

    let events: Arc<Mutex<Vec<SortProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut sort = Sort::new(input_path.clone(), output_path.clone());
    sort.with_tasks(2);
    sort.with_chunk_size_bytes(1024);
    sort.with_tmp_dir(PathBuf::from("./target/results/"));
    sort.with_progress(move |p| sink.lock().unwrap().push(p));
    sort.sort()?;

    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    assert_eq!(events.last().unwrap().phase, SortPhase::Done);

    let mut phase = SortPhase::Chunking;
    let mut current = 0;
    for event in events.iter() {
        if event.phase != phase {
            // phases only move forward
            match (phase, event.phase) {
                (SortPhase::Chunking, SortPhase::Merging)
                | (SortPhase::Chunking, SortPhase::Done)
                | (SortPhase::Merging, SortPhase::Done) => {
                    phase = event.phase;
                    current = 0;
                }
                transition => panic!("unexpected phase transition {transition:?}"),
            }
        }
        assert!(
            event.current >= current,
            "progress went backwards within {phase:?}"
        );
        current = event.current;
    }

    fs::remove_file(input_path)?;
    fs::remove_file(output_path)?;
    Ok(())
}

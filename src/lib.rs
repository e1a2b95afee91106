//! This crate implements an external merge sort for text files composed of
//! `<number>. <string>` lines, for example `42. Single Line`. Records are
//! ordered by the string part, compared byte-wise, with ties broken by the
//! ascending numeric value of the number part.
//!
//! The implementation targets files many times larger than available memory.
//! The input is split at line boundaries into chunks that are read, parsed
//! and sorted in parallel while dedicated writer tasks spill the sorted runs
//! to a working directory behind a bounded queue; the runs are then combined
//! by a k-way tournament merge, in several passes over compressed
//! intermediates when the fan-in exceeds the merge width. Memory use stays
//! proportional to the chunk size times the queue depth, independent of the
//! input size.
//!
//! # Examples
//! ```
//! use std::path::PathBuf;
//! use numbered_text_sort::sort::Sort;
//!
//! // optimized for use with Jemalloc
//! use tikv_jemallocator::Jemalloc;
//! #[global_allocator]
//! static GLOBAL: Jemalloc = Jemalloc;
//!
//! // parallel external sort
//! fn sort_records(input: PathBuf, output: PathBuf, tmp: PathBuf) -> Result<(), numbered_text_sort::error::SortError> {
//!    let mut sort = Sort::new(input, output);
//!
//!     // set number of CPU cores the sort will attempt to use. The default
//!     // is to use all available cores.
//!     sort.with_tasks(2);
//!
//!     // set the directory for intermediate results. The default is the
//!     // system temp dir - std::env::temp_dir(), however, for large files it
//!     // is recommended to provide a dedicated directory for intermediate
//!     // files, preferably on the same file system as the output result.
//!     sort.with_tmp_dir(tmp);
//!
//!     sort.sort()
//! }
//! ```

pub(crate) mod buffer_pool;
pub(crate) mod chunk_iterator;
pub(crate) mod chunk_reader;
pub(crate) mod chunk_writer;
pub(crate) mod config;
pub(crate) mod line_record;
pub(crate) mod loser_tree;
pub(crate) mod merger;
pub(crate) mod sort_command;
pub(crate) mod sorted_run;
pub(crate) mod string_number_sort;
pub(crate) mod temp_registry;

pub mod byte_size;
pub mod error;
pub mod generator;
pub mod progress;
pub mod sort;

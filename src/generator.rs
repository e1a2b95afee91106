//! Deterministic generator for `<number>. <string>` test files.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use data_encoding::HEXLOWER;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Heavily repeated string pool. Large generated files end up with long runs
/// of records sharing a string and differing only by number, the shape the
/// in-memory sort is tuned for.
const WORDS: &[&str] = &[
    "Apple",
    "Banana",
    "Cherry",
    "Mango",
    "Peach",
    "Pear",
    "Plum",
    "Quince",
    "Something something something",
    "The quick brown fox",
    "Lorem ipsum dolor sit amet",
];

const MAX_NUMBER: u64 = 10_000_000_000;

/// Write `records` pseudo random records to `path`. The same seed produces
/// the same file. Roughly one record in sixteen gets a unique hex string so
/// the duplicate runs stay interleaved with distinct keys.
pub fn generate_file(path: &Path, records: u64, seed: u64) -> Result<(), io::Error> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut writer = BufWriter::new(File::create(path)?);
    for _ in 0..records {
        let number = rng.gen_range(0..MAX_NUMBER);
        if rng.gen_ratio(1, 16) {
            let unique = HEXLOWER.encode(&rng.gen::<[u8; 8]>());
            writeln!(writer, "{number}. {unique}")?;
        } else {
            let word = WORDS[rng.gen_range(0..WORDS.len())];
            writeln!(writer, "{number}. {word}")?;
        }
    }
    writer.flush()
}

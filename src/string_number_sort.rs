use std::cmp::Ordering;

use crate::line_record::{self, LineRecord};

const INSERTION_SORT_THRESHOLD: usize = 32;
const MAX_DEPTH: u32 = 64;

/// Sort the records of one chunk buffer.
///
/// Three way quicksort keyed on the string part: a Dutch national flag
/// partition splits the slice into strictly-less, equal and strictly-greater
/// regions in one pass, so a run of records sharing a string is ordered once
/// by the cheap numeric compare instead of re-scanning the string for every
/// comparison.
pub(crate) fn sort_records(records: &mut [LineRecord], buf: &[u8]) {
    quicksort(records, buf, 0);
}

fn quicksort(records: &mut [LineRecord], buf: &[u8], mut depth: u32) {
    let mut records = records;
    loop {
        if records.len() <= INSERTION_SORT_THRESHOLD {
            insertion_sort(records, buf);
            return;
        }
        if depth >= MAX_DEPTH {
            // pathological pivot runs: hand the remainder to the stdlib sort
            records.sort_unstable_by(|a, b| line_record::compare(a, buf, b, buf));
            return;
        }
        let pivot = median_of_three(records, buf);
        let (lt, gt) = partition(records, buf, &pivot);
        records[lt..gt].sort_unstable_by_key(LineRecord::number_value);

        let (left, rest) = records.split_at_mut(lt);
        let (_, right) = rest.split_at_mut(gt - lt);
        // recurse into the smaller side, iterate on the larger
        if left.len() <= right.len() {
            quicksort(left, buf, depth + 1);
            records = right;
        } else {
            quicksort(right, buf, depth + 1);
            records = left;
        }
        depth += 1;
    }
}

/// Dutch national flag partition by the string part. Returns `(lt, gt)` such
/// that `[..lt]` is strictly less than the pivot string, `[lt..gt]` equal and
/// `[gt..]` strictly greater.
fn partition(records: &mut [LineRecord], buf: &[u8], pivot: &LineRecord) -> (usize, usize) {
    let mut lt = 0;
    let mut i = 0;
    let mut gt = records.len();
    while i < gt {
        match records[i].string_bytes(buf).cmp(pivot.string_bytes(buf)) {
            Ordering::Less => {
                records.swap(lt, i);
                lt += 1;
                i += 1;
            }
            Ordering::Greater => {
                gt -= 1;
                records.swap(i, gt);
            }
            Ordering::Equal => i += 1,
        }
    }
    (lt, gt)
}

fn median_of_three(records: &[LineRecord], buf: &[u8]) -> LineRecord {
    let a = records[0];
    let b = records[records.len() / 2];
    let c = records[records.len() - 1];
    let a_key = a.string_bytes(buf);
    let b_key = b.string_bytes(buf);
    let c_key = c.string_bytes(buf);
    if a_key < b_key {
        if b_key < c_key {
            b
        } else if a_key < c_key {
            c
        } else {
            a
        }
    } else if a_key < c_key {
        a
    } else if b_key < c_key {
        c
    } else {
        b
    }
}

fn insertion_sort(records: &mut [LineRecord], buf: &[u8]) {
    for i in 1..records.len() {
        let mut j = i;
        while j > 0
            && line_record::compare(&records[j - 1], buf, &records[j], buf) == Ordering::Greater
        {
            records.swap(j - 1, j);
            j -= 1;
        }
    }
}

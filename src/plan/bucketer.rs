//! Size-balancing assignment of files to buckets and buckets to partitions
//!
//! Both levels use the same greedy rule: take items largest first (stable,
//! so equal sizes keep their input order) and drop each into the currently
//! lightest bin, lowest index on ties.

use super::scanner::{DirectoryScan, SourceFile};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Distribute `sizes` across `bins` bins
///
/// Returns one entry per bin holding the indices of its items in ascending
/// order. Bins may be empty when there are fewer items than bins.
pub fn balance(sizes: &[u64], bins: usize) -> Vec<Vec<usize>> {
    let mut assignment = vec![Vec::new(); bins];
    if bins == 0 {
        return assignment;
    }

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by_key(|&i| Reverse(sizes[i]));

    let mut heap: BinaryHeap<Reverse<(u64, usize)>> =
        (0..bins).map(|bin| Reverse((0u64, bin))).collect();

    for item in order {
        if let Some(Reverse((total, bin))) = heap.pop() {
            assignment[bin].push(item);
            heap.push(Reverse((total + sizes[item], bin)));
        }
    }

    for items in &mut assignment {
        items.sort_unstable();
    }
    assignment
}

/// ceil(ceil(bytes / block_size) / max_blocks)
pub fn bucket_count(bytes: u64, block_size: u64, max_blocks: u64) -> u64 {
    if bytes == 0 {
        return 0;
    }
    bytes.div_ceil(block_size).div_ceil(max_blocks)
}

/// Group a directory's crushable files into size-bounded buckets
///
/// Returns no buckets when the directory has no crushable bytes, or when it
/// would yield one bucket holding one file and `include_single_file` is off.
pub fn plan_directory(
    scan: &DirectoryScan,
    block_size: u64,
    max_blocks: u64,
    include_single_file: bool,
) -> Vec<Vec<SourceFile>> {
    let files = &scan.crushable;
    let count = bucket_count(scan.crushable_bytes(), block_size, max_blocks)
        .min(files.len() as u64) as usize;

    if count == 0 || (count == 1 && files.len() == 1 && !include_single_file) {
        return Vec::new();
    }

    let sizes: Vec<u64> = files.iter().map(|f| f.len).collect();
    balance(&sizes, count)
        .into_iter()
        .filter(|bin| !bin.is_empty())
        .map(|bin| bin.into_iter().map(|i| files[i].clone()).collect())
        .collect()
}

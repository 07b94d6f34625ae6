// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BinaryHeap;
use std::cmp::Reverse;

use crate::reads::AlignedRead;

/// Caps per-position read depth before likelihood computation. Depths above
/// `trigger_depth` are thinned to `target_depth`, keeping a deterministic
/// left-to-right spread.
#[derive(Clone, Copy, Debug)]
pub struct Downsampler {
    trigger_depth: usize,
    target_depth: usize,
}

impl Downsampler {
    pub fn new(trigger_depth: usize, target_depth: usize) -> Self {
        assert!(target_depth >= 1 && target_depth <= trigger_depth);
        Downsampler {
            trigger_depth,
            target_depth,
        }
    }

    pub fn downsample(&self, mut reads: Vec<AlignedRead>) -> Vec<AlignedRead> {
        reads.sort_by(|a, b| a.region().cmp(b.region()));
        if max_depth(&reads) <= self.trigger_depth {
            return reads;
        }
        // Greedy sweep: admit a read only while the depth at its start stays
        // under the target.
        let mut kept = Vec::with_capacity(reads.len());
        let mut active: BinaryHeap<Reverse<u64>> = BinaryHeap::new();
        for read in reads {
            while let Some(&Reverse(end)) = active.peek() {
                if end <= read.region().begin() {
                    active.pop();
                } else {
                    break;
                }
            }
            if active.len() < self.target_depth {
                active.push(Reverse(read.region().end()));
                kept.push(read);
            }
        }
        kept
    }
}

fn max_depth(reads: &[AlignedRead]) -> usize {
    let mut active: BinaryHeap<Reverse<u64>> = BinaryHeap::new();
    let mut result = 0;
    for read in reads {
        while let Some(&Reverse(end)) = active.peek() {
            if end <= read.region().begin() {
                active.pop();
            } else {
                break;
            }
        }
        active.push(Reverse(read.region().end()));
        result = result.max(active.len());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reads::tests::read;
    use crate::types::GenomicRegion;

    fn stacked_reads(n: usize) -> Vec<AlignedRead> {
        (0..n)
            .map(|i| {
                read(
                    "s",
                    &format!("r{}", i),
                    GenomicRegion::new("1", 0, 10),
                    b"ACGTACGTAC",
                )
            })
            .collect()
    }

    #[test]
    fn test_below_trigger_untouched() {
        let downsampler = Downsampler::new(10, 5);
        assert_eq!(downsampler.downsample(stacked_reads(10)).len(), 10);
    }

    #[test]
    fn test_above_trigger_thins_to_target() {
        let downsampler = Downsampler::new(10, 5);
        assert_eq!(downsampler.downsample(stacked_reads(50)).len(), 5);
    }

    #[test]
    fn test_disjoint_reads_kept() {
        let downsampler = Downsampler::new(2, 1);
        let reads = vec![
            read("s", "a", GenomicRegion::new("1", 0, 10), b"ACGTACGTAC"),
            read("s", "b", GenomicRegion::new("1", 20, 30), b"ACGTACGTAC"),
            read("s", "c", GenomicRegion::new("1", 0, 10), b"ACGTACGTAC"),
            read("s", "d", GenomicRegion::new("1", 0, 10), b"ACGTACGTAC"),
        ];
        let kept = downsampler.downsample(reads);
        // One of the stacked reads plus the disjoint one.
        assert_eq!(kept.len(), 2);
    }
}

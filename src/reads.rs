// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::Result;
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::types::{GenomicRegion, NucleotideSequence, Variant};
use crate::SampleName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CigarOp {
    Match(u32),
    Insertion(u32),
    Deletion(u32),
    SoftClip(u32),
}

impl CigarOp {
    /// Number of read bases consumed by this operation.
    pub fn read_len(&self) -> u32 {
        match self {
            CigarOp::Match(l) | CigarOp::Insertion(l) | CigarOp::SoftClip(l) => *l,
            CigarOp::Deletion(_) => 0,
        }
    }

    /// Number of reference bases consumed by this operation.
    pub fn ref_len(&self) -> u32 {
        match self {
            CigarOp::Match(l) | CigarOp::Deletion(l) => *l,
            CigarOp::Insertion(_) | CigarOp::SoftClip(_) => 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFlags {
    pub is_paired: bool,
    pub is_duplicate: bool,
    pub is_secondary: bool,
    pub is_supplementary: bool,
    pub is_reverse_strand: bool,
}

/// An aligned sequencing read as handed over by the (external) read
/// ingestion layer.
#[derive(Clone, Debug, Builder, Getters, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct AlignedRead {
    name: String,
    sample: SampleName,
    /// Mapped reference region of the alignment.
    region: GenomicRegion,
    sequence: NucleotideSequence,
    base_qualities: Vec<u8>,
    mapping_quality: u8,
    #[builder(default)]
    cigar: Vec<CigarOp>,
    #[builder(default)]
    flags: ReadFlags,
}

impl AlignedRead {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Largest indel length in the alignment; used to bound pair-HMM padding.
    pub fn max_indel_size(&self) -> u32 {
        self.cigar
            .iter()
            .map(|op| match op {
                CigarOp::Insertion(l) | CigarOp::Deletion(l) => *l,
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

pub type ReadMap = BTreeMap<SampleName, Vec<AlignedRead>>;

/// Thread-safe random access to reads by region. Implementations may back
/// this with per-thread file handles.
pub trait ReadSource: Send + Sync {
    fn fetch_reads(&self, samples: &[SampleName], region: &GenomicRegion) -> Result<ReadMap>;

    fn has_coverage(&self, region: &GenomicRegion) -> Result<bool>;
}

/// A stream of candidate variants per region, produced by external
/// generators (pileup, assembler, ...).
pub trait CandidateSource {
    fn generate(&mut self, region: &GenomicRegion) -> Result<Vec<Variant>>;

    /// Whether this generator needs reads before it can generate.
    fn requires_reads(&self) -> bool {
        false
    }

    fn add_reads(&mut self, _reads: &[AlignedRead]) {}
}

/// In-memory sources for tests and small workloads.
#[derive(Default)]
pub struct InMemoryReads {
    reads: ReadMap,
}

impl InMemoryReads {
    pub fn new(reads: ReadMap) -> Self {
        InMemoryReads { reads }
    }
}

impl ReadSource for InMemoryReads {
    fn fetch_reads(&self, samples: &[SampleName], region: &GenomicRegion) -> Result<ReadMap> {
        let mut result = ReadMap::new();
        for sample in samples {
            let reads = self
                .reads
                .get(sample)
                .map(|reads| {
                    reads
                        .iter()
                        .filter(|read| read.region().overlaps(region))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            result.insert(sample.clone(), reads);
        }
        Ok(result)
    }

    fn has_coverage(&self, region: &GenomicRegion) -> Result<bool> {
        Ok(self
            .reads
            .values()
            .flatten()
            .any(|read| read.region().overlaps(region)))
    }
}

#[derive(Default)]
pub struct InMemoryCandidates {
    candidates: Vec<Variant>,
}

impl InMemoryCandidates {
    pub fn new(mut candidates: Vec<Variant>) -> Self {
        candidates.sort();
        candidates.dedup();
        InMemoryCandidates { candidates }
    }
}

impl CandidateSource for InMemoryCandidates {
    fn generate(&mut self, region: &GenomicRegion) -> Result<Vec<Variant>> {
        Ok(self
            .candidates
            .iter()
            .filter(|candidate| {
                candidate.region().overlaps(region)
                    || (candidate.region().is_empty() && region.contains(candidate.region()))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A uniform-quality read fixture.
    pub(crate) fn read(
        sample: &str,
        name: &str,
        region: GenomicRegion,
        sequence: &[u8],
    ) -> AlignedRead {
        let len = sequence.len();
        AlignedReadBuilder::default()
            .name(name.to_owned())
            .sample(sample.to_owned())
            .region(region)
            .sequence(sequence.to_vec())
            .base_qualities(vec![30; len])
            .mapping_quality(60)
            .cigar(vec![CigarOp::Match(len as u32)])
            .build()
            .unwrap()
    }

    #[test]
    fn test_fetch_reads_filters_by_region() {
        let mut reads = ReadMap::new();
        reads.insert(
            "s1".to_owned(),
            vec![
                read("s1", "r1", GenomicRegion::new("1", 0, 8), b"ACGTACGT"),
                read("s1", "r2", GenomicRegion::new("1", 100, 108), b"ACGTACGT"),
            ],
        );
        let source = InMemoryReads::new(reads);
        let fetched = source
            .fetch_reads(&["s1".to_owned()], &GenomicRegion::new("1", 0, 50))
            .unwrap();
        assert_eq!(fetched["s1"].len(), 1);
        assert_eq!(fetched["s1"][0].name(), "r1");
    }
}

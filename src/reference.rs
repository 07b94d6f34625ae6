// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use lru_time_cache::LruCache;

use crate::errors::Error;
use crate::types::{GenomicRegion, NucleotideSequence};

/// Random access to a reference genome. Implementations must be safe to
/// share across calling workers after initialization.
pub trait ReferenceSource: Send + Sync {
    fn fetch(&self, region: &GenomicRegion) -> Result<NucleotideSequence>;

    fn contigs(&self) -> Vec<String>;

    fn contig_size(&self, contig: &str) -> Option<u64>;
}

/// A reference held entirely in memory, mainly for testing and small
/// genomes.
#[derive(Default, Debug)]
pub struct InMemoryReference {
    sequences: BTreeMap<String, Arc<NucleotideSequence>>,
}

impl InMemoryReference {
    pub fn new() -> Self {
        InMemoryReference::default()
    }

    pub fn add_contig<C: Into<String>, S: Into<NucleotideSequence>>(
        mut self,
        contig: C,
        sequence: S,
    ) -> Self {
        self.sequences
            .insert(contig.into(), Arc::new(sequence.into()));
        self
    }
}

impl ReferenceSource for InMemoryReference {
    fn fetch(&self, region: &GenomicRegion) -> Result<NucleotideSequence> {
        let sequence = self
            .sequences
            .get(region.contig())
            .ok_or_else(|| Error::UnknownContig {
                contig: region.contig().to_owned(),
            })?;
        if region.end() as usize > sequence.len() {
            return Err(Error::RegionOutOfBounds {
                region: region.to_string(),
            }
            .into());
        }
        Ok(sequence[region.begin() as usize..region.end() as usize].to_vec())
    }

    fn contigs(&self) -> Vec<String> {
        self.sequences.keys().cloned().collect()
    }

    fn contig_size(&self, contig: &str) -> Option<u64> {
        self.sequences.get(contig).map(|s| s.len() as u64)
    }
}

/// A lazy per-contig buffer in front of a slower reference source. Workers
/// share one buffer; whole contigs are cached so that repeated window
/// fetches within a contig are O(1).
pub struct ReferenceBuffer<R> {
    inner: R,
    sequences: Mutex<LruCache<String, Arc<NucleotideSequence>>>,
}

impl<R: ReferenceSource> ReferenceBuffer<R> {
    pub fn new(inner: R, capacity: usize) -> Self {
        ReferenceBuffer {
            inner,
            sequences: Mutex::new(LruCache::with_capacity(capacity)),
        }
    }

    /// Load the given contig, caching it for subsequent calls.
    pub fn seq(&self, contig: &str) -> Result<Arc<NucleotideSequence>> {
        let mut sequences = self.sequences.lock().unwrap();
        if !sequences.contains_key(contig) {
            let size = self.inner.contig_size(contig).ok_or(Error::UnknownContig {
                contig: contig.to_owned(),
            })?;
            let sequence = self
                .inner
                .fetch(&GenomicRegion::new(contig, 0, size))?;
            sequences.insert(contig.to_owned(), Arc::new(sequence));
        }
        Ok(Arc::clone(sequences.get(contig).unwrap()))
    }
}

impl<R: ReferenceSource> ReferenceSource for ReferenceBuffer<R> {
    fn fetch(&self, region: &GenomicRegion) -> Result<NucleotideSequence> {
        let sequence = self.seq(region.contig())?;
        if region.end() as usize > sequence.len() {
            return Err(Error::RegionOutOfBounds {
                region: region.to_string(),
            }
            .into());
        }
        Ok(sequence[region.begin() as usize..region.end() as usize].to_vec())
    }

    fn contigs(&self) -> Vec<String> {
        self.inner.contigs()
    }

    fn contig_size(&self, contig: &str) -> Option<u64> {
        self.inner.contig_size(contig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_fetch() {
        let reference = InMemoryReference::new().add_contig("chr1", b"ACGTACGT".to_vec());
        assert_eq!(
            reference.fetch(&GenomicRegion::new("chr1", 2, 5)).unwrap(),
            b"GTA".to_vec()
        );
        assert_eq!(reference.contig_size("chr1"), Some(8));
        assert!(reference.fetch(&GenomicRegion::new("chr1", 2, 9)).is_err());
        assert!(reference.fetch(&GenomicRegion::new("chr2", 0, 1)).is_err());
    }

    #[test]
    fn test_buffered_fetch() {
        let reference = ReferenceBuffer::new(
            InMemoryReference::new().add_contig("chr1", b"ACGTACGT".to_vec()),
            4,
        );
        assert_eq!(
            reference.fetch(&GenomicRegion::new("chr1", 0, 4)).unwrap(),
            b"ACGT".to_vec()
        );
        assert_eq!(
            reference.fetch(&GenomicRegion::new("chr1", 4, 8)).unwrap(),
            b"ACGT".to_vec()
        );
    }
}

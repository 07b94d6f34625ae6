// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::Result;
use itertools::Itertools;

use crate::reference::ReferenceSource;
use crate::types::{Allele, GenomicRegion, Haplotype, Variant};

/// The haplotypes proposed for one calling window, together with candidates
/// that had to be deferred to keep the haplotype count bounded.
#[derive(Debug)]
pub struct HaplotypeBlock {
    pub region: GenomicRegion,
    pub haplotypes: Vec<Haplotype>,
    pub deferred: Vec<Variant>,
}

impl HaplotypeBlock {
    /// Index of the reference haplotype within the block.
    pub fn reference_index(&self) -> usize {
        0
    }
}

/// Enumerates haplotypes consistent with the candidate variants of a window,
/// bounded in count. Candidates are consumed left to right; once including
/// another overlap cluster would exceed the bound, the remaining candidates
/// are deferred.
#[derive(Clone, Debug)]
pub struct HaplotypeGenerator {
    max_haplotypes: usize,
}

impl HaplotypeGenerator {
    pub fn new(max_haplotypes: usize) -> Self {
        assert!(max_haplotypes >= 2);
        HaplotypeGenerator { max_haplotypes }
    }

    pub fn generate<R: ReferenceSource + ?Sized>(
        &self,
        region: &GenomicRegion,
        candidates: &[Variant],
        reference: &R,
    ) -> Result<HaplotypeBlock> {
        let ref_sequence = reference.fetch(region)?;

        let mut in_window: Vec<&Variant> = candidates
            .iter()
            .filter(|v| region.contains(v.region()))
            .collect();
        in_window.sort();
        let clusters = cluster_overlapping(&in_window);

        // Grow the allele lattice cluster by cluster while the bound holds.
        let mut combinations: Vec<Vec<Allele>> = vec![Vec::new()];
        let mut deferred = Vec::new();
        let mut exhausted = false;
        for cluster in clusters {
            let growth = cluster.len() + 1;
            if exhausted || combinations.len() * growth > self.max_haplotypes {
                exhausted = true;
                deferred.extend(cluster.into_iter().cloned());
                continue;
            }
            combinations = combinations
                .into_iter()
                .cartesian_product(std::iter::once(None).chain(cluster.iter().map(|v| Some(*v))))
                .map(|(mut alleles, variant)| {
                    if let Some(variant) = variant {
                        alleles.push(variant.alt_allele());
                    }
                    alleles
                })
                .collect();
        }

        let mut haplotypes: Vec<Haplotype> = combinations
            .into_iter()
            .map(|alleles| Haplotype::new(region.clone(), alleles, &ref_sequence))
            .collect::<Result<_, _>>()?;
        // The empty combination comes first, so the reference haplotype
        // stays at index 0 after deduplication.
        haplotypes.dedup();

        if !deferred.is_empty() {
            debug!(
                "deferred {} candidate(s) in {} to respect the haplotype bound",
                deferred.len(),
                region
            );
        }

        Ok(HaplotypeBlock {
            region: region.clone(),
            haplotypes,
            deferred,
        })
    }
}

/// Partition region-sorted variants into clusters of mutually overlapping
/// sites. Variants within one cluster are alternatives; variants of
/// different clusters combine freely.
fn cluster_overlapping<'a>(variants: &[&'a Variant]) -> Vec<Vec<&'a Variant>> {
    let mut clusters: Vec<Vec<&Variant>> = Vec::new();
    let mut current: Vec<&Variant> = Vec::new();
    let mut current_end = 0u64;
    for &variant in variants {
        let r = variant.region();
        if current.is_empty() || r.begin() < current_end {
            current_end = current_end.max(r.end());
            current.push(variant);
        } else {
            clusters.push(std::mem::take(&mut current));
            current.push(variant);
            current_end = r.end();
        }
    }
    if !current.is_empty() {
        clusters.push(current);
    }
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::InMemoryReference;

    const CONTIG: &[u8] = b"ACCGTTACCAGGACTTGACAAACCGTTACCAGGACTTGACAAACC";

    fn reference() -> InMemoryReference {
        InMemoryReference::new().add_contig("1", CONTIG.to_vec())
    }

    fn snv(pos: u64, alt: u8) -> Variant {
        Variant::new(
            GenomicRegion::new("1", pos, pos + 1),
            vec![CONTIG[pos as usize]],
            vec![alt],
        )
    }

    #[test]
    fn test_enumeration_with_independent_sites() {
        let generator = HaplotypeGenerator::new(16);
        let region = GenomicRegion::new("1", 10, 30);
        let candidates = vec![snv(15, b'A'), snv(25, b'A')];
        let block = generator.generate(&region, &candidates, &reference()).unwrap();
        // 2 x 2 combinations, reference first.
        assert_eq!(block.haplotypes.len(), 4);
        assert!(block.deferred.is_empty());
        assert_eq!(block.haplotypes[0].alleles().len(), 0);
    }

    #[test]
    fn test_overlapping_candidates_are_alternatives() {
        let generator = HaplotypeGenerator::new(16);
        let region = GenomicRegion::new("1", 10, 30);
        let candidates = vec![snv(15, b'A'), snv(15, b'G')];
        let block = generator.generate(&region, &candidates, &reference()).unwrap();
        // none / T / G, never both.
        assert_eq!(block.haplotypes.len(), 3);
    }

    #[test]
    fn test_bound_defers_candidates() {
        let generator = HaplotypeGenerator::new(4);
        let region = GenomicRegion::new("1", 10, 30);
        let candidates = vec![snv(12, b'T'), snv(18, b'G'), snv(25, b'A')];
        let block = generator.generate(&region, &candidates, &reference()).unwrap();
        assert_eq!(block.haplotypes.len(), 4);
        assert_eq!(block.deferred.len(), 1);
        assert_eq!(block.deferred[0], snv(25, b'A'));
    }

    #[test]
    fn test_candidates_outside_window_ignored() {
        let generator = HaplotypeGenerator::new(8);
        let region = GenomicRegion::new("1", 10, 20);
        let candidates = vec![snv(15, b'A'), snv(25, b'A')];
        let block = generator.generate(&region, &candidates, &reference()).unwrap();
        assert_eq!(block.haplotypes.len(), 2);
    }
}

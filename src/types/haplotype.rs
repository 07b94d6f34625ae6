// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::Result;

use crate::errors::Error;
use crate::reference::ReferenceSource;
use crate::types::allele::Allele;
use crate::types::region::GenomicRegion;
use crate::types::NucleotideSequence;

/// A contiguous stretch of a chromosome carrying a specific set of alleles.
/// The materialized sequence is the reference spliced with the allele
/// sequences. Alleles are kept region-sorted and non-overlapping.
///
/// Equality and hashing consider the mapped region and the materialized
/// sequence only, so two haplotypes with the same sequence but different
/// allele decompositions compare equal.
#[derive(Clone, Debug)]
pub struct Haplotype {
    region: GenomicRegion,
    alleles: Vec<Allele>,
    sequence: NucleotideSequence,
}

impl Haplotype {
    /// Splice the given alleles into the reference sequence of `region`.
    /// `ref_sequence` must be the reference bases covering exactly `region`.
    pub fn new(
        region: GenomicRegion,
        alleles: Vec<Allele>,
        ref_sequence: &[u8],
    ) -> Result<Self, Error> {
        assert_eq!(
            ref_sequence.len() as u64,
            region.len(),
            "reference sequence must cover the haplotype region"
        );
        let mut sequence = Vec::with_capacity(ref_sequence.len());
        let mut cursor = region.begin();
        for allele in &alleles {
            let allele_region = allele.region();
            if allele_region.contig() != region.contig()
                || allele_region.begin() < cursor
                || allele_region.end() > region.end()
            {
                return Err(Error::RegionOutOfBounds {
                    region: allele_region.to_string(),
                });
            }
            let offset = (cursor - region.begin()) as usize;
            let len = (allele_region.begin() - cursor) as usize;
            sequence.extend_from_slice(&ref_sequence[offset..offset + len]);
            sequence.extend_from_slice(allele.sequence());
            cursor = allele_region.end();
        }
        let offset = (cursor - region.begin()) as usize;
        sequence.extend_from_slice(&ref_sequence[offset..]);
        Ok(Haplotype {
            region,
            alleles,
            sequence,
        })
    }

    /// The reference haplotype over the given region.
    pub fn reference(region: GenomicRegion, ref_sequence: &[u8]) -> Self {
        Haplotype::new(region, Vec::new(), ref_sequence)
            .expect("bug: reference haplotype cannot fail to splice")
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn alleles(&self) -> &[Allele] {
        &self.alleles
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Project a subregion of the mapped region into the materialized
    /// sequence and return the corresponding bases, accounting for indel
    /// shifts introduced by the carried alleles. Returns `None` if the query
    /// is not contained in the mapped region or straddles an allele boundary
    /// without covering it.
    pub fn sequence_at(&self, query: &GenomicRegion) -> Option<NucleotideSequence> {
        if !self.region.contains(query) {
            return None;
        }
        // A point query anchored at an insertion denotes the insertion
        // itself, so only then does the end edge absorb the inserted bases.
        let start = self.project(query.begin(), false)?;
        let end = self.project(query.end(), query.is_empty())?;
        Some(self.sequence[start..end].to_vec())
    }

    /// True iff this haplotype carries the given allele, either explicitly or
    /// implicitly through reference sequence.
    pub fn includes(&self, allele: &Allele) -> bool {
        match self.sequence_at(allele.region()) {
            Some(seq) => seq == allele.sequence(),
            None => false,
        }
    }

    /// Expand the mapped region by `pad` on both sides, re-splicing the
    /// flanks from the reference.
    pub fn expand<R: ReferenceSource + ?Sized>(&self, pad: u64, reference: &R) -> Result<Haplotype> {
        let expanded = {
            let region = self.region.expand(pad, pad);
            let contig_size = reference
                .contig_size(region.contig())
                .ok_or_else(|| Error::UnknownContig {
                    contig: region.contig().to_owned(),
                })?;
            GenomicRegion::new(region.contig(), region.begin(), region.end().min(contig_size))
        };
        let ref_sequence = reference.fetch(&expanded)?;
        Ok(Haplotype::new(
            expanded,
            self.alleles.clone(),
            &ref_sequence,
        )?)
    }

    /// Map a reference position inside the mapped region to an index into
    /// the materialized sequence. Positions strictly inside an allele are not
    /// projectable. An insertion anchored exactly at `pos` is absorbed only
    /// when `include_insertion_at_pos` is set.
    fn project(&self, pos: u64, include_insertion_at_pos: bool) -> Option<usize> {
        let mut shift: i64 = 0;
        for allele in &self.alleles {
            let region = allele.region();
            if region.end() < pos || (region.end() == pos && !region.is_empty()) {
                shift += allele.indel_length();
            } else if region.end() == pos {
                if include_insertion_at_pos {
                    shift += allele.indel_length();
                }
                break;
            } else if region.begin() < pos {
                return None;
            } else {
                break;
            }
        }
        let projected = pos as i64 - self.region.begin() as i64 + shift;
        debug_assert!(projected >= 0);
        Some(projected as usize)
    }
}

impl PartialEq for Haplotype {
    fn eq(&self, other: &Self) -> bool {
        self.region == other.region && self.sequence == other.sequence
    }
}

impl Eq for Haplotype {}

impl Hash for Haplotype {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.region.hash(state);
        self.sequence.hash(state);
    }
}

impl PartialOrd for Haplotype {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Haplotype {
    fn cmp(&self, other: &Self) -> Ordering {
        self.region
            .cmp(&other.region)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl fmt::Display for Haplotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.region,
            String::from_utf8_lossy(&self.sequence)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> GenomicRegion {
        GenomicRegion::new("1", 10, 20)
    }

    const REF: &[u8] = b"ACGTACGTAC";

    #[test]
    fn test_reference_haplotype() {
        let hap = Haplotype::reference(region(), REF);
        assert_eq!(hap.sequence(), REF);
        assert_eq!(
            hap.sequence_at(&GenomicRegion::new("1", 12, 15)).unwrap(),
            b"GTA".to_vec()
        );
    }

    #[test]
    fn test_snv_splice() {
        let allele = Allele::new(GenomicRegion::new("1", 13, 14), b"G".to_vec());
        let hap = Haplotype::new(region(), vec![allele.clone()], REF).unwrap();
        assert_eq!(hap.sequence(), b"ACGGACGTAC");
        assert!(hap.includes(&allele));
        assert!(!hap.includes(&Allele::new(
            GenomicRegion::new("1", 13, 14),
            b"T".to_vec()
        )));
        // Reference alleles away from the SNV are implicitly included.
        assert!(hap.includes(&Allele::new(
            GenomicRegion::new("1", 15, 17),
            b"CG".to_vec()
        )));
    }

    #[test]
    fn test_deletion_shifts_projection() {
        // Delete "TA" at 13..15.
        let allele = Allele::new(GenomicRegion::new("1", 13, 15), Vec::new());
        let hap = Haplotype::new(region(), vec![allele], REF).unwrap();
        assert_eq!(hap.sequence(), b"ACGCGTAC");
        assert_eq!(
            hap.sequence_at(&GenomicRegion::new("1", 15, 18)).unwrap(),
            b"CGT".to_vec()
        );
        // A query edge inside the deletion cannot be projected.
        assert!(hap.sequence_at(&GenomicRegion::new("1", 12, 14)).is_none());
    }

    #[test]
    fn test_insertion_splice() {
        let allele = Allele::new(GenomicRegion::point("1", 13), b"TT".to_vec());
        let hap = Haplotype::new(region(), vec![allele.clone()], REF).unwrap();
        assert_eq!(hap.sequence(), b"ACGTTTACGTAC");
        assert!(hap.includes(&allele));
    }

    #[test]
    fn test_overlapping_alleles_rejected() {
        let a = Allele::new(GenomicRegion::new("1", 13, 15), b"GG".to_vec());
        let b = Allele::new(GenomicRegion::new("1", 14, 16), b"CC".to_vec());
        assert!(Haplotype::new(region(), vec![a, b], REF).is_err());
    }

    #[test]
    fn test_value_equality_ignores_decomposition() {
        let mnv = Allele::new(GenomicRegion::new("1", 13, 15), b"GG".to_vec());
        let left = Allele::new(GenomicRegion::new("1", 13, 14), b"G".to_vec());
        let right = Allele::new(GenomicRegion::new("1", 14, 15), b"G".to_vec());
        let a = Haplotype::new(region(), vec![mnv], REF).unwrap();
        let b = Haplotype::new(region(), vec![left, right], REF).unwrap();
        assert_eq!(a, b);
    }
}

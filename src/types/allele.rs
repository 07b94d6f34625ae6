// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::region::GenomicRegion;
use crate::types::NucleotideSequence;

/// A sequence mapped to a genomic region. Whether it is a reference or an
/// alternate allele is positional: it depends on equality against the
/// reference subsequence at the region.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Allele {
    region: GenomicRegion,
    sequence: NucleotideSequence,
}

impl Allele {
    pub fn new(region: GenomicRegion, sequence: NucleotideSequence) -> Self {
        Allele { region, sequence }
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    /// Length difference introduced by this allele relative to the region it
    /// replaces.
    pub fn indel_length(&self) -> i64 {
        self.sequence.len() as i64 - self.region.len() as i64
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.region,
            String::from_utf8_lossy(&self.sequence)
        )
    }
}

/// A reference/alternate allele pair over the same region.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variant {
    region: GenomicRegion,
    ref_sequence: NucleotideSequence,
    alt_sequence: NucleotideSequence,
}

impl Variant {
    /// Build a variant; the two alleles must span the same region and differ
    /// in sequence.
    pub fn new(
        region: GenomicRegion,
        ref_sequence: NucleotideSequence,
        alt_sequence: NucleotideSequence,
    ) -> Self {
        assert_eq!(
            region.len() as usize,
            ref_sequence.len(),
            "reference allele must span the variant region"
        );
        assert_ne!(
            ref_sequence, alt_sequence,
            "reference and alternate allele must differ"
        );
        Variant {
            region,
            ref_sequence,
            alt_sequence,
        }
    }

    pub fn region(&self) -> &GenomicRegion {
        &self.region
    }

    pub fn ref_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.ref_sequence.clone())
    }

    pub fn alt_allele(&self) -> Allele {
        Allele::new(self.region.clone(), self.alt_sequence.clone())
    }

    pub fn ref_sequence(&self) -> &[u8] {
        &self.ref_sequence
    }

    pub fn alt_sequence(&self) -> &[u8] {
        &self.alt_sequence
    }

    pub fn is_snv(&self) -> bool {
        self.ref_sequence.len() == 1 && self.alt_sequence.len() == 1
    }

    pub fn is_mnv(&self) -> bool {
        self.ref_sequence.len() == self.alt_sequence.len() && self.ref_sequence.len() > 1
    }

    pub fn is_indel(&self) -> bool {
        self.ref_sequence.len() != self.alt_sequence.len()
    }
}

impl PartialOrd for Variant {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variant {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deterministic output order: region, then lexicographic alleles.
        self.region
            .cmp(&other.region)
            .then_with(|| self.ref_sequence.cmp(&other.ref_sequence))
            .then_with(|| self.alt_sequence.cmp(&other.alt_sequence))
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}>{}",
            self.region,
            String::from_utf8_lossy(&self.ref_sequence),
            String::from_utf8_lossy(&self.alt_sequence)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allele_equality() {
        let a = Allele::new(GenomicRegion::new("1", 5, 6), b"A".to_vec());
        let b = Allele::new(GenomicRegion::new("1", 5, 6), b"A".to_vec());
        let c = Allele::new(GenomicRegion::new("1", 5, 6), b"C".to_vec());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_variant_classes() {
        let snv = Variant::new(GenomicRegion::new("1", 5, 6), b"A".to_vec(), b"C".to_vec());
        assert!(snv.is_snv());
        let del = Variant::new(GenomicRegion::new("1", 5, 8), b"ACG".to_vec(), b"A".to_vec());
        assert!(del.is_indel());
        assert_eq!(del.alt_allele().indel_length(), -2);
    }

    #[test]
    #[should_panic]
    fn test_variant_alleles_must_differ() {
        Variant::new(GenomicRegion::new("1", 5, 6), b"A".to_vec(), b"A".to_vec());
    }
}

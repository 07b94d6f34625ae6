// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;
use std::ops::Index;

use itertools::Itertools;

use crate::types::haplotype::Haplotype;

/// An unordered multiset of elements (haplotypes or alleles) with fixed
/// ploidy. Elements are kept sorted so that equality and hashing are
/// canonical.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Genotype<T: Ord> {
    elements: Vec<T>,
}

impl<T: Ord + Clone> Genotype<T> {
    pub fn new(mut elements: Vec<T>) -> Self {
        assert!(!elements.is_empty(), "genotypes must have ploidy >= 1");
        elements.sort();
        Genotype { elements }
    }

    pub fn ploidy(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn is_homozygous(&self) -> bool {
        self.elements.iter().all(|e| *e == self.elements[0])
    }

    pub fn contains(&self, element: &T) -> bool {
        self.elements.iter().any(|e| e == element)
    }

    /// The distinct elements, preserving sort order.
    pub fn copy_unique(&self) -> Vec<T> {
        self.elements.iter().cloned().dedup().collect()
    }

    pub fn iter(&self) -> std::slice::Iter<T> {
        self.elements.iter()
    }

    /// Replace every element through `f`, preserving ploidy.
    pub fn map<U: Ord + Clone, F: FnMut(&T) -> U>(&self, f: F) -> Genotype<U> {
        Genotype::new(self.elements.iter().map(f).collect())
    }
}

impl<T: Ord> Index<usize> for Genotype<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.elements[index]
    }
}

impl<T: Ord + fmt::Display> fmt::Display for Genotype<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.elements.iter().join(", "))
    }
}

/// A germline genotype plus a set of somatic haplotypes. Somatic haplotypes
/// are treated as distinct from germline ones for likelihood purposes even
/// when their sequences coincide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancerGenotype {
    germline: Genotype<Haplotype>,
    somatic: Genotype<Haplotype>,
}

impl CancerGenotype {
    pub fn new(germline: Genotype<Haplotype>, somatic: Genotype<Haplotype>) -> Self {
        CancerGenotype { germline, somatic }
    }

    pub fn germline(&self) -> &Genotype<Haplotype> {
        &self.germline
    }

    pub fn somatic(&self) -> &Genotype<Haplotype> {
        &self.somatic
    }

    pub fn ploidy(&self) -> u32 {
        self.germline.ploidy() + self.somatic.ploidy()
    }

    /// Collapse into a plain genotype over all carried haplotypes.
    pub fn demote(&self) -> Genotype<Haplotype> {
        Genotype::new(
            self.germline
                .iter()
                .chain(self.somatic.iter())
                .cloned()
                .collect(),
        )
    }
}

impl fmt::Display for CancerGenotype {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}+{}", self.germline, self.somatic)
    }
}

/// Enumerate all genotypes (multisets) of the given ploidy over the
/// haplotype pool, in canonical order. The number of genotypes is
/// `(n + p - 1) choose p`; callers are expected to cap `haplotypes` first.
pub fn generate_all_genotypes(haplotypes: &[Haplotype], ploidy: u32) -> Vec<Genotype<Haplotype>> {
    (0..haplotypes.len())
        .combinations_with_replacement(ploidy as usize)
        .map(|indices| Genotype::new(indices.iter().map(|&i| haplotypes[i].clone()).collect()))
        .collect()
}

/// Enumerate cancer genotypes by attaching each haplotype not already in the
/// germline genotype as a single somatic haplotype.
pub fn generate_all_cancer_genotypes(
    germline_genotypes: &[Genotype<Haplotype>],
    haplotypes: &[Haplotype],
) -> Vec<CancerGenotype> {
    let mut result = Vec::new();
    for germline in germline_genotypes {
        for haplotype in haplotypes {
            if !germline.contains(haplotype) {
                result.push(CancerGenotype::new(
                    germline.clone(),
                    Genotype::new(vec![haplotype.clone()]),
                ));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::region::GenomicRegion;
    use crate::types::Allele;

    fn haplotypes(n: usize) -> Vec<Haplotype> {
        let bases = [b'A', b'C', b'G', b'T'];
        (0..n)
            .map(|i| {
                let region = GenomicRegion::new("1", 0, 4);
                let allele = Allele::new(GenomicRegion::new("1", 1, 2), vec![bases[i % 4]]);
                Haplotype::new(region, vec![allele], b"AAAA").unwrap()
            })
            .collect()
    }

    #[test]
    fn test_genotype_canonical_order() {
        let haps = haplotypes(2);
        let a = Genotype::new(vec![haps[0].clone(), haps[1].clone()]);
        let b = Genotype::new(vec![haps[1].clone(), haps[0].clone()]);
        assert_eq!(a, b);
        assert_eq!(a.ploidy(), 2);
    }

    #[test]
    fn test_homozygous_and_unique() {
        let haps = haplotypes(2);
        let hom = Genotype::new(vec![haps[0].clone(), haps[0].clone()]);
        assert!(hom.is_homozygous());
        assert_eq!(hom.copy_unique().len(), 1);
        let het = Genotype::new(vec![haps[0].clone(), haps[1].clone()]);
        assert!(!het.is_homozygous());
        assert_eq!(het.copy_unique().len(), 2);
    }

    #[test]
    fn test_generate_all_genotypes() {
        let haps = haplotypes(3);
        // 3 haplotypes, ploidy 2: multisets of size 2 = C(4, 2) = 6.
        let genotypes = generate_all_genotypes(&haps, 2);
        assert_eq!(genotypes.len(), 6);
        let unique: std::collections::HashSet<_> = genotypes.iter().collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn test_generate_cancer_genotypes() {
        let haps = haplotypes(3);
        let germline = generate_all_genotypes(&haps[..2], 2);
        let cancer = generate_all_cancer_genotypes(&germline, &haps);
        // hom genotypes admit 2 somatic haplotypes, the het admits 1.
        assert_eq!(cancer.len(), 2 + 2 + 1);
        for g in &cancer {
            assert_eq!(g.ploidy(), 3);
            assert!(!g.germline().contains(&g.somatic()[0]));
        }
    }
}

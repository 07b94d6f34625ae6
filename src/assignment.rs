// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Assignment of reads to called haplotypes and derivation of per-allele
//! support.

use std::collections::HashMap;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::likelihood::{HaplotypeLikelihoodArray, HaplotypeLikelihoodModel};
use crate::reads::{AlignedRead, ReadMap};
use crate::reference::ReferenceSource;
use crate::types::{Allele, GenomicRegion, Genotype, Haplotype};
use crate::utils::almost_equal;

/// What to do with a read whose maximum a posteriori haplotype set is not a
/// singleton.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiguousAction {
    /// Assign to the first MAP haplotype.
    First,
    /// Assign to every MAP haplotype.
    All,
    /// Assign to a uniformly chosen MAP haplotype.
    #[default]
    Random,
    /// Do not assign.
    Drop,
}

/// Whether ambiguous records retain their candidate haplotypes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmbiguousRecord {
    ReadOnly,
    Haplotypes,
    #[default]
    HaplotypesIfThreeOrMoreOptions,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AssignmentConfig {
    pub ambiguous_action: AmbiguousAction,
    pub ambiguous_record: AmbiguousRecord,
}

/// A read that could not be assigned unambiguously, optionally with the
/// haplotypes it is torn between.
#[derive(Clone, Debug)]
pub struct AmbiguousRead {
    pub read: AlignedRead,
    pub haplotypes: Option<Vec<Haplotype>>,
}

pub type HaplotypeSupportMap = HashMap<Haplotype, Vec<AlignedRead>>;
pub type AlleleSupportMap = HashMap<Allele, Vec<AlignedRead>>;
pub type HaplotypeLogPriorMap = HashMap<Haplotype, f64>;

/// Assign each read to the haplotype(s) of the genotype that explain it
/// best. The likelihood matrix is recomputed against the called haplotypes
/// only. Homozygous genotypes short-circuit: every read supports the single
/// haplotype (unless the action is `Drop`).
#[allow(clippy::too_many_arguments)]
pub fn compute_haplotype_support<R: ReferenceSource + ?Sized>(
    genotype: &Genotype<Haplotype>,
    reads: &[AlignedRead],
    log_priors: &HaplotypeLogPriorMap,
    model: &mut HaplotypeLikelihoodModel,
    mut ambiguous: Option<&mut Vec<AmbiguousRead>>,
    config: &AssignmentConfig,
    reference: &R,
    rng: &mut impl Rng,
) -> Result<HaplotypeSupportMap> {
    if reads.is_empty() {
        return Ok(HaplotypeSupportMap::new());
    }
    if genotype.is_homozygous() {
        let mut result = HaplotypeSupportMap::new();
        if config.ambiguous_action != AmbiguousAction::Drop {
            result.insert(genotype[0].clone(), reads.to_vec());
        }
        return Ok(result);
    }

    let haplotypes = genotype.copy_unique();
    debug_assert!(haplotypes.len() > 1);
    let priors: Vec<f64> = haplotypes
        .iter()
        .map(|h| log_priors.get(h).copied().unwrap_or(0.0))
        .collect();

    // One synthetic sample covering all given reads.
    let mut read_map = ReadMap::new();
    read_map.insert(String::new(), reads.to_vec());
    let likelihoods =
        HaplotypeLikelihoodArray::populate(&read_map, &haplotypes, model, reference)?;
    likelihoods.prime("")?;

    let mut result = HaplotypeSupportMap::new();
    let mut top = Vec::with_capacity(haplotypes.len());
    for (i, read) in reads.iter().enumerate() {
        find_map_haplotypes(&haplotypes, i, &likelihoods, &priors, &mut top);
        if let [only] = top[..] {
            result
                .entry(haplotypes[only].clone())
                .or_insert_with(Vec::new)
                .push(read.clone());
        } else {
            match config.ambiguous_action {
                AmbiguousAction::First => {
                    result
                        .entry(haplotypes[top[0]].clone())
                        .or_insert_with(Vec::new)
                        .push(read.clone());
                }
                AmbiguousAction::All => {
                    for &k in &top {
                        result
                            .entry(haplotypes[k].clone())
                            .or_insert_with(Vec::new)
                            .push(read.clone());
                    }
                }
                AmbiguousAction::Random => {
                    let &k = top.choose(rng).expect("bug: empty MAP set");
                    result
                        .entry(haplotypes[k].clone())
                        .or_insert_with(Vec::new)
                        .push(read.clone());
                }
                AmbiguousAction::Drop => {}
            }
            if let Some(ambiguous) = ambiguous.as_deref_mut() {
                let record_haplotypes = match config.ambiguous_record {
                    AmbiguousRecord::ReadOnly => false,
                    AmbiguousRecord::Haplotypes => true,
                    AmbiguousRecord::HaplotypesIfThreeOrMoreOptions => top.len() >= 3,
                };
                ambiguous.push(AmbiguousRead {
                    read: read.clone(),
                    haplotypes: record_haplotypes
                        .then(|| top.iter().map(|&k| haplotypes[k].clone()).collect()),
                });
            }
        }
    }
    Ok(result)
}

fn find_map_haplotypes(
    haplotypes: &[Haplotype],
    read: usize,
    likelihoods: &HaplotypeLikelihoodArray,
    log_priors: &[f64],
    result: &mut Vec<usize>,
) {
    result.clear();
    let mut max_posterior = f64::NEG_INFINITY;
    for k in 0..haplotypes.len() {
        let posterior = *likelihoods.read_likelihoods(k)[read] + log_priors[k];
        if almost_equal(posterior, max_posterior) {
            result.push(k);
        } else if posterior > max_posterior {
            result.clear();
            result.push(k);
            max_posterior = posterior;
        }
    }
    if result.is_empty() {
        result.extend(0..haplotypes.len());
    }
}

fn read_touches(read: &AlignedRead, region: &GenomicRegion) -> bool {
    read.region().overlaps(region) || (region.is_empty() && read.region().contains(region))
}

/// Derive allele support from haplotype support: a read supports every
/// target allele its assigned haplotype carries at an overlapped site.
pub fn compute_allele_support(
    alleles: &[Allele],
    haplotype_support: &HaplotypeSupportMap,
) -> AlleleSupportMap {
    let mut result = AlleleSupportMap::new();
    for allele in alleles {
        let mut supporting = Vec::new();
        for (haplotype, reads) in haplotype_support {
            if haplotype.includes(allele) {
                supporting.extend(reads.iter().filter(|r| read_touches(r, allele.region())).cloned());
            }
        }
        supporting.sort_by(|a, b| a.name().cmp(b.name()));
        supporting.dedup_by(|a, b| a.name() == b.name());
        result.insert(allele.clone(), supporting);
    }
    result
}

/// Additionally recover ambiguous reads whose candidate haplotypes all agree
/// on the targeted alleles.
pub fn compute_allele_support_with_ambiguous(
    alleles: &[Allele],
    haplotype_support: &HaplotypeSupportMap,
    ambiguous_reads: &[AmbiguousRead],
) -> AlleleSupportMap {
    let mut result = compute_allele_support(alleles, haplotype_support);
    for ambiguous in ambiguous_reads {
        let candidates = match &ambiguous.haplotypes {
            Some(haplotypes) if !haplotypes.is_empty() => haplotypes,
            _ => continue,
        };
        for allele in alleles {
            let includes = candidates[0].includes(allele);
            if candidates[1..].iter().all(|h| h.includes(allele) == includes)
                && includes
                && read_touches(&ambiguous.read, allele.region())
            {
                let support = result.entry(allele.clone()).or_insert_with(Vec::new);
                if !support.iter().any(|r| r.name() == ambiguous.read.name()) {
                    support.push(ambiguous.read.clone());
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{fixture, CONTIG};
    use crate::reference::InMemoryReference;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (
        InMemoryReference,
        Vec<Haplotype>,
        Vec<AlignedRead>,
    ) {
        let (reference, haplotypes, mut reads) = fixture("s1", 5, 5);
        (reference, haplotypes, reads.remove("s1").unwrap())
    }

    #[test]
    fn test_assignment_partition() {
        let (reference, haplotypes, reads) = setup();
        let genotype = Genotype::new(vec![haplotypes[0].clone(), haplotypes[1].clone()]);
        for action in [
            AmbiguousAction::First,
            AmbiguousAction::All,
            AmbiguousAction::Drop,
        ] {
            let mut ambiguous = Vec::new();
            let mut model = HaplotypeLikelihoodModel::default();
            let mut rng = StdRng::seed_from_u64(42);
            let support = compute_haplotype_support(
                &genotype,
                &reads,
                &HaplotypeLogPriorMap::new(),
                &mut model,
                Some(&mut ambiguous),
                &AssignmentConfig {
                    ambiguous_action: action,
                    ambiguous_record: AmbiguousRecord::Haplotypes,
                },
                &reference,
                &mut rng,
            )
            .unwrap();
            let num_assigned: usize = support.values().map(|reads| reads.len()).sum();
            match action {
                // Unambiguous reads assign once; ambiguous ones per the
                // action.
                AmbiguousAction::First => {
                    assert_eq!(num_assigned, reads.len());
                }
                AmbiguousAction::All => {
                    assert!(num_assigned >= reads.len());
                }
                AmbiguousAction::Drop => {
                    assert_eq!(num_assigned + ambiguous.len(), reads.len());
                }
                AmbiguousAction::Random => unreachable!(),
            }
        }
    }

    #[test]
    fn test_reads_follow_their_haplotype() {
        let (reference, haplotypes, reads) = setup();
        let genotype = Genotype::new(vec![haplotypes[0].clone(), haplotypes[1].clone()]);
        let mut model = HaplotypeLikelihoodModel::default();
        let mut rng = StdRng::seed_from_u64(7);
        let support = compute_haplotype_support(
            &genotype,
            &reads,
            &HaplotypeLogPriorMap::new(),
            &mut model,
            None,
            &AssignmentConfig::default(),
            &reference,
            &mut rng,
        )
        .unwrap();
        let ref_support = &support[&haplotypes[0]];
        let alt_support = &support[&haplotypes[1]];
        assert!(ref_support.iter().all(|r| r.name().starts_with("ref")));
        assert!(alt_support.iter().all(|r| r.name().starts_with("alt")));
        assert_eq!(ref_support.len(), 5);
        assert_eq!(alt_support.len(), 5);
    }

    /// Homozygous genotypes short-circuit; `Drop` empties the support map.
    #[test]
    fn test_homozygous_short_circuit() {
        let (reference, haplotypes, reads) = setup();
        let genotype = Genotype::new(vec![haplotypes[0].clone(), haplotypes[0].clone()]);
        let mut model = HaplotypeLikelihoodModel::default();
        let mut rng = StdRng::seed_from_u64(7);
        let support = compute_haplotype_support(
            &genotype,
            &reads,
            &HaplotypeLogPriorMap::new(),
            &mut model,
            None,
            &AssignmentConfig {
                ambiguous_action: AmbiguousAction::Drop,
                ambiguous_record: AmbiguousRecord::ReadOnly,
            },
            &reference,
            &mut rng,
        )
        .unwrap();
        assert!(support.is_empty());

        let support = compute_haplotype_support(
            &genotype,
            &reads,
            &HaplotypeLogPriorMap::new(),
            &mut model,
            None,
            &AssignmentConfig::default(),
            &reference,
            &mut rng,
        )
        .unwrap();
        assert_eq!(support[&haplotypes[0]].len(), reads.len());
    }

    #[test]
    fn test_allele_support() {
        let (reference, haplotypes, reads) = setup();
        let genotype = Genotype::new(vec![haplotypes[0].clone(), haplotypes[1].clone()]);
        let mut model = HaplotypeLikelihoodModel::default();
        let mut rng = StdRng::seed_from_u64(7);
        let support = compute_haplotype_support(
            &genotype,
            &reads,
            &HaplotypeLogPriorMap::new(),
            &mut model,
            None,
            &AssignmentConfig::default(),
            &reference,
            &mut rng,
        )
        .unwrap();
        let ref_allele = Allele::new(GenomicRegion::new("1", 20, 21), b"A".to_vec());
        let alt_allele = Allele::new(GenomicRegion::new("1", 20, 21), b"T".to_vec());
        assert_eq!(CONTIG[20], b'A');
        let allele_support =
            compute_allele_support(&[ref_allele.clone(), alt_allele.clone()], &support);
        assert_eq!(allele_support[&ref_allele].len(), 5);
        assert_eq!(allele_support[&alt_allele].len(), 5);
    }
}

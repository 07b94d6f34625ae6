// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The family of genotype inference models. All models expose posteriors
//! through the [`Latents`] contract: a haplotype posterior map and per-sample
//! genotype posterior maps, each normalized to one.

use std::collections::{BTreeMap, HashMap};

use bio::stats::LogProb;

use crate::likelihood::HaplotypeLikelihoodArray;
use crate::types::{CancerGenotype, Genotype, Haplotype};
use crate::SampleName;

pub mod cell;
pub mod denovo;
pub mod individual;
pub mod population;
pub mod priors;
pub mod subclone;
pub mod trio;

pub use crate::utils::LogProbVector;

pub type HaplotypeProbabilityMap = HashMap<Haplotype, f64>;
pub type GenotypeProbabilityMap = BTreeMap<SampleName, HashMap<Genotype<Haplotype>, f64>>;

/// The inferred hidden-variable posteriors of one calling window.
pub trait Latents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap;

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap;
}

/// A genotype expressed as haplotype indices into the likelihood array.
pub type GenotypeIndex = Vec<usize>;

/// A cancer genotype expressed as haplotype indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CancerGenotypeIndex {
    pub germline: GenotypeIndex,
    pub somatic: GenotypeIndex,
}

impl CancerGenotypeIndex {
    pub fn slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.germline.iter().chain(self.somatic.iter()).copied()
    }

    pub fn num_slots(&self) -> usize {
        self.germline.len() + self.somatic.len()
    }
}

/// Translate genotypes into index form against the haplotype pool order.
pub fn genotype_indices(
    genotypes: &[Genotype<Haplotype>],
    haplotypes: &[Haplotype],
) -> Vec<GenotypeIndex> {
    let index: HashMap<&Haplotype, usize> =
        haplotypes.iter().enumerate().map(|(i, h)| (h, i)).collect();
    genotypes
        .iter()
        .map(|genotype| genotype.iter().map(|h| index[h]).collect())
        .collect()
}

pub fn cancer_genotype_indices(
    genotypes: &[CancerGenotype],
    haplotypes: &[Haplotype],
) -> Vec<CancerGenotypeIndex> {
    let index: HashMap<&Haplotype, usize> =
        haplotypes.iter().enumerate().map(|(i, h)| (h, i)).collect();
    genotypes
        .iter()
        .map(|genotype| CancerGenotypeIndex {
            germline: genotype.germline().iter().map(|h| index[h]).collect(),
            somatic: genotype.somatic().iter().map(|h| index[h]).collect(),
        })
        .collect()
}

/// Genotype likelihood under equal mixture weights: every haplotype of the
/// genotype generates reads with probability `1/ploidy`.
pub(crate) struct ConstantMixtureModel<'a> {
    likelihoods: &'a HaplotypeLikelihoodArray,
}

impl<'a> ConstantMixtureModel<'a> {
    pub(crate) fn new(likelihoods: &'a HaplotypeLikelihoodArray) -> Self {
        ConstantMixtureModel { likelihoods }
    }

    /// ln P(reads of the primed sample | genotype).
    pub(crate) fn evaluate(&self, genotype: &[usize]) -> LogProb {
        let ln_ploidy = (genotype.len() as f64).ln();
        let rows: Vec<&[LogProb]> = genotype
            .iter()
            .map(|&h| self.likelihoods.read_likelihoods(h))
            .collect();
        let num_reads = rows.first().map_or(0, |r| r.len());
        let mut result = LogProb::ln_one();
        for read in 0..num_reads {
            let read_likelihood = LogProb::ln_sum_exp(
                &rows
                    .iter()
                    .map(|row| row[read])
                    .collect::<Vec<_>>(),
            );
            result = LogProb(*result + *read_likelihood - ln_ploidy);
        }
        result
    }
}

/// Genotype likelihood under explicit mixture weights over the genotype's
/// haplotype slots.
pub(crate) struct VariableMixtureModel<'a> {
    likelihoods: &'a HaplotypeLikelihoodArray,
    ln_mixtures: Vec<LogProb>,
}

impl<'a> VariableMixtureModel<'a> {
    pub(crate) fn new(likelihoods: &'a HaplotypeLikelihoodArray, mixtures: &[f64]) -> Self {
        VariableMixtureModel {
            likelihoods,
            ln_mixtures: mixtures.iter().map(|&w| LogProb(w.ln())).collect(),
        }
    }

    pub(crate) fn evaluate(&self, genotype_slots: &[usize]) -> LogProb {
        debug_assert_eq!(genotype_slots.len(), self.ln_mixtures.len());
        let rows: Vec<&[LogProb]> = genotype_slots
            .iter()
            .map(|&h| self.likelihoods.read_likelihoods(h))
            .collect();
        let num_reads = rows.first().map_or(0, |r| r.len());
        let mut result = LogProb::ln_one();
        for read in 0..num_reads {
            let read_likelihood = LogProb::ln_sum_exp(
                &rows
                    .iter()
                    .zip(self.ln_mixtures.iter())
                    .map(|(row, w)| LogProb(*row[read] + **w))
                    .collect::<Vec<_>>(),
            );
            result = LogProb(*result + *read_likelihood);
        }
        result
    }
}

/// Marginalize genotype posteriors into haplotype posteriors: the posterior
/// of a haplotype is the total posterior mass of genotypes carrying it.
pub fn marginal_haplotype_posteriors(
    haplotypes: &[Haplotype],
    genotypes: &[GenotypeIndex],
    genotype_posteriors: &[f64],
) -> HaplotypeProbabilityMap {
    let mut result: HaplotypeProbabilityMap = haplotypes
        .iter()
        .map(|h| (h.clone(), 0.0))
        .collect();
    for (genotype, &posterior) in genotypes.iter().zip(genotype_posteriors.iter()) {
        let mut seen = Vec::with_capacity(genotype.len());
        for &h in genotype {
            if !seen.contains(&h) {
                seen.push(h);
                *result.get_mut(&haplotypes[h]).unwrap() += posterior;
            }
        }
    }
    result
}

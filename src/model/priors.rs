// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::HashSet;

use bio::stats::LogProb;
use serde::{Deserialize, Serialize};

use crate::model::denovo::DeNovoModel;
use crate::types::{Allele, CancerGenotype, Genotype, Haplotype};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CoalescentParams {
    /// Expected SNV heterozygosity (the population mutation rate θ for
    /// point mutations).
    pub snp_heterozygosity: f64,
    pub indel_heterozygosity: f64,
}

impl Default for CoalescentParams {
    fn default() -> Self {
        CoalescentParams {
            snp_heterozygosity: 1e-3,
            indel_heterozygosity: 1e-4,
        }
    }
}

/// A coalescent prior over genotypes of haplotypes: genotypes whose
/// haplotypes carry few segregating sites against the reference are favored
/// according to the expected site frequency spectrum. Pure and deterministic
/// given its parameters.
pub struct CoalescentModel {
    reference: Haplotype,
    params: CoalescentParams,
}

impl CoalescentModel {
    pub fn new(reference: Haplotype, params: CoalescentParams) -> Self {
        CoalescentModel { reference, params }
    }

    pub fn reference(&self) -> &Haplotype {
        &self.reference
    }

    /// ln prior of a genotype; the reference haplotype is always counted as
    /// part of the sample.
    pub fn evaluate(&self, genotype: &Genotype<Haplotype>) -> LogProb {
        self.evaluate_haplotypes(genotype.iter())
    }

    pub fn evaluate_haplotypes<'a, I>(&'a self, haplotypes: I) -> LogProb
    where
        I: IntoIterator<Item = &'a Haplotype>,
    {
        let mut sample: Vec<&Haplotype> = vec![&self.reference];
        sample.extend(haplotypes);
        let (num_snvs, num_indels) = count_segregating_sites(&sample);
        let n = sample.len();
        LogProb(
            prob_num_segregating_sites(num_snvs, n, self.params.snp_heterozygosity).ln()
                + prob_num_segregating_sites(num_indels, n, self.params.indel_heterozygosity).ln(),
        )
    }
}

/// Count sites at which the sampled haplotypes disagree, split into SNV and
/// indel sites. A site is an allele carried by some but not all haplotypes.
fn count_segregating_sites(haplotypes: &[&Haplotype]) -> (usize, usize) {
    let mut candidate_alleles: HashSet<&Allele> = HashSet::new();
    for haplotype in haplotypes {
        candidate_alleles.extend(haplotype.alleles().iter());
    }
    let mut num_snvs = 0;
    let mut num_indels = 0;
    for allele in candidate_alleles {
        if !haplotypes.iter().all(|h| h.includes(allele)) {
            if allele.indel_length() == 0 {
                num_snvs += 1;
            } else {
                num_indels += 1;
            }
        }
    }
    (num_snvs, num_indels)
}

/// P(S_n = k | θ) under the infinite sites model (Tavaré 1984):
/// `Σ_{i=1}^{n-1} (-1)^{i-1} C(n-1, i) (i / (θ + i)) (θ / (θ + i))^k`.
/// The alternating sum is evaluated in linear space; the involved binomials
/// are small for the haplotype counts seen in calling windows.
fn prob_num_segregating_sites(k: usize, n: usize, theta: f64) -> f64 {
    assert!(theta > 0.0);
    if n < 2 {
        return if k == 0 { 1.0 } else { 0.0 };
    }
    let mut result = 0.0;
    let mut binom = 1.0; // C(n-1, i), updated incrementally
    for i in 1..n {
        binom *= (n - i) as f64 / i as f64;
        let sign = if i % 2 == 1 { 1.0 } else { -1.0 };
        let i = i as f64;
        result += sign * binom * (i / (theta + i)) * (theta / (theta + i)).powi(k as i32);
    }
    // Guard against cancellation pushing slightly below zero.
    result.max(f64::MIN_POSITIVE)
}

/// Prior over cancer genotypes: the coalescent germline prior times the
/// probability that each somatic haplotype arose from one of the germline
/// haplotypes by a single-generation mutation process.
pub struct CancerGenotypePriorModel {
    germline_model: CoalescentModel,
    mutation_model: DeNovoModel,
}

impl CancerGenotypePriorModel {
    pub fn new(germline_model: CoalescentModel, mutation_model: DeNovoModel) -> Self {
        CancerGenotypePriorModel {
            germline_model,
            mutation_model,
        }
    }

    pub fn germline_model(&self) -> &CoalescentModel {
        &self.germline_model
    }

    pub fn evaluate(&self, genotype: &CancerGenotype) -> LogProb {
        let germline = self.germline_model.evaluate(genotype.germline());
        let ln_ploidy = f64::from(genotype.germline().ploidy()).ln();
        let somatic: f64 = genotype
            .somatic()
            .iter()
            .map(|somatic_haplotype| {
                // Mutation origin is any of the germline haplotypes, equally
                // likely a priori.
                let origins: Vec<LogProb> = genotype
                    .germline()
                    .iter()
                    .map(|germline_haplotype| {
                        self.mutation_model
                            .evaluate(somatic_haplotype, germline_haplotype)
                    })
                    .collect();
                *LogProb::ln_sum_exp(&origins) - ln_ploidy
            })
            .sum();
        LogProb(*germline + somatic)
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use bio::stats::LogProb;

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::individual::{IndividualInferences, IndividualModel};
use crate::model::GenotypeIndex;
use crate::SampleName;

/// Joint inference over independent samples sharing genotype priors. There
/// is no coupling between samples beyond the shared prior; haplotype
/// posteriors are marginalized over samples with equal weight.
#[derive(Default)]
pub struct PopulationModel {
    individual: IndividualModel,
}

pub struct PopulationInferences {
    pub sample_inferences: BTreeMap<SampleName, IndividualInferences>,
    pub log_evidence: LogProb,
}

impl PopulationModel {
    pub fn new() -> Self {
        PopulationModel::default()
    }

    pub fn evaluate(
        &self,
        genotypes: &[GenotypeIndex],
        genotype_log_priors: &[LogProb],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<PopulationInferences, Error> {
        let mut sample_inferences = BTreeMap::new();
        let mut log_evidence = LogProb::ln_one();
        for sample in likelihoods.samples() {
            likelihoods.prime(sample)?;
            let inferences = self
                .individual
                .evaluate(genotypes, genotype_log_priors, likelihoods)?;
            log_evidence = LogProb(*log_evidence + *inferences.log_evidence);
            sample_inferences.insert(sample.clone(), inferences);
        }
        likelihoods.unprime();
        Ok(PopulationInferences {
            sample_inferences,
            log_evidence,
        })
    }
}

impl PopulationInferences {
    /// Haplotype posterior marginal over samples, equally weighted.
    pub fn pooled_genotype_posteriors(&self, num_genotypes: usize) -> Vec<f64> {
        let mut pooled = vec![0.0; num_genotypes];
        for inferences in self.sample_inferences.values() {
            for (i, p) in inferences.genotype_log_posteriors.iter().enumerate() {
                pooled[i] += p.exp();
            }
        }
        let n = self.sample_inferences.len().max(1) as f64;
        for p in pooled.iter_mut() {
            *p /= n;
        }
        pooled
    }
}

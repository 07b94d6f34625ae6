// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::LogProb;

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::{ConstantMixtureModel, GenotypeIndex};
use crate::utils::{normalise_log_probs, normalization_drift, LogProbVector, NORMALIZATION_TOLERANCE};

/// Exact single-sample inference: `P(g | reads) ∝ P(reads | g) P(g)`,
/// normalized by log-sum-exp. No iteration involved.
#[derive(Default)]
pub struct IndividualModel {}

pub struct IndividualInferences {
    pub genotype_log_posteriors: LogProbVector,
    pub log_evidence: LogProb,
}

impl IndividualModel {
    pub fn new() -> Self {
        IndividualModel {}
    }

    /// Infer genotype posteriors for the sample the likelihood array is
    /// primed on.
    pub fn evaluate(
        &self,
        genotypes: &[GenotypeIndex],
        genotype_log_priors: &[LogProb],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<IndividualInferences, Error> {
        assert_eq!(genotypes.len(), genotype_log_priors.len());
        let model = ConstantMixtureModel::new(likelihoods);
        let mut posteriors: LogProbVector = genotypes
            .iter()
            .zip(genotype_log_priors.iter())
            .map(|(genotype, prior)| LogProb(**prior + *model.evaluate(genotype)))
            .collect();
        let log_evidence = normalise_log_probs(&mut posteriors);
        let drift = normalization_drift(&posteriors);
        if drift > NORMALIZATION_TOLERANCE {
            return Err(Error::NormalizationDrift {
                drift,
                tolerance: NORMALIZATION_TOLERANCE,
            });
        }
        Ok(IndividualInferences {
            genotype_log_posteriors: posteriors,
            log_evidence,
        })
    }
}

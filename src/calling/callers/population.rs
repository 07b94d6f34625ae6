// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::Result;
use derive_new::new;

use crate::calling::callers::{
    allele_posterior, homozygous_posterior, map_site_genotype, min_posterior_from_phred,
    propose_genotypes, quality_from_posterior, Caller,
};
use crate::calling::calls::{Call, CallBuilder, CallType, GenotypeCallBuilder};
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::population::PopulationModel;
use crate::model::priors::{CoalescentModel, CoalescentParams};
use crate::model::{
    genotype_indices, marginal_haplotype_posteriors, GenotypeProbabilityMap,
    HaplotypeProbabilityMap, Latents,
};
use crate::reads::ReadMap;
use crate::types::{Allele, Genotype, Haplotype, Variant};
use crate::SampleName;

#[derive(Clone, Debug)]
pub struct PopulationCallerParams {
    pub ploidy: u32,
    pub prior: CoalescentParams,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub max_genotypes: usize,
}

/// Joint-sample germline caller: samples are inferred independently under a
/// shared prior.
#[derive(new)]
pub struct PopulationCaller {
    params: PopulationCallerParams,
}

pub struct PopulationLatents {
    haplotypes: Vec<Haplotype>,
    genotypes: Vec<Genotype<Haplotype>>,
    /// Per-sample genotype posterior vectors.
    posteriors: BTreeMap<SampleName, Vec<f64>>,
}

impl Latents for PopulationLatents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap {
        // Equal-weight marginal over samples.
        let indices = genotype_indices(&self.genotypes, &self.haplotypes);
        let num_samples = self.posteriors.len().max(1) as f64;
        let mut result: HaplotypeProbabilityMap = self
            .haplotypes
            .iter()
            .map(|h| (h.clone(), 0.0))
            .collect();
        for posteriors in self.posteriors.values() {
            for (haplotype, posterior) in
                marginal_haplotype_posteriors(&self.haplotypes, &indices, posteriors)
            {
                *result.get_mut(&haplotype).unwrap() += posterior / num_samples;
            }
        }
        result
    }

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap {
        self.posteriors
            .iter()
            .map(|(sample, posteriors)| {
                (
                    sample.clone(),
                    self.genotypes
                        .iter()
                        .cloned()
                        .zip(posteriors.iter().copied())
                        .collect(),
                )
            })
            .collect()
    }
}

impl Caller for PopulationCaller {
    type Latents = PopulationLatents;

    fn name(&self) -> &str {
        "population"
    }

    fn call_types(&self) -> &[CallType] {
        &[CallType::Germline, CallType::Reference]
    }

    fn max_callable_ploidy(&self) -> u32 {
        self.params.ploidy
    }

    fn infer_latents(
        &self,
        haplotypes: &[Haplotype],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<PopulationLatents> {
        let prior_model = CoalescentModel::new(haplotypes[0].clone(), self.params.prior);
        let (genotypes, priors) = propose_genotypes(
            haplotypes,
            self.params.ploidy,
            self.params.max_genotypes,
            &prior_model,
        );
        let indices = genotype_indices(&genotypes, haplotypes);
        let inferences = PopulationModel::new().evaluate(&indices, &priors, likelihoods)?;
        Ok(PopulationLatents {
            haplotypes: haplotypes.to_vec(),
            genotypes,
            posteriors: inferences
                .sample_inferences
                .into_iter()
                .map(|(sample, inferences)| {
                    (
                        sample,
                        inferences
                            .genotype_log_posteriors
                            .iter()
                            .map(|p| p.exp())
                            .collect(),
                    )
                })
                .collect(),
        })
    }

    fn call_variants(&self, candidates: &[Variant], latents: &PopulationLatents) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_variant_posterior);
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();
            // Probability that at least one sample carries the allele.
            let prob_absent: f64 = latents
                .posteriors
                .values()
                .map(|posteriors| {
                    1.0 - allele_posterior(&alt, &latents.genotypes, posteriors)
                })
                .product();
            let posterior = 1.0 - prob_absent;
            if posterior < min_posterior {
                continue;
            }
            let mut genotypes = BTreeMap::new();
            for (sample, posteriors) in &latents.posteriors {
                if let Some((genotype, genotype_posterior)) =
                    map_site_genotype(candidate.region(), &latents.genotypes, posteriors)
                {
                    let mut genotype_call = GenotypeCallBuilder::default();
                    genotype_call
                        .genotype(genotype)
                        .quality(quality_from_posterior(genotype_posterior));
                    genotypes.insert(sample.clone(), genotype_call.build().unwrap());
                }
            }
            calls.push(
                CallBuilder::default()
                    .call_type(CallType::Germline)
                    .region(candidate.region().clone())
                    .variant(Some(candidate.clone()))
                    .quality(quality_from_posterior(posterior))
                    .genotypes(genotypes)
                    .build()
                    .unwrap(),
            );
        }
        Ok(calls)
    }

    fn call_reference(
        &self,
        alleles: &[Allele],
        latents: &PopulationLatents,
        _pileups: &ReadMap,
    ) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_refcall_posterior);
        let mut calls = Vec::new();
        for allele in alleles {
            // All samples homozygous reference.
            let posterior: f64 = latents
                .posteriors
                .values()
                .map(|posteriors| homozygous_posterior(allele, &latents.genotypes, posteriors))
                .product();
            if posterior < min_posterior {
                continue;
            }
            let genotype = Genotype::new(vec![allele.clone(); self.params.ploidy as usize]);
            let mut genotypes = BTreeMap::new();
            for sample in latents.posteriors.keys() {
                let mut genotype_call = GenotypeCallBuilder::default();
                genotype_call
                    .genotype(genotype.clone())
                    .quality(quality_from_posterior(posterior));
                genotypes.insert(sample.clone(), genotype_call.build().unwrap());
            }
            calls.push(
                CallBuilder::default()
                    .call_type(CallType::Reference)
                    .region(allele.region().clone())
                    .quality(quality_from_posterior(posterior))
                    .genotypes(genotypes)
                    .build()
                    .unwrap(),
            );
        }
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calling::callers::call_region;
    use crate::config::CallerConfig;
    use crate::model::tests::fixture;
    use crate::reads::ReadMap;
    use crate::types::GenomicRegion;

    #[test]
    fn test_variant_in_one_of_two_samples() {
        let (reference, _, mut reads) = fixture("s1", 12, 0);
        let (_, _, s2) = fixture("s2", 6, 6);
        reads.extend(s2.into_iter().collect::<ReadMap>());
        let region = GenomicRegion::new("1", 10, 30);
        let candidate = Variant::new(
            GenomicRegion::new("1", 20, 21),
            b"A".to_vec(),
            b"T".to_vec(),
        );
        let caller = PopulationCaller::new(PopulationCallerParams {
            ploidy: 2,
            prior: CoalescentParams::default(),
            min_variant_posterior: 2.0,
            min_refcall_posterior: 2.0,
            max_genotypes: 1000,
        });
        let window = call_region(
            &caller,
            &region,
            &[candidate.clone()],
            &reads,
            &reference,
            &CallerConfig::default(),
            None,
        )
        .unwrap();
        let variant_calls: Vec<_> = window.calls.iter().filter(|c| !c.is_reference()).collect();
        assert_eq!(variant_calls.len(), 1);
        let call = variant_calls[0];
        assert!(call.genotypes()["s1"].genotype().is_homozygous());
        assert!(!call.genotypes()["s2"].genotype().is_homozygous());
    }
}

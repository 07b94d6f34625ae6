// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::Result;
use bio::stats::LogProb;
use derive_new::new;

use crate::calling::callers::{
    allele_posterior, homozygous_posterior, map_site_genotype, min_posterior_from_phred,
    propose_genotypes, quality_from_posterior, Caller,
};
use crate::calling::calls::{Call, CallBuilder, CallType, GenotypeCallBuilder};
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::individual::IndividualModel;
use crate::model::priors::{CoalescentModel, CoalescentParams};
use crate::model::{
    genotype_indices, marginal_haplotype_posteriors, GenotypeProbabilityMap,
    HaplotypeProbabilityMap, Latents,
};
use crate::reads::ReadMap;
use crate::types::{Allele, Genotype, Haplotype, Variant};
use crate::SampleName;

#[derive(Clone, Debug)]
pub struct IndividualCallerParams {
    pub ploidy: u32,
    pub prior: CoalescentParams,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub max_genotypes: usize,
}

/// The single-sample germline caller.
#[derive(new)]
pub struct IndividualCaller {
    params: IndividualCallerParams,
}

pub struct IndividualLatents {
    haplotypes: Vec<Haplotype>,
    genotypes: Vec<Genotype<Haplotype>>,
    posteriors: Vec<f64>,
    sample: SampleName,
    pub log_evidence: LogProb,
}

impl IndividualLatents {
    pub fn genotypes(&self) -> &[Genotype<Haplotype>] {
        &self.genotypes
    }

    pub fn posteriors(&self) -> &[f64] {
        &self.posteriors
    }
}

impl Latents for IndividualLatents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap {
        let indices = genotype_indices(&self.genotypes, &self.haplotypes);
        marginal_haplotype_posteriors(&self.haplotypes, &indices, &self.posteriors)
    }

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap {
        let mut result = GenotypeProbabilityMap::new();
        result.insert(
            self.sample.clone(),
            self.genotypes
                .iter()
                .cloned()
                .zip(self.posteriors.iter().copied())
                .collect(),
        );
        result
    }
}

impl Caller for IndividualCaller {
    type Latents = IndividualLatents;

    fn name(&self) -> &str {
        "individual"
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
    ) -> Result<IndividualLatents> {
        assert_eq!(
            likelihoods.samples().len(),
            1,
            "the individual caller is single-sample"
        );
        let sample = likelihoods.samples()[0].clone();
        let prior_model = CoalescentModel::new(haplotypes[0].clone(), self.params.prior);
        let (genotypes, priors) = propose_genotypes(
            haplotypes,
            self.params.ploidy,
            self.params.max_genotypes,
            &prior_model,
        );
        let indices = genotype_indices(&genotypes, haplotypes);
        likelihoods.prime(&sample)?;
        let inferences = IndividualModel::new().evaluate(&indices, &priors, likelihoods)?;
        likelihoods.unprime();
        Ok(IndividualLatents {
            haplotypes: haplotypes.to_vec(),
            genotypes,
            posteriors: inferences
                .genotype_log_posteriors
                .iter()
                .map(|p| p.exp())
                .collect(),
            sample,
            log_evidence: inferences.log_evidence,
        })
    }

    fn call_variants(&self, candidates: &[Variant], latents: &IndividualLatents) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_variant_posterior);
        let mut calls = Vec::new();
        for candidate in candidates {
            let posterior = allele_posterior(
                &candidate.alt_allele(),
                &latents.genotypes,
                &latents.posteriors,
            );
            if posterior < min_posterior {
                continue;
            }
            let (genotype, genotype_posterior) =
                match map_site_genotype(candidate.region(), &latents.genotypes, &latents.posteriors)
                {
                    Some(map) => map,
                    None => continue,
                };
            let mut genotype_call = GenotypeCallBuilder::default();
            genotype_call
                .genotype(genotype)
                .quality(quality_from_posterior(genotype_posterior));
            let mut genotypes = BTreeMap::new();
            genotypes.insert(latents.sample.clone(), genotype_call.build().unwrap());
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
        latents: &IndividualLatents,
        _pileups: &ReadMap,
    ) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_refcall_posterior);
        let mut calls = Vec::new();
        for allele in alleles {
            let posterior = homozygous_posterior(allele, &latents.genotypes, &latents.posteriors);
            if posterior < min_posterior {
                continue;
            }
            let genotype = Genotype::new(vec![allele.clone(); self.params.ploidy as usize]);
            let mut genotype_call = GenotypeCallBuilder::default();
            genotype_call
                .genotype(genotype)
                .quality(quality_from_posterior(posterior));
            let mut genotypes = BTreeMap::new();
            genotypes.insert(latents.sample.clone(), genotype_call.build().unwrap());
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

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::Result;
use derive_new::new;

use crate::calling::callers::{
    map_site_genotype, min_posterior_from_phred, propose_genotypes, quality_from_posterior, Caller,
};
use crate::calling::calls::{Call, CallBuilder, CallType, GenotypeCallBuilder};
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::denovo::{CachingStrategy, DeNovoModel, DeNovoModelParams};
use crate::model::priors::{CoalescentModel, CoalescentParams};
use crate::model::trio::{JointTrioGenotype, Trio, TrioModel};
use crate::model::{
    genotype_indices, marginal_haplotype_posteriors, GenotypeProbabilityMap,
    HaplotypeProbabilityMap, Latents,
};
use crate::reads::ReadMap;
use crate::types::{Allele, Genotype, Haplotype, Variant};

#[derive(Clone, Debug)]
pub struct TrioCallerParams {
    pub prior: CoalescentParams,
    pub mutation: DeNovoModelParams,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub max_genotypes: usize,
    pub max_joint_genotypes: usize,
}

/// The mother/father/child caller with a de novo mutation model linking the
/// generations. Diploid only.
#[derive(new)]
pub struct TrioCaller {
    params: TrioCallerParams,
    trio: Trio,
}

pub struct TrioLatents {
    haplotypes: Vec<Haplotype>,
    genotypes: Vec<Genotype<Haplotype>>,
    joint: Vec<(JointTrioGenotype, f64)>,
    maternal: Vec<f64>,
    paternal: Vec<f64>,
    child: Vec<f64>,
    trio: Trio,
}

impl Latents for TrioLatents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap {
        let indices = genotype_indices(&self.genotypes, &self.haplotypes);
        let mut result: HaplotypeProbabilityMap = self
            .haplotypes
            .iter()
            .map(|h| (h.clone(), 0.0))
            .collect();
        for posteriors in [&self.maternal, &self.paternal, &self.child] {
            for (haplotype, posterior) in
                marginal_haplotype_posteriors(&self.haplotypes, &indices, posteriors)
            {
                *result.get_mut(&haplotype).unwrap() += posterior / 3.0;
            }
        }
        result
    }

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap {
        let member = |posteriors: &[f64]| {
            self.genotypes
                .iter()
                .cloned()
                .zip(posteriors.iter().copied())
                .collect()
        };
        let mut result = GenotypeProbabilityMap::new();
        result.insert(self.trio.mother.clone(), member(&self.maternal));
        result.insert(self.trio.father.clone(), member(&self.paternal));
        result.insert(self.trio.child.clone(), member(&self.child));
        result
    }
}

impl TrioCaller {
    /// Posterior that the child carries the allele while neither parent
    /// does, marginalized over the joint genotype posterior.
    fn denovo_posterior(&self, allele: &Allele, latents: &TrioLatents) -> f64 {
        let carries = |genotype_index: usize| {
            latents.genotypes[genotype_index]
                .iter()
                .any(|h| h.includes(allele))
        };
        latents
            .joint
            .iter()
            .filter(|(cell, _)| carries(cell.child) && !carries(cell.maternal) && !carries(cell.paternal))
            .map(|(_, posterior)| posterior)
            .sum()
    }
}

impl Caller for TrioCaller {
    type Latents = TrioLatents;

    fn name(&self) -> &str {
        "trio"
    }

    fn call_types(&self) -> &[CallType] {
        &[CallType::Germline, CallType::Denovo, CallType::Reference]
    }

    fn min_callable_ploidy(&self) -> u32 {
        2
    }

    fn max_callable_ploidy(&self) -> u32 {
        2
    }

    fn infer_latents(
        &self,
        haplotypes: &[Haplotype],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<TrioLatents> {
        let prior_model = CoalescentModel::new(haplotypes[0].clone(), self.params.prior);
        let (genotypes, priors) =
            propose_genotypes(haplotypes, 2, self.params.max_genotypes, &prior_model);
        let indices = genotype_indices(&genotypes, haplotypes);
        let mut denovo = DeNovoModel::new(self.params.mutation, CachingStrategy::Address);
        denovo.prime(haplotypes.to_vec());
        let model = TrioModel::new(&denovo, self.params.max_joint_genotypes);
        let inferences = model.evaluate(&indices, &priors, likelihoods, &self.trio)?;
        Ok(TrioLatents {
            haplotypes: haplotypes.to_vec(),
            genotypes,
            joint: inferences
                .joint_log_posteriors
                .into_iter()
                .map(|(cell, p)| (cell, p.exp()))
                .collect(),
            maternal: inferences
                .maternal_log_posteriors
                .iter()
                .map(|p| p.exp())
                .collect(),
            paternal: inferences
                .paternal_log_posteriors
                .iter()
                .map(|p| p.exp())
                .collect(),
            child: inferences
                .child_log_posteriors
                .iter()
                .map(|p| p.exp())
                .collect(),
            trio: self.trio.clone(),
        })
    }

    fn call_variants(&self, candidates: &[Variant], latents: &TrioLatents) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_variant_posterior);
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();
            // Any trio member carries the allele.
            let posterior: f64 = latents
                .joint
                .iter()
                .filter(|(cell, _)| {
                    [cell.maternal, cell.paternal, cell.child].iter().any(|&g| {
                        latents.genotypes[g].iter().any(|h| h.includes(&alt))
                    })
                })
                .map(|(_, p)| p)
                .sum();
            if posterior < min_posterior {
                continue;
            }

            let mut genotypes = BTreeMap::new();
            for (sample, member_posteriors) in [
                (&latents.trio.mother, &latents.maternal),
                (&latents.trio.father, &latents.paternal),
                (&latents.trio.child, &latents.child),
            ] {
                if let Some((genotype, genotype_posterior)) =
                    map_site_genotype(candidate.region(), &latents.genotypes, member_posteriors)
                {
                    let mut genotype_call = GenotypeCallBuilder::default();
                    genotype_call
                        .genotype(genotype)
                        .quality(quality_from_posterior(genotype_posterior));
                    genotypes.insert(sample.clone(), genotype_call.build().unwrap());
                }
            }

            let denovo_posterior = self.denovo_posterior(&alt, latents);
            let call_type = if denovo_posterior >= 0.5 {
                CallType::Denovo
            } else {
                CallType::Germline
            };
            let mut builder = CallBuilder::default();
            builder
                .call_type(call_type)
                .region(candidate.region().clone())
                .variant(Some(candidate.clone()))
                .quality(quality_from_posterior(posterior))
                .genotypes(genotypes);
            if call_type == CallType::Denovo {
                builder.model_posterior(Some(denovo_posterior));
            }
            calls.push(builder.build().unwrap());
        }
        Ok(calls)
    }

    fn call_reference(
        &self,
        alleles: &[Allele],
        latents: &TrioLatents,
        _pileups: &ReadMap,
    ) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_refcall_posterior);
        let mut calls = Vec::new();
        for allele in alleles {
            // All members homozygous reference, under the joint posterior.
            let posterior: f64 = latents
                .joint
                .iter()
                .filter(|(cell, _)| {
                    [cell.maternal, cell.paternal, cell.child].iter().all(|&g| {
                        latents.genotypes[g].iter().all(|h| h.includes(allele))
                    })
                })
                .map(|(_, p)| p)
                .sum();
            if posterior < min_posterior {
                continue;
            }
            let genotype = Genotype::new(vec![allele.clone(); 2]);
            let mut genotypes = BTreeMap::new();
            for sample in [&latents.trio.mother, &latents.trio.father, &latents.trio.child] {
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

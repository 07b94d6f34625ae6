// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use anyhow::Result;
use derive_new::new;

use crate::calling::callers::{
    genotype_at_site, map_site_genotype, min_posterior_from_phred, propose_genotypes,
    quality_from_posterior, Caller,
};
use crate::calling::calls::{Call, CallBuilder, CallType, GenotypeCallBuilder};
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::denovo::{CachingStrategy, DeNovoModel, DeNovoModelParams};
use crate::model::population::PopulationModel;
use crate::model::priors::{CancerGenotypePriorModel, CoalescentModel, CoalescentParams};
use crate::model::subclone::{SubcloneModel, SubcloneModelParams, SubclonePriors};
use crate::model::{
    cancer_genotype_indices, genotype_indices, marginal_haplotype_posteriors,
    GenotypeProbabilityMap, HaplotypeProbabilityMap, Latents,
};
use crate::reads::ReadMap;
use crate::types::genotype::generate_all_cancer_genotypes;
use crate::types::{Allele, CancerGenotype, Genotype, Haplotype, Variant};
use crate::SampleName;

/// Dirichlet concentrations of the subclone mixture prior. Normal samples
/// are strongly biased against somatic mass.
const NORMAL_GERMLINE_ALPHA: f64 = 10.0;
const NORMAL_SOMATIC_ALPHA: f64 = 0.08;
const TUMOR_GERMLINE_ALPHA: f64 = 5.0;
const TUMOR_SOMATIC_ALPHA: f64 = 1.0;

#[derive(Clone, Debug)]
pub struct CancerCallerParams {
    pub ploidy: u32,
    pub prior: CoalescentParams,
    pub mutation: DeNovoModelParams,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub max_genotypes: usize,
    pub max_vb_seeds: usize,
    pub normal_samples: Vec<SampleName>,
}

/// The tumor(-normal) caller: a germline genotype plus subclonal somatic
/// haplotypes with Dirichlet-mixed fractions.
#[derive(new)]
pub struct CancerCaller {
    params: CancerCallerParams,
}

pub struct CancerLatents {
    haplotypes: Vec<Haplotype>,
    cancer_genotypes: Vec<CancerGenotype>,
    posteriors: Vec<f64>,
    germline_genotypes: Vec<Genotype<Haplotype>>,
    germline_posteriors: Vec<f64>,
    pub posterior_alphas: BTreeMap<SampleName, Vec<f64>>,
    samples: Vec<SampleName>,
    normal_samples: Vec<SampleName>,
    subclone_log_evidence: f64,
    germline_log_evidence: f64,
}

impl CancerLatents {
    /// The MAP cancer genotype, if any somatic genotype was modeled.
    fn map_cancer_genotype(&self) -> Option<&CancerGenotype> {
        self.cancer_genotypes
            .iter()
            .zip(self.posteriors.iter())
            .max_by(|a, b| a.1.partial_cmp(b.1).expect("bug: NaN posterior"))
            .map(|(genotype, _)| genotype)
    }
}

impl Latents for CancerLatents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap {
        let mut result: HaplotypeProbabilityMap = self
            .haplotypes
            .iter()
            .map(|h| (h.clone(), 0.0))
            .collect();
        if self.cancer_genotypes.is_empty() {
            let indices = genotype_indices(&self.germline_genotypes, &self.haplotypes);
            return marginal_haplotype_posteriors(
                &self.haplotypes,
                &indices,
                &self.germline_posteriors,
            );
        }
        for (genotype, &posterior) in self.cancer_genotypes.iter().zip(self.posteriors.iter()) {
            for haplotype in genotype.demote().copy_unique() {
                *result.get_mut(&haplotype).unwrap() += posterior;
            }
        }
        result
    }

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap {
        // Normal samples carry the germline marginal; tumor samples the
        // demoted cancer genotypes, so downstream read assignment sees the
        // somatic haplotype.
        let germline: std::collections::HashMap<Genotype<Haplotype>, f64> = self
            .germline_genotypes
            .iter()
            .cloned()
            .zip(self.germline_posteriors.iter().copied())
            .collect();
        let mut demoted: std::collections::HashMap<Genotype<Haplotype>, f64> =
            std::collections::HashMap::new();
        for (genotype, &posterior) in self.cancer_genotypes.iter().zip(self.posteriors.iter()) {
            *demoted.entry(genotype.demote()).or_insert(0.0) += posterior;
        }
        self.samples
            .iter()
            .map(|sample| {
                let is_normal =
                    self.normal_samples.contains(sample) || demoted.is_empty();
                (
                    sample.clone(),
                    if is_normal {
                        germline.clone()
                    } else {
                        demoted.clone()
                    },
                )
            })
            .collect()
    }
}

impl CancerCaller {
    fn alphas(&self, samples: &[SampleName], num_slots: usize) -> BTreeMap<SampleName, Vec<f64>> {
        samples
            .iter()
            .map(|sample| {
                let is_normal = self.params.normal_samples.contains(sample);
                let (germline, somatic) = if is_normal {
                    (NORMAL_GERMLINE_ALPHA, NORMAL_SOMATIC_ALPHA)
                } else {
                    (TUMOR_GERMLINE_ALPHA, TUMOR_SOMATIC_ALPHA)
                };
                let mut alpha = vec![germline; num_slots];
                alpha[num_slots - 1] = somatic;
                (sample.clone(), alpha)
            })
            .collect()
    }

    fn somatic_posterior(&self, allele: &Allele, latents: &CancerLatents) -> f64 {
        latents
            .cancer_genotypes
            .iter()
            .zip(latents.posteriors.iter())
            .filter(|(genotype, _)| {
                genotype.somatic().iter().any(|h| h.includes(allele))
                    && !genotype.germline().iter().any(|h| h.includes(allele))
            })
            .map(|(_, &p)| p)
            .sum()
    }

    fn germline_allele_posterior(&self, allele: &Allele, latents: &CancerLatents) -> f64 {
        latents
            .germline_genotypes
            .iter()
            .zip(latents.germline_posteriors.iter())
            .filter(|(genotype, _)| genotype.iter().any(|h| h.includes(allele)))
            .map(|(_, &p)| p)
            .sum()
    }
}

impl Caller for CancerCaller {
    type Latents = CancerLatents;

    fn name(&self) -> &str {
        "cancer"
    }

    fn call_types(&self) -> &[CallType] {
        &[
            CallType::Germline,
            CallType::Somatic,
            CallType::CancerGenotype,
            CallType::Reference,
        ]
    }

    fn max_callable_ploidy(&self) -> u32 {
        // Germline ploidy plus one somatic haplotype.
        self.params.ploidy + 1
    }

    fn infer_latents(
        &self,
        haplotypes: &[Haplotype],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<CancerLatents> {
        let samples = likelihoods.samples().to_vec();
        let prior_model = CoalescentModel::new(haplotypes[0].clone(), self.params.prior);
        let (germline_genotypes, germline_priors) = propose_genotypes(
            haplotypes,
            self.params.ploidy,
            self.params.max_genotypes,
            &prior_model,
        );

        // Germline-only model, also serving as the comparison model for the
        // model posterior.
        let germline_indices = genotype_indices(&germline_genotypes, haplotypes);
        let germline_inferences =
            PopulationModel::new().evaluate(&germline_indices, &germline_priors, likelihoods)?;
        let germline_pooled = germline_inferences.pooled_genotype_posteriors(germline_genotypes.len());
        let germline_log_evidence = *germline_inferences.log_evidence;

        let cancer_genotypes = generate_all_cancer_genotypes(&germline_genotypes, haplotypes);
        if cancer_genotypes.is_empty() {
            return Ok(CancerLatents {
                haplotypes: haplotypes.to_vec(),
                cancer_genotypes,
                posteriors: Vec::new(),
                germline_genotypes,
                germline_posteriors: germline_pooled,
                posterior_alphas: BTreeMap::new(),
                samples,
                normal_samples: self.params.normal_samples.clone(),
                subclone_log_evidence: germline_log_evidence,
                germline_log_evidence,
            });
        }

        let mutation_model = DeNovoModel::new(self.params.mutation, CachingStrategy::Value);
        let cancer_prior_model = CancerGenotypePriorModel::new(
            CoalescentModel::new(haplotypes[0].clone(), self.params.prior),
            mutation_model,
        );
        let genotype_log_priors = cancer_genotypes
            .iter()
            .map(|g| cancer_prior_model.evaluate(g))
            .collect();

        let indices = cancer_genotype_indices(&cancer_genotypes, haplotypes);
        let num_slots = indices[0].num_slots();
        let priors = SubclonePriors {
            genotype_log_priors,
            alphas: self.alphas(&samples, num_slots),
        };
        let model = SubcloneModel::new(SubcloneModelParams {
            max_seeds: self.params.max_vb_seeds,
            ..Default::default()
        });
        let inferences = model.evaluate(&indices, &priors, likelihoods)?;

        // Germline marginal over the cancer genotype posterior.
        let mut germline_posteriors = vec![0.0; germline_genotypes.len()];
        for (genotype, posterior) in cancer_genotypes
            .iter()
            .zip(inferences.genotype_log_posteriors.iter())
        {
            let index = germline_genotypes
                .iter()
                .position(|g| g == genotype.germline())
                .expect("bug: cancer genotype with unknown germline");
            germline_posteriors[index] += posterior.exp();
        }

        Ok(CancerLatents {
            haplotypes: haplotypes.to_vec(),
            cancer_genotypes,
            posteriors: inferences
                .genotype_log_posteriors
                .iter()
                .map(|p| p.exp())
                .collect(),
            germline_genotypes,
            germline_posteriors,
            posterior_alphas: inferences.posterior_alphas,
            samples,
            normal_samples: self.params.normal_samples.clone(),
            subclone_log_evidence: inferences.approx_log_evidence,
            germline_log_evidence,
        })
    }

    fn call_variants(&self, candidates: &[Variant], latents: &CancerLatents) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_variant_posterior);
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();
            let somatic_posterior = self.somatic_posterior(&alt, latents);
            let germline_posterior = self.germline_allele_posterior(&alt, latents);

            if somatic_posterior >= min_posterior && somatic_posterior > germline_posterior {
                let mut genotypes = BTreeMap::new();
                let map_cancer = latents
                    .map_cancer_genotype()
                    .expect("bug: somatic posterior without cancer genotypes");
                for sample in &latents.samples {
                    let is_normal = self.params.normal_samples.contains(sample);
                    // Normal samples carry the germline only; tumor samples
                    // carry the full cancer genotype including the somatic
                    // component.
                    let genotype = if is_normal {
                        genotype_at_site(map_cancer.germline(), candidate.region())
                    } else {
                        genotype_at_site(&map_cancer.demote(), candidate.region())
                    };
                    if let Some(genotype) = genotype {
                        let mut genotype_call = GenotypeCallBuilder::default();
                        genotype_call
                            .genotype(genotype)
                            .quality(quality_from_posterior(somatic_posterior));
                        genotypes.insert(sample.clone(), genotype_call.build().unwrap());
                    }
                }
                calls.push(
                    CallBuilder::default()
                        .call_type(CallType::Somatic)
                        .region(candidate.region().clone())
                        .variant(Some(candidate.clone()))
                        .quality(quality_from_posterior(somatic_posterior))
                        .model_posterior(Some(somatic_posterior))
                        .genotypes(genotypes)
                        .build()
                        .unwrap(),
                );
            } else if germline_posterior >= min_posterior {
                let mut genotypes = BTreeMap::new();
                for sample in &latents.samples {
                    if let Some((genotype, genotype_posterior)) = map_site_genotype(
                        candidate.region(),
                        &latents.germline_genotypes,
                        &latents.germline_posteriors,
                    ) {
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
                        .quality(quality_from_posterior(germline_posterior))
                        .genotypes(genotypes)
                        .build()
                        .unwrap(),
                );
            }
        }
        Ok(calls)
    }

    fn call_reference(
        &self,
        alleles: &[Allele],
        latents: &CancerLatents,
        _pileups: &ReadMap,
    ) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_refcall_posterior);
        let mut calls = Vec::new();
        for allele in alleles {
            let posterior: f64 = if latents.cancer_genotypes.is_empty() {
                latents
                    .germline_genotypes
                    .iter()
                    .zip(latents.germline_posteriors.iter())
                    .filter(|(g, _)| g.iter().all(|h| h.includes(allele)))
                    .map(|(_, &p)| p)
                    .sum()
            } else {
                latents
                    .cancer_genotypes
                    .iter()
                    .zip(latents.posteriors.iter())
                    .filter(|(g, _)| g.demote().iter().all(|h| h.includes(allele)))
                    .map(|(_, &p)| p)
                    .sum()
            };
            if posterior < min_posterior {
                continue;
            }
            let genotype = Genotype::new(vec![allele.clone(); self.params.ploidy as usize]);
            let mut genotypes = BTreeMap::new();
            for sample in &latents.samples {
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

    /// Posterior that the subclone model explains the data better than the
    /// germline-only model.
    fn model_posterior(
        &self,
        _haplotypes: &[Haplotype],
        _likelihoods: &HaplotypeLikelihoodArray,
        latents: &CancerLatents,
    ) -> Option<f64> {
        let diff = latents.germline_log_evidence - latents.subclone_log_evidence;
        Some(1.0 / (1.0 + diff.exp()))
    }
}

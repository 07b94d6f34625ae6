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
use crate::model::cell::{CellModel, CellModelParams};
use crate::model::priors::{CoalescentModel, CoalescentParams};
use crate::model::{
    genotype_indices, marginal_haplotype_posteriors, GenotypeProbabilityMap,
    HaplotypeProbabilityMap, Latents,
};
use crate::reads::ReadMap;
use crate::types::{Allele, Genotype, Haplotype, Variant};
use crate::SampleName;

#[derive(Clone, Debug)]
pub struct CellCallerParams {
    pub ploidy: u32,
    pub prior: CoalescentParams,
    pub min_variant_posterior: f64,
    pub min_refcall_posterior: f64,
    pub max_genotypes: usize,
    pub max_clones: u32,
    pub max_vb_seeds: usize,
    pub dropout_concentration: f64,
    pub normal_samples: Vec<SampleName>,
}

/// The single-cell caller: a clone phylogeny over cells with allele
/// dropout.
#[derive(new)]
pub struct CellCaller {
    params: CellCallerParams,
}

pub struct CellLatents {
    haplotypes: Vec<Haplotype>,
    genotypes: Vec<Genotype<Haplotype>>,
    /// Per-cell genotype posteriors, marginalized over phylogenies.
    posteriors: BTreeMap<SampleName, Vec<f64>>,
    pub dropout_posterior: (f64, f64),
}

impl Latents for CellLatents {
    fn haplotype_posteriors(&self) -> HaplotypeProbabilityMap {
        let indices = genotype_indices(&self.genotypes, &self.haplotypes);
        let num_cells = self.posteriors.len().max(1) as f64;
        let mut result: HaplotypeProbabilityMap = self
            .haplotypes
            .iter()
            .map(|h| (h.clone(), 0.0))
            .collect();
        for posteriors in self.posteriors.values() {
            for (haplotype, posterior) in
                marginal_haplotype_posteriors(&self.haplotypes, &indices, posteriors)
            {
                *result.get_mut(&haplotype).unwrap() += posterior / num_cells;
            }
        }
        result
    }

    fn genotype_posteriors(&self) -> GenotypeProbabilityMap {
        self.posteriors
            .iter()
            .map(|(cell, posteriors)| {
                (
                    cell.clone(),
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

impl Caller for CellCaller {
    type Latents = CellLatents;

    fn name(&self) -> &str {
        "cell"
    }

    fn call_types(&self) -> &[CallType] {
        &[CallType::Cell, CallType::Reference]
    }

    fn max_callable_ploidy(&self) -> u32 {
        self.params.ploidy
    }

    fn infer_latents(
        &self,
        haplotypes: &[Haplotype],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<CellLatents> {
        let prior_model = CoalescentModel::new(haplotypes[0].clone(), self.params.prior);
        let (genotypes, priors) = propose_genotypes(
            haplotypes,
            self.params.ploidy,
            self.params.max_genotypes,
            &prior_model,
        );
        let indices = genotype_indices(&genotypes, haplotypes);
        let model = CellModel::new(CellModelParams {
            max_clones: self.params.max_clones,
            dropout_concentration: self.params.dropout_concentration,
            max_vb_seeds: self.params.max_vb_seeds,
            ..Default::default()
        });
        let inferences = model.evaluate(
            &indices,
            &priors,
            likelihoods,
            &self.params.normal_samples,
        )?;
        let posteriors = inferences
            .sample_genotype_log_posteriors
            .iter()
            .map(|(cell, log_posteriors)| {
                let mut posteriors: Vec<f64> =
                    log_posteriors.iter().map(|p| p.exp()).collect();
                let total: f64 = posteriors.iter().sum();
                if total > 0.0 {
                    for p in posteriors.iter_mut() {
                        *p /= total;
                    }
                }
                (cell.clone(), posteriors)
            })
            .collect();
        Ok(CellLatents {
            haplotypes: haplotypes.to_vec(),
            genotypes,
            posteriors,
            dropout_posterior: inferences.dropout_posterior,
        })
    }

    fn call_variants(&self, candidates: &[Variant], latents: &CellLatents) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_variant_posterior);
        let mut calls = Vec::new();
        for candidate in candidates {
            let alt = candidate.alt_allele();
            // Any cell carries the allele.
            let prob_absent: f64 = latents
                .posteriors
                .values()
                .map(|posteriors| {
                    1.0 - latents
                        .genotypes
                        .iter()
                        .zip(posteriors.iter())
                        .filter(|(g, _)| g.iter().any(|h| h.includes(&alt)))
                        .map(|(_, &p)| p)
                        .sum::<f64>()
                })
                .product();
            let posterior = 1.0 - prob_absent;
            if posterior < min_posterior {
                continue;
            }
            let mut genotypes = BTreeMap::new();
            for (cell, posteriors) in &latents.posteriors {
                if let Some((genotype, genotype_posterior)) =
                    map_site_genotype(candidate.region(), &latents.genotypes, posteriors)
                {
                    let mut genotype_call = GenotypeCallBuilder::default();
                    genotype_call
                        .genotype(genotype)
                        .quality(quality_from_posterior(genotype_posterior));
                    genotypes.insert(cell.clone(), genotype_call.build().unwrap());
                }
            }
            calls.push(
                CallBuilder::default()
                    .call_type(CallType::Cell)
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
        latents: &CellLatents,
        _pileups: &ReadMap,
    ) -> Result<Vec<Call>> {
        let min_posterior = min_posterior_from_phred(self.params.min_refcall_posterior);
        let mut calls = Vec::new();
        for allele in alleles {
            let posterior: f64 = latents
                .posteriors
                .values()
                .map(|posteriors| {
                    latents
                        .genotypes
                        .iter()
                        .zip(posteriors.iter())
                        .filter(|(g, _)| g.iter().all(|h| h.includes(allele)))
                        .map(|(_, &p)| p)
                        .sum::<f64>()
                })
                .product();
            if posterior < min_posterior {
                continue;
            }
            let genotype = Genotype::new(vec![allele.clone(); self.params.ploidy as usize]);
            let mut genotypes = BTreeMap::new();
            for cell in latents.posteriors.keys() {
                let mut genotype_call = GenotypeCallBuilder::default();
                genotype_call
                    .genotype(genotype.clone())
                    .quality(quality_from_posterior(posterior));
                genotypes.insert(cell.clone(), genotype_call.build().unwrap());
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
    fn test_cell_variant_call() {
        let (reference, _, mut reads) = fixture("cell0", 20, 0);
        let (_, _, c1) = fixture("cell1", 10, 10);
        let (_, _, c2) = fixture("cell2", 10, 10);
        reads.extend(c1.into_iter().collect::<ReadMap>());
        reads.extend(c2.into_iter().collect::<ReadMap>());
        let region = GenomicRegion::new("1", 10, 30);
        let candidate = Variant::new(
            GenomicRegion::new("1", 20, 21),
            b"A".to_vec(),
            b"T".to_vec(),
        );
        let caller = CellCaller::new(CellCallerParams {
            ploidy: 2,
            prior: CoalescentParams::default(),
            min_variant_posterior: 2.0,
            min_refcall_posterior: 2.0,
            max_genotypes: 1000,
            max_clones: 2,
            max_vb_seeds: 12,
            dropout_concentration: 0.2,
            normal_samples: vec!["cell0".to_owned()],
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
        let cell_calls: Vec<_> = window
            .calls
            .iter()
            .filter(|c| *c.call_type() == CallType::Cell)
            .collect();
        assert_eq!(cell_calls.len(), 1);
        let call = cell_calls[0];
        assert!(call.genotypes()["cell0"].genotype().is_homozygous());
        assert!(!call.genotypes()["cell1"].genotype().is_homozygous());
        assert!(!call.genotypes()["cell2"].genotype().is_homozygous());
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! The caller family. Concrete callers implement [`Caller`]; the shared
//! driver [`call_region`] performs haplotype enumeration, likelihood
//! population, deduplication, read assignment and call collation around
//! them.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Result;
use bio::stats::{PHREDProb, Prob};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::assignment::{
    compute_allele_support_with_ambiguous, compute_haplotype_support, AlleleSupportMap,
    AmbiguousRead, AssignmentConfig, HaplotypeLogPriorMap,
};
use crate::calling::calls::{collate_calls, Call, CallType, PhaseCall};
use crate::calling::record::{build_record, DepthAnnotation, OutputRecord};
use crate::config::CallerConfig;
use crate::errors::Error;
use crate::haplotypes::HaplotypeGenerator;
use crate::likelihood::{HaplotypeLikelihoodArray, HaplotypeLikelihoodModel};
use crate::model::Latents;
use crate::reads::ReadMap;
use crate::reference::ReferenceSource;
use crate::types::{Allele, GenomicRegion, Genotype, Haplotype, Variant};
use crate::utils::downsampler::Downsampler;
use crate::SampleName;

pub mod cancer;
pub mod cell;
pub mod factory;
pub mod individual;
pub mod population;
pub mod trio;

pub use factory::{make_caller, CallerKind, ConfiguredCaller};

/// Depth at which windows are thinned before likelihood computation, and
/// the depth they are thinned to.
const DOWNSAMPLE_TRIGGER_DEPTH: usize = 1000;
const DOWNSAMPLE_TARGET_DEPTH: usize = 500;

/// The contract every concrete caller supplies; everything else is handled
/// by the shared driver.
pub trait Caller {
    type Latents: Latents;

    fn name(&self) -> &str;

    fn call_types(&self) -> &[CallType];

    fn min_callable_ploidy(&self) -> u32 {
        1
    }

    fn max_callable_ploidy(&self) -> u32;

    /// Remove duplicate haplotypes in place, returning the number removed.
    /// The reference haplotype is first and must stay first.
    fn remove_duplicates(&self, haplotypes: &mut Vec<Haplotype>) -> usize {
        let before = haplotypes.len();
        let mut seen: Vec<Haplotype> = Vec::with_capacity(before);
        haplotypes.retain(|h| {
            if seen.contains(h) {
                false
            } else {
                seen.push(h.clone());
                true
            }
        });
        before - haplotypes.len()
    }

    fn infer_latents(
        &self,
        haplotypes: &[Haplotype],
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<Self::Latents>;

    fn call_variants(&self, candidates: &[Variant], latents: &Self::Latents) -> Result<Vec<Call>>;

    fn call_reference(
        &self,
        alleles: &[Allele],
        latents: &Self::Latents,
        pileups: &ReadMap,
    ) -> Result<Vec<Call>>;

    /// Posterior probability that this caller's model explains the window
    /// better than a simpler alternative, if the caller defines one.
    fn model_posterior(
        &self,
        _haplotypes: &[Haplotype],
        _likelihoods: &HaplotypeLikelihoodArray,
        _latents: &Self::Latents,
    ) -> Option<f64> {
        None
    }
}

/// The product of calling one window.
pub struct CalledWindow {
    pub region: GenomicRegion,
    pub calls: Vec<Call>,
    /// Per-sample support of the called alleles from read assignment.
    pub support: BTreeMap<SampleName, AlleleSupportMap>,
    pub ambiguous: BTreeMap<SampleName, Vec<AmbiguousRead>>,
}

impl CalledWindow {
    /// Render the window's calls as output records in output order.
    pub fn records(&self, samples: &[SampleName], reads: &ReadMap) -> Vec<OutputRecord> {
        self.calls
            .iter()
            .map(|call| {
                let mut depths = BTreeMap::new();
                for sample in samples {
                    let depth = reads.get(sample).map_or(0, |reads| {
                        reads
                            .iter()
                            .filter(|read| read.region().overlaps(call.region()))
                            .count()
                    });
                    let assigned_depth = call
                        .variant()
                        .as_ref()
                        .and_then(|variant| {
                            self.support
                                .get(sample)
                                .and_then(|support| support.get(&variant.alt_allele()))
                                .map(|reads| reads.len())
                        })
                        .unwrap_or(0);
                    depths.insert(
                        sample.clone(),
                        DepthAnnotation {
                            depth,
                            assigned_depth,
                        },
                    );
                }
                build_record(call, samples, &depths)
            })
            .collect()
    }
}

/// Drive one caller over one calling window.
pub fn call_region<C: Caller, R: ReferenceSource + ?Sized>(
    caller: &C,
    region: &GenomicRegion,
    candidates: &[Variant],
    reads: &ReadMap,
    reference: &R,
    config: &CallerConfig,
    deadline: Option<Instant>,
) -> Result<CalledWindow> {
    let check_deadline = |stage: &str| -> Result<(), Error> {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                debug!("window {} timed out during {}", region, stage);
                return Err(Error::WindowTimeout { index: 0 });
            }
        }
        Ok(())
    };

    // 1. Haplotype proposal, bounded.
    let generator = HaplotypeGenerator::new(config.max_haplotypes);
    let mut block = generator.generate(region, candidates, reference)?;
    if config.deduplicate_haplotypes_with_prior_model {
        // Among value-equal haplotypes keep the parsimonious allele
        // decomposition, which the prior favors. The reference haplotype has
        // no alleles and stays first under the stable sort.
        block.haplotypes.sort_by_key(|h| h.alleles().len());
    }
    let removed = caller.remove_duplicates(&mut block.haplotypes);
    if removed > 0 {
        debug!("removed {} duplicate haplotype(s) in {}", removed, region);
    }
    check_deadline("haplotype generation")?;

    // 2. Likelihoods over downsampled reads.
    let downsampler = Downsampler::new(DOWNSAMPLE_TRIGGER_DEPTH, DOWNSAMPLE_TARGET_DEPTH);
    let reads: ReadMap = reads
        .iter()
        .map(|(sample, reads)| (sample.clone(), downsampler.downsample(reads.clone())))
        .collect();
    let mut likelihood_model = HaplotypeLikelihoodModel::default();
    let likelihoods = HaplotypeLikelihoodArray::populate(
        &reads,
        &block.haplotypes,
        &mut likelihood_model,
        reference,
    )?;
    check_deadline("likelihood computation")?;

    // 3. Inference.
    let latents = caller.infer_latents(&block.haplotypes, &likelihoods)?;
    check_deadline("inference")?;

    // 4. Variant and reference calls.
    let called_candidates: Vec<Variant> = candidates
        .iter()
        .filter(|candidate| {
            region.contains(candidate.region()) && !block.deferred.contains(candidate)
        })
        .cloned()
        .collect();
    let mut calls = caller.call_variants(&called_candidates, &latents)?;

    let uncalled_sites: Vec<Allele> = reference_alleles_for_refcalls(
        region,
        &called_candidates,
        &calls,
        reference,
    )?;
    calls.extend(caller.call_reference(&uncalled_sites, &latents, &reads)?);

    if let Some(model_posterior) = caller.model_posterior(&block.haplotypes, &likelihoods, &latents)
    {
        for call in calls.iter_mut().filter(|c| !c.is_reference()) {
            if call.model_posterior().is_none() {
                call.set_model_posterior(model_posterior);
            }
        }
    }

    let mut calls = collate_calls(calls);
    check_deadline("call construction")?;

    // 5. Assign reads back to the called haplotypes.
    let genotype_posteriors = latents.genotype_posteriors();
    let haplotype_posteriors = latents.haplotype_posteriors();
    let log_priors: HaplotypeLogPriorMap = haplotype_posteriors
        .iter()
        .map(|(h, p)| (h.clone(), p.max(f64::MIN_POSITIVE).ln()))
        .collect();
    let called_alleles: Vec<Allele> = calls
        .iter()
        .filter_map(|call| call.variant().as_ref().map(|v| v.alt_allele()))
        .collect();
    let mut support = BTreeMap::new();
    let mut ambiguous_reads = BTreeMap::new();
    for (sample, sample_reads) in &reads {
        let map_genotype = match map_genotype(genotype_posteriors.get(sample)) {
            Some(genotype) => genotype,
            None => continue,
        };
        let mut ambiguous = Vec::new();
        // Seeded per sample: assignment stays deterministic per window.
        let mut rng = StdRng::seed_from_u64(seed_from_sample(sample));
        let haplotype_support = compute_haplotype_support(
            &map_genotype,
            sample_reads,
            &log_priors,
            &mut likelihood_model,
            Some(&mut ambiguous),
            &AssignmentConfig {
                ambiguous_action: config.ambiguous_action,
                ambiguous_record: config.ambiguous_record,
            },
            reference,
            &mut rng,
        )?;
        support.insert(
            sample.clone(),
            compute_allele_support_with_ambiguous(&called_alleles, &haplotype_support, &ambiguous),
        );
        ambiguous_reads.insert(sample.clone(), ambiguous);
    }

    // 6. Phase blocks over co-inferred heterozygous calls.
    assign_phase_blocks(&mut calls, &reads);

    Ok(CalledWindow {
        region: region.clone(),
        calls,
        support,
        ambiguous: ambiguous_reads,
    })
}

/// Reference alleles for sites eligible for reference calling: candidate
/// sites without a variant call, or the whole window when there are no
/// candidates at all.
fn reference_alleles_for_refcalls<R: ReferenceSource + ?Sized>(
    region: &GenomicRegion,
    candidates: &[Variant],
    calls: &[Call],
    reference: &R,
) -> Result<Vec<Allele>> {
    if candidates.is_empty() {
        let sequence = reference.fetch(region)?;
        return Ok(vec![Allele::new(region.clone(), sequence)]);
    }
    Ok(candidates
        .iter()
        .filter(|candidate| {
            !calls
                .iter()
                .any(|call| call.variant().as_ref() == Some(candidate))
        })
        .map(|candidate| candidate.ref_allele())
        .collect())
}

/// The maximum a posteriori haplotype genotype of a sample.
fn map_genotype(
    posteriors: Option<&std::collections::HashMap<Genotype<Haplotype>, f64>>,
) -> Option<Genotype<Haplotype>> {
    let posteriors = posteriors?;
    posteriors
        .iter()
        .max_by(|a, b| {
            a.1.partial_cmp(b.1)
                .expect("bug: NaN genotype posterior")
                // Deterministic tie-break.
                .then_with(|| b.0.cmp(a.0))
        })
        .map(|(genotype, _)| genotype.clone())
}

fn seed_from_sample(sample: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    sample.hash(&mut hasher);
    hasher.finish()
}

/// Link heterozygous calls of each sample into one phase block per window:
/// their genotypes were inferred jointly from the same haplotype set, so
/// they factor jointly.
fn assign_phase_blocks(calls: &mut [Call], reads: &ReadMap) {
    for sample in reads.keys() {
        let het_regions: Vec<GenomicRegion> = calls
            .iter()
            .filter(|call| !call.is_reference())
            .filter_map(|call| {
                call.genotypes()
                    .get(sample)
                    .filter(|g| !g.genotype().is_homozygous())
                    .map(|_| call.region().clone())
            })
            .collect();
        if het_regions.len() < 2 {
            continue;
        }
        let block = het_regions
            .iter()
            .skip(1)
            .fold(het_regions[0].clone(), |acc, r| acc.span(r));
        let quality: f64 = calls
            .iter()
            .filter(|call| !call.is_reference())
            .filter_map(|call| {
                call.genotypes()
                    .get(sample)
                    .filter(|g| !g.genotype().is_homozygous())
                    .map(|g| **g.quality())
            })
            .fold(f64::INFINITY, f64::min);
        for call in calls.iter_mut() {
            if call.is_reference() {
                continue;
            }
            let phased = call
                .genotypes()
                .get(sample)
                .map_or(false, |g| !g.genotype().is_homozygous());
            if phased {
                call.set_phase(
                    sample,
                    PhaseCall {
                        region: block.clone(),
                        quality: PHREDProb(quality),
                    },
                );
            }
        }
    }
}

/* ================== helpers shared by the concrete callers ================= */

/// Minimum posterior probability corresponding to a phred-scaled emission
/// threshold.
pub(crate) fn min_posterior_from_phred(quality: f64) -> f64 {
    1.0 - 10f64.powf(-quality / 10.0)
}

/// Call quality from the posterior probability of the called event.
pub(crate) fn quality_from_posterior(posterior: f64) -> PHREDProb {
    PHREDProb::from(Prob((1.0 - posterior).max(1e-300)))
}

/// The allele each haplotype of a genotype carries at a site.
pub(crate) fn genotype_at_site(
    genotype: &Genotype<Haplotype>,
    site: &GenomicRegion,
) -> Option<Genotype<Allele>> {
    let alleles: Option<Vec<Allele>> = genotype
        .iter()
        .map(|haplotype| {
            haplotype
                .sequence_at(site)
                .map(|sequence| Allele::new(site.clone(), sequence))
        })
        .collect();
    alleles.map(Genotype::new)
}

/// Aggregate haplotype-genotype posteriors into posteriors of allele
/// genotypes at one site.
pub(crate) fn site_genotype_posteriors(
    site: &GenomicRegion,
    genotypes: &[Genotype<Haplotype>],
    posteriors: &[f64],
) -> BTreeMap<Genotype<Allele>, f64> {
    let mut result = BTreeMap::new();
    for (genotype, &posterior) in genotypes.iter().zip(posteriors.iter()) {
        if let Some(allele_genotype) = genotype_at_site(genotype, site) {
            *result.entry(allele_genotype).or_insert(0.0) += posterior;
        }
    }
    result
}

/// MAP allele genotype at a site with its posterior; ties break towards the
/// lexicographically smaller genotype.
pub(crate) fn map_site_genotype(
    site: &GenomicRegion,
    genotypes: &[Genotype<Haplotype>],
    posteriors: &[f64],
) -> Option<(Genotype<Allele>, f64)> {
    let site_posteriors = site_genotype_posteriors(site, genotypes, posteriors);
    site_posteriors
        .into_iter()
        .max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .expect("bug: NaN site posterior")
                .then_with(|| b.0.cmp(&a.0))
        })
}

/// Posterior probability that the sample carries the given allele: the mass
/// of genotypes with at least one haplotype including it.
pub(crate) fn allele_posterior(
    allele: &Allele,
    genotypes: &[Genotype<Haplotype>],
    posteriors: &[f64],
) -> f64 {
    genotypes
        .iter()
        .zip(posteriors.iter())
        .filter(|(genotype, _)| genotype.iter().any(|h| h.includes(allele)))
        .map(|(_, &p)| p)
        .sum()
}

/// Posterior probability that the sample is homozygous for the given
/// (reference) allele.
pub(crate) fn homozygous_posterior(
    allele: &Allele,
    genotypes: &[Genotype<Haplotype>],
    posteriors: &[f64],
) -> f64 {
    genotypes
        .iter()
        .zip(posteriors.iter())
        .filter(|(genotype, _)| genotype.iter().all(|h| h.includes(allele)))
        .map(|(_, &p)| p)
        .sum()
}

/// Enumerate genotypes over the haplotype pool with their coalescent log
/// priors, keeping at most `max_genotypes` of them (ranked by prior, with
/// the homozygous reference genotype always retained).
pub(crate) fn propose_genotypes(
    haplotypes: &[Haplotype],
    ploidy: u32,
    max_genotypes: usize,
    prior_model: &crate::model::priors::CoalescentModel,
) -> (Vec<Genotype<Haplotype>>, Vec<bio::stats::LogProb>) {
    use crate::types::genotype::generate_all_genotypes;

    let mut genotypes = generate_all_genotypes(haplotypes, ploidy);
    let mut priors: Vec<bio::stats::LogProb> =
        genotypes.iter().map(|g| prior_model.evaluate(g)).collect();
    if genotypes.len() > max_genotypes {
        warn!(
            "pruning genotype space from {} to {}",
            genotypes.len(),
            max_genotypes
        );
        let hom_ref = Genotype::new(vec![prior_model.reference().clone(); ploidy as usize]);
        let mut ranked: Vec<usize> = (0..genotypes.len()).collect();
        ranked.sort_by_key(|&i| {
            std::cmp::Reverse(
                ordered_float::NotNan::new(*priors[i]).expect("bug: NaN genotype prior"),
            )
        });
        ranked.truncate(max_genotypes);
        if let Some(hom_ref_idx) = genotypes.iter().position(|g| *g == hom_ref) {
            if !ranked.contains(&hom_ref_idx) {
                ranked.pop();
                ranked.push(hom_ref_idx);
            }
        }
        ranked.sort_unstable();
        genotypes = ranked.iter().map(|&i| genotypes[i].clone()).collect();
        priors = ranked.iter().map(|&i| priors[i]).collect();
    }
    (genotypes, priors)
}

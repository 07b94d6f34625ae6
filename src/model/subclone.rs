// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Variational inference over subclonal mixtures: each sample mixes the
//! haplotypes of a cancer genotype with Dirichlet-distributed fractions.

use std::collections::{BTreeMap, HashMap};

use bio::stats::LogProb;
use itertools::Itertools;
use ordered_float::NotNan;
use statrs::function::gamma::{digamma, ln_gamma};

use derive_new::new;

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::{CancerGenotypeIndex, ConstantMixtureModel, VariableMixtureModel};
use crate::utils::{
    add_all_and_normalise, add_and_normalise, dirichlet_expectation, normalise_log_probs,
    LogProbVector,
};
use crate::SampleName;

#[derive(Clone, Debug)]
pub struct SubclonePriors {
    pub genotype_log_priors: LogProbVector,
    /// Per-sample Dirichlet concentrations over the genotype haplotype
    /// slots (germline slots first, then somatic).
    pub alphas: BTreeMap<SampleName, Vec<f64>>,
}

#[derive(Clone, Copy, Debug)]
pub struct SubcloneModelParams {
    pub max_seeds: usize,
    pub max_iterations: usize,
    /// Stop once the evidence lower bound changes less than this.
    pub tolerance: f64,
}

impl Default for SubcloneModelParams {
    fn default() -> Self {
        SubcloneModelParams {
            max_seeds: 12,
            max_iterations: 100,
            tolerance: 1e-3,
        }
    }
}

/// Terminal state of a variational run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Convergence {
    Converged { iterations: usize },
    MaxIterationsReached,
}

pub struct SubcloneInferences {
    pub genotype_log_posteriors: LogProbVector,
    pub posterior_alphas: BTreeMap<SampleName, Vec<f64>>,
    pub approx_log_evidence: f64,
    pub convergence: Convergence,
}

#[derive(new)]
pub struct SubcloneModel {
    params: SubcloneModelParams,
}

impl SubcloneModel {
    /// Run variational Bayes from every seed and keep the restart with the
    /// best evidence lower bound.
    pub fn evaluate(
        &self,
        genotypes: &[CancerGenotypeIndex],
        priors: &SubclonePriors,
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<SubcloneInferences, Error> {
        assert!(!genotypes.is_empty());
        assert_eq!(genotypes.len(), priors.genotype_log_priors.len());
        let num_slots = genotypes[0].num_slots();
        assert!(
            genotypes.iter().all(|g| g.num_slots() == num_slots),
            "all cancer genotypes must share the slot layout"
        );

        let data = VariationalData::collect(genotypes, priors, likelihoods)?;
        let seeds = generate_seeds(
            genotypes,
            &priors.genotype_log_priors,
            likelihoods,
            &priors.alphas,
            self.params.max_seeds,
            Vec::new(),
        )?;

        let mut best: Option<SubcloneInferences> = None;
        for seed in seeds {
            let inferences = self.run_variational_bayes(seed, &data);
            if best
                .as_ref()
                .map_or(true, |b| inferences.approx_log_evidence > b.approx_log_evidence)
            {
                best = Some(inferences);
            }
        }
        Ok(best.expect("bug: seed generation yielded no seeds"))
    }

    fn run_variational_bayes(
        &self,
        seed: LogProbVector,
        data: &VariationalData,
    ) -> SubcloneInferences {
        let num_genotypes = data.num_genotypes();
        let num_slots = data.num_slots;
        let mut q = seed;
        let mut alphas: Vec<Vec<f64>> = data.prior_alphas.clone();
        let mut elbo = f64::NEG_INFINITY;
        let mut convergence = Convergence::MaxIterationsReached;

        for iteration in 0..self.params.max_iterations {
            // (a) Update the Dirichlet posteriors from the current genotype
            // responsibilities.
            for (s, sample_data) in data.samples.iter().enumerate() {
                let e_ln_pi = expected_ln_mixtures(&alphas[s]);
                let mut counts = vec![0.0f64; num_slots];
                for (g, slots) in sample_data.slot_likelihoods.iter().enumerate() {
                    let weight = q[g].exp();
                    if weight == 0.0 {
                        continue;
                    }
                    for read in 0..sample_data.num_reads {
                        // Read-to-slot responsibilities within genotype g.
                        let mut r: Vec<LogProb> = (0..num_slots)
                            .map(|k| LogProb(e_ln_pi[k] + *slots[k][read]))
                            .collect();
                        normalise_log_probs(&mut r);
                        for k in 0..num_slots {
                            counts[k] += weight * r[k].exp();
                        }
                    }
                }
                for k in 0..num_slots {
                    alphas[s][k] = data.prior_alphas[s][k] + counts[k];
                }
            }

            // (b) Update genotype posteriors under the expected log mixture
            // weights.
            let mut data_terms = vec![0.0f64; num_genotypes];
            for (s, sample_data) in data.samples.iter().enumerate() {
                let e_ln_pi = expected_ln_mixtures(&alphas[s]);
                for (g, slots) in sample_data.slot_likelihoods.iter().enumerate() {
                    for read in 0..sample_data.num_reads {
                        let read_term = LogProb::ln_sum_exp(
                            &(0..num_slots)
                                .map(|k| LogProb(e_ln_pi[k] + *slots[k][read]))
                                .collect::<Vec<_>>(),
                        );
                        data_terms[g] += *read_term;
                    }
                }
            }
            for g in 0..num_genotypes {
                q[g] = LogProb(*data.genotype_log_priors[g] + data_terms[g]);
            }
            normalise_log_probs(&mut q);

            // (c) Evidence lower bound.
            let mut bound: f64 = q
                .iter()
                .enumerate()
                .map(|(g, p)| {
                    let w = p.exp();
                    if w == 0.0 {
                        0.0
                    } else {
                        w * (*data.genotype_log_priors[g] + data_terms[g] - **p)
                    }
                })
                .sum();
            for (s, posterior) in alphas.iter().enumerate() {
                bound -= dirichlet_kl(posterior, &data.prior_alphas[s]);
            }

            if (bound - elbo).abs() < self.params.tolerance {
                elbo = bound;
                convergence = Convergence::Converged {
                    iterations: iteration + 1,
                };
                break;
            }
            elbo = bound;
        }

        SubcloneInferences {
            genotype_log_posteriors: q,
            posterior_alphas: data
                .sample_names
                .iter()
                .cloned()
                .zip(alphas.into_iter())
                .collect(),
            approx_log_evidence: elbo,
            convergence,
        }
    }
}

/// Per-sample likelihood rows arranged by genotype slot.
struct VariationalData {
    sample_names: Vec<SampleName>,
    samples: Vec<SampleData>,
    prior_alphas: Vec<Vec<f64>>,
    genotype_log_priors: LogProbVector,
    num_slots: usize,
}

struct SampleData {
    /// slot_likelihoods[genotype][slot][read]
    slot_likelihoods: Vec<Vec<Vec<LogProb>>>,
    num_reads: usize,
}

impl VariationalData {
    fn collect(
        genotypes: &[CancerGenotypeIndex],
        priors: &SubclonePriors,
        likelihoods: &HaplotypeLikelihoodArray,
    ) -> Result<Self, Error> {
        let num_slots = genotypes[0].num_slots();
        let sample_names: Vec<SampleName> = likelihoods.samples().to_vec();
        let mut samples = Vec::with_capacity(sample_names.len());
        let mut prior_alphas = Vec::with_capacity(sample_names.len());
        for sample in &sample_names {
            likelihoods.prime(sample)?;
            let num_reads = likelihoods.read_count(sample);
            let slot_likelihoods = genotypes
                .iter()
                .map(|genotype| {
                    genotype
                        .slots()
                        .map(|h| likelihoods.read_likelihoods(h).to_vec())
                        .collect_vec()
                })
                .collect_vec();
            samples.push(SampleData {
                slot_likelihoods,
                num_reads,
            });
            let alpha = priors
                .alphas
                .get(sample)
                .cloned()
                .unwrap_or_else(|| vec![1.0; num_slots]);
            assert_eq!(alpha.len(), num_slots);
            prior_alphas.push(alpha);
        }
        likelihoods.unprime();
        Ok(VariationalData {
            sample_names,
            samples,
            prior_alphas,
            genotype_log_priors: priors.genotype_log_priors.clone(),
            num_slots,
        })
    }

    fn num_genotypes(&self) -> usize {
        self.genotype_log_priors.len()
    }
}

fn expected_ln_mixtures(alphas: &[f64]) -> Vec<f64> {
    let total: f64 = alphas.iter().sum();
    let digamma_total = digamma(total);
    alphas.iter().map(|&a| digamma(a) - digamma_total).collect()
}

fn dirichlet_kl(posterior: &[f64], prior: &[f64]) -> f64 {
    let post_total: f64 = posterior.iter().sum();
    let prior_total: f64 = prior.iter().sum();
    let digamma_total = digamma(post_total);
    let mut result = ln_gamma(post_total) - ln_gamma(prior_total);
    for (&a, &a0) in posterior.iter().zip(prior.iter()) {
        result += ln_gamma(a0) - ln_gamma(a);
        result += (a - a0) * (digamma(a) - digamma_total);
    }
    result
}

/* ========================= seed generation ========================= */

const POINT_SEED_MASS: f64 = 0.9999;
const RANGE_SEED_MASS: f64 = 0.9999999;

/// A seed biasing the posterior towards genotype `idx`.
pub(crate) fn make_point_seed(num_genotypes: usize, idx: usize, p: f64) -> LogProbVector {
    let rest = if num_genotypes > 1 {
        ((1.0 - p) / (num_genotypes - 1) as f64).ln()
    } else {
        0.0
    };
    let mut result = vec![LogProb(rest); num_genotypes];
    if num_genotypes > 1 {
        result[idx] = LogProb(p.ln());
    }
    result
}

/// A seed spreading its mass uniformly over a contiguous genotype range,
/// used for blocks sharing a common germline genotype.
pub(crate) fn make_range_seed(
    num_genotypes: usize,
    begin: usize,
    len: usize,
    p: f64,
) -> LogProbVector {
    assert!(len >= 1 && begin + len <= num_genotypes);
    if num_genotypes == len {
        return vec![LogProb(-(len as f64).ln()); num_genotypes];
    }
    let mut result = vec![LogProb(((1.0 - p) / (num_genotypes - len) as f64).ln()); num_genotypes];
    for slot in result.iter_mut().skip(begin).take(len) {
        *slot = LogProb((p / len as f64).ln());
    }
    result
}

/// A range seed over the block of genotypes sharing the given germline;
/// genotype lists are grouped by germline, so the block is contiguous.
pub(crate) fn make_germline_range_seed(
    genotypes: &[CancerGenotypeIndex],
    germline: &[usize],
) -> Option<LogProbVector> {
    let begin = genotypes.iter().position(|g| g.germline == germline)?;
    let len = genotypes[begin..]
        .iter()
        .take_while(|g| g.germline == germline)
        .count();
    Some(make_range_seed(
        genotypes.len(),
        begin,
        len,
        RANGE_SEED_MASS,
    ))
}

fn generate_exhaustive_seeds(n: usize) -> Vec<LogProbVector> {
    (0..n).map(|i| make_point_seed(n, i, POINT_SEED_MASS)).collect()
}

fn likelihoods_with_fixed_mixtures(
    genotypes: &[CancerGenotypeIndex],
    likelihoods: &HaplotypeLikelihoodArray,
    alphas: &BTreeMap<SampleName, Vec<f64>>,
    num_slots: usize,
) -> Result<Vec<LogProbVector>, Error> {
    let mut result = Vec::new();
    for sample in likelihoods.samples() {
        likelihoods.prime(sample)?;
        let mixtures = alphas
            .get(sample)
            .map(|a| dirichlet_expectation(a))
            .unwrap_or_else(|| vec![1.0 / num_slots as f64; num_slots]);
        let model = VariableMixtureModel::new(likelihoods, &mixtures);
        result.push(
            genotypes
                .iter()
                .map(|g| model.evaluate(&g.slots().collect_vec()))
                .collect(),
        );
    }
    Ok(result)
}

fn likelihoods_with_germline_model(
    genotypes: &[CancerGenotypeIndex],
    likelihoods: &HaplotypeLikelihoodArray,
) -> Result<Vec<LogProbVector>, Error> {
    let mut result = Vec::new();
    for sample in likelihoods.samples() {
        likelihoods.prime(sample)?;
        let model = ConstantMixtureModel::new(likelihoods);
        result.push(
            genotypes
                .iter()
                .map(|g| model.evaluate(&g.slots().collect_vec()))
                .collect(),
        );
    }
    Ok(result)
}

fn germline_only_likelihoods(
    genotypes: &[CancerGenotypeIndex],
    likelihoods: &HaplotypeLikelihoodArray,
) -> Result<Vec<LogProbVector>, Error> {
    let mut result = Vec::new();
    for sample in likelihoods.samples() {
        likelihoods.prime(sample)?;
        let model = ConstantMixtureModel::new(likelihoods);
        let mut cache: HashMap<&[usize], LogProb> = HashMap::new();
        result.push(
            genotypes
                .iter()
                .map(|g| {
                    *cache
                        .entry(g.germline.as_slice())
                        .or_insert_with(|| model.evaluate(&g.germline))
                })
                .collect(),
        );
    }
    Ok(result)
}

/// The seed schedule. With few genotypes the exhaustive point seed set is
/// used; otherwise seeds are produced in a fixed priority order until
/// `max_seeds` is reached, finishing with point seeds for the top-ranked
/// genotypes.
pub(crate) fn generate_seeds(
    genotypes: &[CancerGenotypeIndex],
    genotype_log_priors: &[LogProb],
    likelihoods: &HaplotypeLikelihoodArray,
    alphas: &BTreeMap<SampleName, Vec<f64>>,
    max_seeds: usize,
    hints: Vec<LogProbVector>,
) -> Result<Vec<LogProbVector>, Error> {
    // At least one restart is always required.
    let mut max_seeds = max_seeds.max(1);
    let num_genotypes = genotypes.len();
    if num_genotypes <= max_seeds {
        return Ok(generate_exhaustive_seeds(num_genotypes));
    }
    let mut result = hints;
    if result.len() >= max_seeds {
        return Ok(result);
    }
    max_seeds -= result.len();
    let num_slots = genotypes[0].num_slots();

    let sample_prior_mixture_likelihoods =
        likelihoods_with_fixed_mixtures(genotypes, likelihoods, alphas, num_slots)?;
    let prior_mixture_likelihoods = add_all_and_normalise(&sample_prior_mixture_likelihoods);
    let prior_mixture_posteriors =
        add_and_normalise(genotype_log_priors, &prior_mixture_likelihoods);
    result.push(prior_mixture_posteriors.clone()); // 1
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    let sample_normal_likelihoods = likelihoods_with_germline_model(genotypes, likelihoods)?;
    let normal_likelihoods = add_all_and_normalise(&sample_normal_likelihoods);
    let normal_posteriors = add_and_normalise(genotype_log_priors, &normal_likelihoods);
    result.push(normal_posteriors); // 2
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    result.push(prior_mixture_likelihoods.clone()); // 3
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }
    result.push(normal_likelihoods.clone()); // 4
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    let combined_likelihoods = add_and_normalise(&prior_mixture_likelihoods, &normal_likelihoods);
    let combined_posteriors = add_and_normalise(genotype_log_priors, &combined_likelihoods);
    result.push(combined_posteriors); // 5
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }
    result.push(combined_likelihoods); // 6
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    let sample_germline_likelihoods = germline_only_likelihoods(genotypes, likelihoods)?;
    let germline_posteriors = add_and_normalise(
        genotype_log_priors,
        &add_all_and_normalise(&sample_germline_likelihoods),
    );
    result.push(germline_posteriors); // 7
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    let mut prior_seed = genotype_log_priors.to_vec();
    normalise_log_probs(&mut prior_seed);
    result.push(prior_seed); // 8
    max_seeds -= 1;
    if max_seeds == 0 {
        return Ok(result);
    }

    // Point seeds for the genotypes ranked best under the prior mixture
    // posterior.
    let mut ranked: Vec<usize> = (0..num_genotypes).collect();
    ranked.sort_by_key(|&i| {
        std::cmp::Reverse(
            NotNan::new(*prior_mixture_posteriors[i]).expect("bug: NaN in seed ranking"),
        )
    });
    for idx in ranked.into_iter().take(max_seeds) {
        result.push(make_point_seed(num_genotypes, idx, POINT_SEED_MASS));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::cancer_genotype_indices;
    use crate::model::tests::{fixture, likelihood_array};
    use crate::reads::ReadMap;
    use crate::types::genotype::{generate_all_cancer_genotypes, generate_all_genotypes};
    use crate::utils::log_uniform;
    use approx::assert_relative_eq;

    #[test]
    fn test_point_seed_mass() {
        let seed = make_point_seed(4, 2, POINT_SEED_MASS);
        assert_relative_eq!(seed[2].exp(), 0.9999);
        assert_relative_eq!(seed[0].exp(), 0.0001 / 3.0);
        assert_relative_eq!(
            LogProb::ln_sum_exp(&seed).exp(),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_range_seed_mass() {
        let seed = make_range_seed(6, 2, 3, RANGE_SEED_MASS);
        assert_relative_eq!(seed[2].exp(), RANGE_SEED_MASS / 3.0);
        assert_relative_eq!(seed[3].exp(), RANGE_SEED_MASS / 3.0);
        assert_relative_eq!(seed[0].exp(), (1.0 - RANGE_SEED_MASS) / 3.0);
        assert_relative_eq!(LogProb::ln_sum_exp(&seed).exp(), 1.0, epsilon = 1e-9);
    }

    fn cancer_setup(
        num_normal_alt: usize,
        num_tumor_alt: usize,
    ) -> (
        Vec<CancerGenotypeIndex>,
        SubclonePriors,
        HaplotypeLikelihoodArray,
    ) {
        let (reference, mut haplotypes, mut reads) = fixture("normal", 30, num_normal_alt);
        let (_, _, tumor_reads) = fixture("tumor", 80, num_tumor_alt);
        reads.extend(tumor_reads.into_iter().collect::<ReadMap>());
        // A third, unsupported alt haplotype widens the genotype space.
        {
            use crate::model::tests::CONTIG;
            use crate::types::{Allele, GenomicRegion, Haplotype};
            let region = GenomicRegion::new("1", 10, 30);
            let other = Allele::new(GenomicRegion::new("1", 20, 21), b"C".to_vec());
            haplotypes.push(Haplotype::new(region, vec![other], &CONTIG[10..30]).unwrap());
        }
        let array = likelihood_array(&reference, &haplotypes, &reads);
        let germline = generate_all_genotypes(&haplotypes, 2);
        let cancer = generate_all_cancer_genotypes(&germline, &haplotypes);
        let genotypes = cancer_genotype_indices(&cancer, &haplotypes);
        let num_slots = genotypes[0].num_slots();
        // Germline slots dominate; the somatic slot gets a small
        // concentration.
        let mut alphas = BTreeMap::new();
        for sample in ["normal", "tumor"] {
            let mut alpha = vec![10.0; num_slots];
            alpha[num_slots - 1] = 1.0;
            alphas.insert(sample.to_owned(), alpha);
        }
        let priors = SubclonePriors {
            genotype_log_priors: log_uniform(genotypes.len()),
            alphas,
        };
        (genotypes, priors, array)
    }

    /// With fewer genotypes than seeds, seeds are exactly the exhaustive
    /// point seed set in index order.
    #[test]
    fn test_exhaustive_seed_property() {
        let (genotypes, priors, array) = cancer_setup(0, 20);
        let seeds = generate_seeds(
            &genotypes,
            &priors.genotype_log_priors,
            &array,
            &priors.alphas,
            genotypes.len(),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(seeds.len(), genotypes.len());
        for (i, seed) in seeds.iter().enumerate() {
            assert_relative_eq!(seed[i].exp(), POINT_SEED_MASS);
        }
    }

    /// The first two schedule seeds are the prior-mixture posterior and the
    /// normal-model posterior, in that order.
    #[test]
    fn test_seed_schedule_order() {
        let (genotypes, priors, array) = cancer_setup(0, 20);
        let num_slots = genotypes[0].num_slots();
        let seeds = generate_seeds(
            &genotypes,
            &priors.genotype_log_priors,
            &array,
            &priors.alphas,
            2,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(seeds.len(), 2);

        let expected_first = add_and_normalise(
            &priors.genotype_log_priors,
            &add_all_and_normalise(
                &likelihoods_with_fixed_mixtures(&genotypes, &array, &priors.alphas, num_slots)
                    .unwrap(),
            ),
        );
        let expected_second = add_and_normalise(
            &priors.genotype_log_priors,
            &add_all_and_normalise(&likelihoods_with_germline_model(&genotypes, &array).unwrap()),
        );
        for (got, expected) in seeds[0].iter().zip(expected_first.iter()) {
            assert_relative_eq!(**got, **expected, epsilon = 1e-12);
        }
        for (got, expected) in seeds[1].iter().zip(expected_second.iter()) {
            assert_relative_eq!(**got, **expected, epsilon = 1e-12);
        }
        // The two seeds differ: the schedule is not degenerate.
        assert!(seeds[0]
            .iter()
            .zip(seeds[1].iter())
            .any(|(a, b)| (**a - **b).abs() > 1e-12));
    }

    /// Somatic variant at 20% VAF in the tumor only: the model concentrates
    /// on a genotype whose somatic haplotype is the alt.
    #[test]
    fn test_somatic_inference() {
        let (genotypes, priors, array) = cancer_setup(0, 20);
        let model = SubcloneModel::new(SubcloneModelParams::default());
        let inferences = model.evaluate(&genotypes, &priors, &array).unwrap();

        let total: f64 = inferences
            .genotype_log_posteriors
            .iter()
            .map(|p| p.exp())
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);

        // The somatic-alt genotype with hom-ref germline dominates.
        let best = inferences
            .genotype_log_posteriors
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(genotypes[best].germline, vec![0, 0]);
        assert_eq!(genotypes[best].somatic, vec![1]);
        assert!(inferences.genotype_log_posteriors[best].exp() > 0.8);

        // The tumor's somatic mixture fraction clearly exceeds the
        // normal's.
        let tumor_alphas = &inferences.posterior_alphas["tumor"];
        let normal_alphas = &inferences.posterior_alphas["normal"];
        let tumor_somatic =
            tumor_alphas[2] / tumor_alphas.iter().sum::<f64>();
        let normal_somatic =
            normal_alphas[2] / normal_alphas.iter().sum::<f64>();
        assert!(tumor_somatic > 2.0 * normal_somatic);
        assert!(tumor_somatic > 0.1);
    }

    #[test]
    fn test_germline_range_seed() {
        let (genotypes, _, _) = cancer_setup(0, 5);
        let germline = genotypes[0].germline.clone();
        let seed = make_germline_range_seed(&genotypes, &germline).unwrap();
        assert_relative_eq!(LogProb::ln_sum_exp(&seed).exp(), 1.0, epsilon = 1e-9);
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Single-cell inference: a small clone phylogeny where every cell is
//! assigned to a clone and allele dropout is modeled with a Beta prior.

use std::collections::BTreeMap;

use bio::stats::LogProb;
use derive_new::new;
use itertools::Itertools;
use ordered_float::NotNan;
use statrs::function::gamma::{digamma, ln_gamma};

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::subclone::Convergence;
use crate::model::{ConstantMixtureModel, GenotypeIndex};
use crate::utils::{normalise_log_probs, LogProbVector};
use crate::SampleName;

#[derive(Clone, Debug)]
pub struct CellModelParams {
    pub max_clones: u32,
    /// Concentration of the Beta prior on allele dropout; the prior mean
    /// dropout rate is fixed at 10%.
    pub dropout_concentration: f64,
    /// Bound on the number of clone configurations optimized to
    /// convergence.
    pub max_vb_seeds: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for CellModelParams {
    fn default() -> Self {
        CellModelParams {
            max_clones: 3,
            dropout_concentration: 0.2,
            max_vb_seeds: 12,
            max_iterations: 50,
            tolerance: 1e-3,
        }
    }
}

/// A rooted clone tree; node 0 is the founder clone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phylogeny {
    pub parents: Vec<Option<usize>>,
}

impl Phylogeny {
    pub fn size(&self) -> usize {
        self.parents.len()
    }

    /// All rooted trees with up to `max_clones` nodes, encoded as parent
    /// vectors with `parent[i] < i`.
    pub fn enumerate(max_clones: u32) -> Vec<Phylogeny> {
        let mut result = Vec::new();
        for m in 1..=max_clones as usize {
            let mut stack = vec![vec![None::<usize>]];
            while let Some(parents) = stack.pop() {
                if parents.len() == m {
                    result.push(Phylogeny { parents });
                    continue;
                }
                for parent in 0..parents.len() {
                    let mut next = parents.clone();
                    next.push(Some(parent));
                    stack.push(next);
                }
            }
        }
        result
    }
}

/// One explored (topology, clone genotype assignment) pair.
#[derive(Clone, Debug)]
pub struct CloneConfiguration {
    pub phylogeny: Phylogeny,
    /// Genotype index per clone; distinct across clones and differing
    /// between parent and child.
    pub clone_genotypes: Vec<usize>,
}

pub struct CellInferences {
    pub configurations: Vec<CloneConfiguration>,
    pub configuration_log_posteriors: LogProbVector,
    /// Cell-to-clone responsibilities of the MAP configuration.
    pub map_cell_responsibilities: BTreeMap<SampleName, Vec<f64>>,
    /// Beta posterior (a, b) of the dropout rate under the MAP
    /// configuration.
    pub dropout_posterior: (f64, f64),
    /// Per-sample genotype posteriors marginalized over configurations.
    pub sample_genotype_log_posteriors: BTreeMap<SampleName, LogProbVector>,
    pub approx_log_evidence: f64,
    pub convergence: Convergence,
}

#[derive(new)]
pub struct CellModel {
    params: CellModelParams,
}

impl CellModel {
    /// Infer the clone structure over the cells (one sample = one cell).
    /// `normal_samples` are pinned to the founder clone.
    pub fn evaluate(
        &self,
        genotypes: &[GenotypeIndex],
        genotype_log_priors: &[LogProb],
        likelihoods: &HaplotypeLikelihoodArray,
        normal_samples: &[SampleName],
    ) -> Result<CellInferences, Error> {
        let cells: Vec<SampleName> = likelihoods.samples().to_vec();
        let num_genotypes = genotypes.len();

        // Cell-genotype likelihoods with and without one dropped allele.
        let mut full = vec![vec![LogProb::ln_one(); num_genotypes]; cells.len()];
        let mut dropped = vec![vec![LogProb::ln_one(); num_genotypes]; cells.len()];
        for (s, cell) in cells.iter().enumerate() {
            likelihoods.prime(cell)?;
            let model = ConstantMixtureModel::new(likelihoods);
            for (g, genotype) in genotypes.iter().enumerate() {
                full[s][g] = model.evaluate(genotype);
                let singletons: Vec<LogProb> = genotype
                    .iter()
                    .map(|&h| model.evaluate(&[h]))
                    .collect();
                dropped[s][g] = LogProb(
                    *LogProb::ln_sum_exp(&singletons) - (singletons.len() as f64).ln(),
                );
            }
        }
        likelihoods.unprime();

        // Candidate clone genotypes: the best-supported ones across cells.
        let mut pooled: Vec<(usize, f64)> = (0..num_genotypes)
            .map(|g| {
                let score: f64 = (0..cells.len()).map(|s| *full[s][g]).sum::<f64>()
                    + *genotype_log_priors[g];
                (g, score)
            })
            .collect();
        pooled.sort_by_key(|&(_, score)| {
            std::cmp::Reverse(NotNan::new(score).expect("bug: NaN genotype score"))
        });
        let candidates: Vec<usize> = pooled
            .iter()
            .take((self.params.max_clones as usize + 4).min(num_genotypes))
            .map(|&(g, _)| g)
            .collect();

        let configurations = self.enumerate_configurations(&candidates);
        assert!(!configurations.is_empty());

        let pinned: Vec<bool> = cells.iter().map(|c| normal_samples.contains(c)).collect();
        let prior_beta = (self.params.dropout_concentration, 9.0 * self.params.dropout_concentration);

        // Score all configurations cheaply, then optimize the most promising
        // ones to convergence.
        let mut runs: Vec<VariationalRun> = configurations
            .iter()
            .map(|config| {
                self.run_config(config, genotype_log_priors, &full, &dropped, &pinned, prior_beta, 1)
            })
            .collect();
        let mut ranked: Vec<usize> = (0..runs.len()).collect();
        ranked.sort_by(|&a, &b| {
            runs[b]
                .bound
                .partial_cmp(&runs[a].bound)
                .expect("bug: NaN variational bound")
        });
        for &i in ranked.iter().take(self.params.max_vb_seeds) {
            runs[i] = self.run_config(
                &configurations[i],
                genotype_log_priors,
                &full,
                &dropped,
                &pinned,
                prior_beta,
                self.params.max_iterations,
            );
        }

        let mut config_log_posteriors: LogProbVector =
            runs.iter().map(|run| LogProb(run.bound)).collect();
        let approx_log_evidence = *normalise_log_probs(&mut config_log_posteriors);

        let map_index = (0..runs.len())
            .max_by(|&a, &b| {
                runs[a]
                    .bound
                    .partial_cmp(&runs[b].bound)
                    .expect("bug: NaN variational bound")
            })
            .unwrap();
        let convergence = runs[map_index].convergence;

        // Marginal per-cell genotype posteriors over configurations.
        let mut sample_genotype_log_posteriors = BTreeMap::new();
        for (s, cell) in cells.iter().enumerate() {
            let mut posterior = vec![0.0f64; num_genotypes];
            for (run, config_posterior) in runs.iter().zip(config_log_posteriors.iter()) {
                let weight = config_posterior.exp();
                for (c, &g) in run.config.clone_genotypes.iter().enumerate() {
                    posterior[g] += weight * run.responsibilities[s][c];
                }
            }
            sample_genotype_log_posteriors.insert(
                cell.clone(),
                posterior
                    .into_iter()
                    .map(|p| LogProb(p.max(f64::MIN_POSITIVE).ln()))
                    .collect(),
            );
        }

        let map_run = &runs[map_index];
        Ok(CellInferences {
            map_cell_responsibilities: cells
                .iter()
                .cloned()
                .zip(map_run.responsibilities.iter().cloned())
                .collect(),
            dropout_posterior: map_run.dropout,
            configurations: runs.iter().map(|run| run.config.clone()).collect(),
            configuration_log_posteriors: config_log_posteriors,
            sample_genotype_log_posteriors,
            approx_log_evidence,
            convergence,
        })
    }

    fn enumerate_configurations(&self, candidates: &[usize]) -> Vec<CloneConfiguration> {
        let mut result = Vec::new();
        for phylogeny in Phylogeny::enumerate(self.params.max_clones) {
            let m = phylogeny.size();
            if candidates.len() < m {
                continue;
            }
            for assignment in candidates.iter().copied().permutations(m) {
                // Mutation along every edge: children differ from their
                // parent (guaranteed by distinct permutation entries).
                result.push(CloneConfiguration {
                    phylogeny: phylogeny.clone(),
                    clone_genotypes: assignment,
                });
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_config(
        &self,
        config: &CloneConfiguration,
        genotype_log_priors: &[LogProb],
        full: &[Vec<LogProb>],
        dropped: &[Vec<LogProb>],
        pinned: &[bool],
        prior_beta: (f64, f64),
        max_iterations: usize,
    ) -> VariationalRun {
        let num_cells = full.len();
        let num_clones = config.phylogeny.size();
        let mut alphas = vec![1.0f64; num_clones];
        let mut beta = prior_beta;
        let mut responsibilities = vec![vec![1.0 / num_clones as f64; num_clones]; num_cells];
        let mut bound = f64::NEG_INFINITY;
        let mut convergence = Convergence::MaxIterationsReached;

        for iteration in 0..max_iterations {
            let dropout = beta.0 / (beta.0 + beta.1);
            let ln_dropout = LogProb(dropout.ln());
            let ln_retained = LogProb((1.0 - dropout).ln());

            // Cell-clone data terms under the current dropout estimate.
            let cell_clone: Vec<Vec<LogProb>> = (0..num_cells)
                .map(|s| {
                    config
                        .clone_genotypes
                        .iter()
                        .map(|&g| {
                            (ln_retained + full[s][g]).ln_add_exp(ln_dropout + dropped[s][g])
                        })
                        .collect()
                })
                .collect();

            let e_ln_w = expected_ln_weights(&alphas);
            let mut data_term = 0.0f64;
            for s in 0..num_cells {
                if pinned[s] {
                    responsibilities[s] = vec![0.0; num_clones];
                    responsibilities[s][0] = 1.0;
                    data_term += *cell_clone[s][0];
                    continue;
                }
                let mut r: LogProbVector = (0..num_clones)
                    .map(|c| LogProb(e_ln_w[c] + *cell_clone[s][c]))
                    .collect();
                data_term += *LogProb::ln_sum_exp(&r);
                normalise_log_probs(&mut r);
                responsibilities[s] = r.iter().map(|p| p.exp()).collect();
            }

            // Dirichlet update over clone weights.
            for c in 0..num_clones {
                alphas[c] = 1.0
                    + responsibilities
                        .iter()
                        .map(|r| r[c])
                        .sum::<f64>();
            }

            // Beta update of the dropout rate from per-cell dropout
            // responsibilities.
            let mut num_dropped = 0.0f64;
            let mut num_retained = 0.0f64;
            for s in 0..num_cells {
                for (c, &g) in config.clone_genotypes.iter().enumerate() {
                    let weight = responsibilities[s][c];
                    if weight == 0.0 {
                        continue;
                    }
                    let drop = ln_dropout + dropped[s][g];
                    let keep = ln_retained + full[s][g];
                    let tau = (drop.exp()) / (drop.ln_add_exp(keep).exp()).max(f64::MIN_POSITIVE);
                    num_dropped += weight * tau;
                    num_retained += weight * (1.0 - tau);
                }
            }
            beta = (prior_beta.0 + num_dropped, prior_beta.1 + num_retained);

            let prior_term: f64 = config
                .clone_genotypes
                .iter()
                .map(|&g| *genotype_log_priors[g])
                .sum();
            let new_bound = prior_term + data_term - dirichlet_kl_uniform(&alphas);

            if (new_bound - bound).abs() < self.params.tolerance {
                bound = new_bound;
                convergence = Convergence::Converged {
                    iterations: iteration + 1,
                };
                break;
            }
            bound = new_bound;
        }

        VariationalRun {
            config: config.clone(),
            responsibilities,
            dropout: beta,
            bound,
            convergence,
        }
    }
}

struct VariationalRun {
    config: CloneConfiguration,
    responsibilities: Vec<Vec<f64>>,
    dropout: (f64, f64),
    bound: f64,
    convergence: Convergence,
}

fn expected_ln_weights(alphas: &[f64]) -> Vec<f64> {
    let total: f64 = alphas.iter().sum();
    let digamma_total = digamma(total);
    alphas.iter().map(|&a| digamma(a) - digamma_total).collect()
}

fn dirichlet_kl_uniform(posterior: &[f64]) -> f64 {
    let n = posterior.len();
    let post_total: f64 = posterior.iter().sum();
    let digamma_total = digamma(post_total);
    let mut result = ln_gamma(post_total) - ln_gamma(n as f64);
    for &a in posterior {
        result += ln_gamma(1.0) - ln_gamma(a);
        result += (a - 1.0) * (digamma(a) - digamma_total);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::{fixture, likelihood_array};
    use crate::reads::ReadMap;
    use crate::utils::log_uniform;
    use approx::assert_relative_eq;

    #[test]
    fn test_phylogeny_enumeration() {
        let trees = Phylogeny::enumerate(3);
        // 1 tree of size 1, 1 of size 2, 2 of size 3.
        assert_eq!(trees.len(), 4);
        assert!(trees.iter().all(|t| t.parents[0].is_none()));
    }

    /// Two clones: mutated cells carry the alt haplotype, the normal cell is
    /// pinned to the founder.
    #[test]
    fn test_two_clone_inference() {
        let (reference, haplotypes, mut reads) = fixture("cell0", 20, 0);
        let (_, _, c1) = fixture("cell1", 10, 10);
        let (_, _, c2) = fixture("cell2", 10, 10);
        reads.extend(c1.into_iter().collect::<ReadMap>());
        reads.extend(c2.into_iter().collect::<ReadMap>());
        let array = likelihood_array(&reference, &haplotypes, &reads);
        let genotypes: Vec<GenotypeIndex> = vec![vec![0, 0], vec![0, 1], vec![1, 1]];
        let model = CellModel::new(CellModelParams {
            max_clones: 2,
            ..Default::default()
        });
        let inferences = model
            .evaluate(
                &genotypes,
                &log_uniform(3),
                &array,
                &["cell0".to_owned()],
            )
            .unwrap();

        let total: f64 = inferences
            .configuration_log_posteriors
            .iter()
            .map(|p| p.exp())
            .sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-9);

        // The mutated cells are dominated by the het genotype, the normal
        // cell by hom-ref.
        let normal = &inferences.sample_genotype_log_posteriors["cell0"];
        let tumor = &inferences.sample_genotype_log_posteriors["cell1"];
        assert!(normal[0] > normal[1]);
        assert!(tumor[1] > tumor[0]);
    }

    #[test]
    fn test_dropout_posterior_is_proper() {
        let (reference, haplotypes, reads) = fixture("cell0", 10, 10);
        let array = likelihood_array(&reference, &haplotypes, &reads);
        let genotypes: Vec<GenotypeIndex> = vec![vec![0, 0], vec![0, 1], vec![1, 1]];
        let model = CellModel::new(CellModelParams {
            max_clones: 1,
            ..Default::default()
        });
        let inferences = model
            .evaluate(&genotypes, &log_uniform(3), &array, &[])
            .unwrap();
        let (a, b) = inferences.dropout_posterior;
        assert!(a > 0.0 && b > 0.0);
        // Balanced het support provides no dropout evidence; the posterior
        // mean stays near the prior mean.
        assert!(a / (a + b) < 0.5);
    }
}

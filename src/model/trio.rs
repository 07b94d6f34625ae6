// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::LogProb;
use serde::{Deserialize, Serialize};

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodArray;
use crate::model::denovo::DeNovoModel;
use crate::model::{ConstantMixtureModel, GenotypeIndex};
use crate::utils::{normalise_log_probs, LogProbVector};
use crate::SampleName;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trio {
    pub mother: SampleName,
    pub father: SampleName,
    pub child: SampleName,
}

/// One cell of the pruned joint genotype space, as indices into the genotype
/// list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JointTrioGenotype {
    pub maternal: usize,
    pub paternal: usize,
    pub child: usize,
}

pub struct TrioInferences {
    pub joint_log_posteriors: Vec<(JointTrioGenotype, LogProb)>,
    pub maternal_log_posteriors: LogProbVector,
    pub paternal_log_posteriors: LogProbVector,
    pub child_log_posteriors: LogProbVector,
    pub log_evidence: LogProb,
}

/// Joint inference over maternal, paternal and offspring genotypes:
/// `P(G_M) P(G_F) P(G_O | G_M, G_F) ∏_s P(reads_s | G_s)`. The transmission
/// term allows de novo mutation off Mendelian inheritance through the
/// [`DeNovoModel`]. Marginalization is by enumeration over a pruned joint
/// set bounded by `max_joint_genotypes`.
pub struct TrioModel<'a> {
    denovo: &'a DeNovoModel,
    max_joint_genotypes: usize,
}

impl<'a> TrioModel<'a> {
    pub fn new(denovo: &'a DeNovoModel, max_joint_genotypes: usize) -> Self {
        assert!(max_joint_genotypes >= 1);
        TrioModel {
            denovo,
            max_joint_genotypes,
        }
    }

    pub fn evaluate(
        &self,
        genotypes: &[GenotypeIndex],
        genotype_log_priors: &[LogProb],
        likelihoods: &HaplotypeLikelihoodArray,
        trio: &Trio,
    ) -> Result<TrioInferences, Error> {
        assert!(genotypes.iter().all(|g| g.len() == 2), "trio transmission assumes diploid genotypes");

        let likelihood_vector = |sample: &SampleName| -> Result<LogProbVector, Error> {
            likelihoods.prime(sample)?;
            let model = ConstantMixtureModel::new(likelihoods);
            Ok(genotypes.iter().map(|g| model.evaluate(g)).collect())
        };
        let maternal_likelihoods = likelihood_vector(&trio.mother)?;
        let paternal_likelihoods = likelihood_vector(&trio.father)?;
        let child_likelihoods = likelihood_vector(&trio.child)?;
        likelihoods.unprime();

        // Prune each member's genotype set so that the joint enumeration
        // stays within budget.
        let budget = ((self.max_joint_genotypes as f64).cbrt().floor() as usize).max(1);
        let maternal_set = top_genotypes(&maternal_likelihoods, genotype_log_priors, budget);
        let paternal_set = top_genotypes(&paternal_likelihoods, genotype_log_priors, budget);
        let child_set = top_genotypes(&child_likelihoods, genotype_log_priors, budget);

        let mut joint = Vec::with_capacity(maternal_set.len() * paternal_set.len() * child_set.len());
        let mut joint_probs = Vec::with_capacity(joint.capacity());
        for &m in &maternal_set {
            for &f in &paternal_set {
                for &c in &child_set {
                    let transmission =
                        self.prob_transmission(&genotypes[c], &genotypes[m], &genotypes[f]);
                    let prob = LogProb(
                        *genotype_log_priors[m]
                            + *genotype_log_priors[f]
                            + *transmission
                            + *maternal_likelihoods[m]
                            + *paternal_likelihoods[f]
                            + *child_likelihoods[c],
                    );
                    joint.push(JointTrioGenotype {
                        maternal: m,
                        paternal: f,
                        child: c,
                    });
                    joint_probs.push(prob);
                }
            }
        }
        let log_evidence = normalise_log_probs(&mut joint_probs);

        let mut maternal_log_posteriors = vec![LogProb::ln_zero(); genotypes.len()];
        let mut paternal_log_posteriors = vec![LogProb::ln_zero(); genotypes.len()];
        let mut child_log_posteriors = vec![LogProb::ln_zero(); genotypes.len()];
        for (cell, &prob) in joint.iter().zip(joint_probs.iter()) {
            maternal_log_posteriors[cell.maternal] =
                maternal_log_posteriors[cell.maternal].ln_add_exp(prob);
            paternal_log_posteriors[cell.paternal] =
                paternal_log_posteriors[cell.paternal].ln_add_exp(prob);
            child_log_posteriors[cell.child] = child_log_posteriors[cell.child].ln_add_exp(prob);
        }

        Ok(TrioInferences {
            joint_log_posteriors: joint.into_iter().zip(joint_probs.into_iter()).collect(),
            maternal_log_posteriors,
            paternal_log_posteriors,
            child_log_posteriors,
            log_evidence,
        })
    }

    /// `ln P(G_O | G_M, G_F)` for diploid genotypes: each parent transmits
    /// one gamete uniformly; the inherited haplotype may additionally mutate
    /// according to the de novo model.
    fn prob_transmission(
        &self,
        child: &GenotypeIndex,
        mother: &GenotypeIndex,
        father: &GenotypeIndex,
    ) -> LogProb {
        let ln_gamete = -((mother.len() * father.len()) as f64).ln();
        let mut summands = Vec::with_capacity(mother.len() * father.len() * 2);
        for &hm in mother {
            for &hf in father {
                // The child's two haplotypes are unordered; either may be the
                // maternal one.
                let a = LogProb(
                    *self.denovo.evaluate_indexed(child[0], hm)
                        + *self.denovo.evaluate_indexed(child[1], hf),
                );
                let b = LogProb(
                    *self.denovo.evaluate_indexed(child[1], hm)
                        + *self.denovo.evaluate_indexed(child[0], hf),
                );
                summands.push(LogProb(*a.ln_add_exp(b) + **PROB_HALF + ln_gamete));
            }
        }
        LogProb::ln_sum_exp(&summands)
    }
}

lazy_static! {
    static ref PROB_HALF: LogProb = LogProb(0.5f64.ln());
}

fn top_genotypes(likelihoods: &[LogProb], priors: &[LogProb], budget: usize) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..likelihoods.len()).collect();
    ranked.sort_by(|&a, &b| {
        let pa = *likelihoods[a] + *priors[a];
        let pb = *likelihoods[b] + *priors[b];
        pb.partial_cmp(&pa).expect("bug: NaN in genotype ranking")
    });
    ranked.truncate(budget);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::denovo::{CachingStrategy, DeNovoModelParams};
    use crate::model::tests::{fixture, likelihood_array};
    use crate::model::genotype_indices;
    use crate::reads::ReadMap;
    use crate::types::Genotype;
    use crate::utils::log_uniform;

    /// Parents homozygous reference, child heterozygous: the joint posterior
    /// concentrates on the de novo configuration.
    #[test]
    fn test_de_novo_snv() {
        let (reference, haplotypes, mut reads) = fixture("mother", 30, 0);
        let (_, _, father_reads) = fixture("father", 30, 0);
        let (_, _, child_reads) = fixture("child", 15, 15);
        reads.extend(father_reads.into_iter().collect::<ReadMap>());
        reads.extend(child_reads.into_iter().collect::<ReadMap>());
        let array = likelihood_array(&reference, &haplotypes, &reads);

        let genotype_list = vec![
            Genotype::new(vec![haplotypes[0].clone(), haplotypes[0].clone()]),
            Genotype::new(vec![haplotypes[0].clone(), haplotypes[1].clone()]),
            Genotype::new(vec![haplotypes[1].clone(), haplotypes[1].clone()]),
        ];
        let genotypes = genotype_indices(&genotype_list, &haplotypes);

        let mut denovo = DeNovoModel::new(
            DeNovoModelParams {
                mutation_rate: 1e-4,
            },
            CachingStrategy::Address,
        );
        denovo.prime(haplotypes.clone());
        let model = TrioModel::new(&denovo, 1000);
        let trio = Trio {
            mother: "mother".to_owned(),
            father: "father".to_owned(),
            child: "child".to_owned(),
        };
        let inferences = model
            .evaluate(&genotypes, &log_uniform(3), &array, &trio)
            .unwrap();

        assert!(inferences.maternal_log_posteriors[0].exp() > 0.9);
        assert!(inferences.paternal_log_posteriors[0].exp() > 0.9);
        assert!(inferences.child_log_posteriors[1].exp() > 0.9);

        let total: f64 = inferences
            .joint_log_posteriors
            .iter()
            .map(|(_, p)| p.exp())
            .sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-9);
    }

    /// Mendelian transmission dominates: a het parent explains a het child
    /// without invoking mutation.
    #[test]
    fn test_mendelian_inheritance() {
        let (reference, haplotypes, mut reads) = fixture("mother", 15, 15);
        let (_, _, father_reads) = fixture("father", 30, 0);
        let (_, _, child_reads) = fixture("child", 15, 15);
        reads.extend(father_reads.into_iter().collect::<ReadMap>());
        reads.extend(child_reads.into_iter().collect::<ReadMap>());
        let array = likelihood_array(&reference, &haplotypes, &reads);
        let genotype_list = vec![
            Genotype::new(vec![haplotypes[0].clone(), haplotypes[0].clone()]),
            Genotype::new(vec![haplotypes[0].clone(), haplotypes[1].clone()]),
            Genotype::new(vec![haplotypes[1].clone(), haplotypes[1].clone()]),
        ];
        let genotypes = genotype_indices(&genotype_list, &haplotypes);
        let mut denovo = DeNovoModel::new(DeNovoModelParams::default(), CachingStrategy::Address);
        denovo.prime(haplotypes.clone());
        let model = TrioModel::new(&denovo, 1000);
        let trio = Trio {
            mother: "mother".to_owned(),
            father: "father".to_owned(),
            child: "child".to_owned(),
        };
        let inferences = model
            .evaluate(&genotypes, &log_uniform(3), &array, &trio)
            .unwrap();
        assert!(inferences.maternal_log_posteriors[1].exp() > 0.9);
        assert!(inferences.child_log_posteriors[1].exp() > 0.9);
    }
}

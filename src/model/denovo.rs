// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cell::RefCell;
use std::collections::HashMap;

use bio::stats::pairhmm::{self, PairHMM, XYEmission};
use bio::stats::{LogProb, Prob};
use serde::{Deserialize, Serialize};

use crate::likelihood::pairhmm::GapParams;
use crate::types::Haplotype;

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DeNovoModelParams {
    /// Per-base probability of a point mutation in one generation.
    pub mutation_rate: f64,
}

impl Default for DeNovoModelParams {
    fn default() -> Self {
        DeNovoModelParams {
            mutation_rate: 1e-5,
        }
    }
}

/// How evaluations are memoized. This is a first-class contract because of
/// its performance impact on the trio and cancer models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachingStrategy {
    /// Recompute on every call.
    None,
    /// Memoize by haplotype value equality.
    Value,
    /// Memoize by haplotype identity within a primed haplotype list; fastest,
    /// but requires the list to stay fixed while primed. Caches are
    /// worker-owned and never shared.
    Address,
}

#[derive(Default)]
struct Caches {
    value: HashMap<(Haplotype, Haplotype), LogProb>,
    index: Vec<Vec<Option<LogProb>>>,
}

/// `ln P(target | given)`: the probability that `target` arose from `given`
/// through a single generation of the mutation process (SNVs and indels).
/// Scoring uses the same banded alignment machinery as the read likelihood
/// engine, parameterized by the mutation process instead of sequencing
/// error.
pub struct DeNovoModel {
    params: DeNovoModelParams,
    caching: CachingStrategy,
    ln_no_mutation: LogProb,
    ln_mutation: LogProb,
    gap_params: GapParams,
    haplotypes: Vec<Haplotype>,
    pairhmm: RefCell<PairHMM>,
    caches: RefCell<Caches>,
}

impl DeNovoModel {
    pub fn new(params: DeNovoModelParams, caching: CachingStrategy) -> Self {
        assert!(params.mutation_rate > 0.0 && params.mutation_rate < 1.0);
        // Indel mutations are an order of magnitude rarer than point
        // mutations and extend geometrically.
        let prob_indel = LogProb::from(Prob(params.mutation_rate * 0.1));
        let gap_params = GapParams {
            prob_insertion: prob_indel,
            prob_deletion: prob_indel,
            prob_insertion_extend: LogProb::from(Prob(0.25)),
            prob_deletion_extend: LogProb::from(Prob(0.25)),
            free_flanks: false,
        };
        DeNovoModel {
            params,
            caching,
            ln_no_mutation: LogProb(fast_ln_one_minus(params.mutation_rate)),
            ln_mutation: LogProb((params.mutation_rate / 3.0).ln()),
            pairhmm: RefCell::new(PairHMM::new(&gap_params)),
            gap_params,
            haplotypes: Vec::new(),
            caches: RefCell::new(Caches::default()),
        }
    }

    pub fn params(&self) -> &DeNovoModelParams {
        &self.params
    }

    /// Pre-register the haplotype list so evaluations can use dense
    /// index-based caches.
    pub fn prime(&mut self, haplotypes: Vec<Haplotype>) {
        let n = haplotypes.len();
        self.haplotypes = haplotypes;
        self.caches.borrow_mut().index = vec![vec![None; n]; n];
    }

    pub fn unprime(&mut self) {
        self.haplotypes.clear();
        let mut caches = self.caches.borrow_mut();
        caches.index.clear();
        caches.value.clear();
    }

    pub fn is_primed(&self) -> bool {
        !self.haplotypes.is_empty()
    }

    /// ln P(target | given).
    pub fn evaluate(&self, target: &Haplotype, given: &Haplotype) -> LogProb {
        match self.caching {
            CachingStrategy::None => self.evaluate_uncached(target, given),
            CachingStrategy::Value | CachingStrategy::Address => {
                // Without a primed index, identity caching degrades to value
                // caching.
                if let Some(&cached) = self
                    .caches
                    .borrow()
                    .value
                    .get(&(target.clone(), given.clone()))
                {
                    return cached;
                }
                let result = self.evaluate_uncached(target, given);
                self.caches
                    .borrow_mut()
                    .value
                    .insert((target.clone(), given.clone()), result);
                result
            }
        }
    }

    /// ln P(target | given) through the primed index cache. Panics if the
    /// model has not been primed.
    pub fn evaluate_indexed(&self, target: usize, given: usize) -> LogProb {
        assert!(self.is_primed(), "bug: de novo model not primed");
        if let Some(cached) = self.caches.borrow().index[target][given] {
            return cached;
        }
        let result =
            self.evaluate_uncached(&self.haplotypes[target], &self.haplotypes[given]);
        self.caches.borrow_mut().index[target][given] = Some(result);
        result
    }

    fn evaluate_uncached(&self, target: &Haplotype, given: &Haplotype) -> LogProb {
        if target.sequence() == given.sequence() {
            // No alignment needed; every base was faithfully inherited.
            return LogProb(*self.ln_no_mutation * target.len() as f64);
        }
        let params = MutationEmissionParams {
            given: given.sequence(),
            target: target.sequence(),
            ln_no_mutation: self.ln_no_mutation,
            ln_mutation: self.ln_mutation,
        };
        self.pairhmm
            .borrow_mut()
            .prob_related(&params, &self.gap_params, None)
    }
}

// ln(1 - x) without cancellation for tiny x.
fn fast_ln_one_minus(x: f64) -> f64 {
    (-x).ln_1p()
}

/// Emission parameters of the mutation HMM: `x` is the parental haplotype,
/// `y` the offspring haplotype.
struct MutationEmissionParams<'a> {
    given: &'a [u8],
    target: &'a [u8],
    ln_no_mutation: LogProb,
    ln_mutation: LogProb,
}

impl<'a> pairhmm::EmissionParameters for MutationEmissionParams<'a> {
    #[inline]
    fn prob_emit_xy(&self, i: usize, j: usize) -> XYEmission {
        if self.given[i].to_ascii_uppercase() == self.target[j].to_ascii_uppercase() {
            XYEmission::Match(self.ln_no_mutation)
        } else {
            XYEmission::Mismatch(self.ln_mutation)
        }
    }

    #[inline]
    fn prob_emit_x(&self, _: usize) -> LogProb {
        LogProb::ln_one()
    }

    #[inline]
    fn prob_emit_y(&self, _: usize) -> LogProb {
        LogProb::ln_one()
    }

    #[inline]
    fn len_x(&self) -> usize {
        self.given.len()
    }

    #[inline]
    fn len_y(&self) -> usize {
        self.target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Allele, GenomicRegion};

    fn haplotypes() -> Vec<Haplotype> {
        let region = GenomicRegion::new("1", 0, 12);
        let ref_seq = b"ACGTACGTACGT";
        let reference = Haplotype::reference(region.clone(), ref_seq);
        let one_snv = Haplotype::new(
            region.clone(),
            vec![Allele::new(GenomicRegion::new("1", 5, 6), b"T".to_vec())],
            ref_seq,
        )
        .unwrap();
        let two_snvs = Haplotype::new(
            region.clone(),
            vec![
                Allele::new(GenomicRegion::new("1", 5, 6), b"T".to_vec()),
                Allele::new(GenomicRegion::new("1", 8, 9), b"G".to_vec()),
            ],
            ref_seq,
        )
        .unwrap();
        let deletion = Haplotype::new(
            region,
            vec![Allele::new(GenomicRegion::new("1", 5, 7), b"A".to_vec())],
            ref_seq,
        )
        .unwrap();
        vec![reference, one_snv, two_snvs, deletion]
    }

    /// No mutation is always the most likely explanation.
    #[test]
    fn test_self_evaluation_is_maximal() {
        let model = DeNovoModel::new(DeNovoModelParams::default(), CachingStrategy::None);
        let haplotypes = haplotypes();
        let reference = &haplotypes[0];
        let self_prob = model.evaluate(reference, reference);
        for other in &haplotypes[1..] {
            assert!(self_prob > model.evaluate(other, reference));
        }
    }

    #[test]
    fn test_more_mutations_less_likely() {
        let model = DeNovoModel::new(DeNovoModelParams::default(), CachingStrategy::None);
        let haplotypes = haplotypes();
        let one = model.evaluate(&haplotypes[1], &haplotypes[0]);
        let two = model.evaluate(&haplotypes[2], &haplotypes[0]);
        assert!(one > two);
    }

    #[test]
    fn test_caches_agree() {
        let uncached = DeNovoModel::new(DeNovoModelParams::default(), CachingStrategy::None);
        let mut primed = DeNovoModel::new(DeNovoModelParams::default(), CachingStrategy::Address);
        let haplotypes = haplotypes();
        primed.prime(haplotypes.clone());
        for target in 0..haplotypes.len() {
            for given in 0..haplotypes.len() {
                let expected = uncached.evaluate(&haplotypes[target], &haplotypes[given]);
                // Twice: the second evaluation is served from the cache.
                assert_eq!(primed.evaluate_indexed(target, given), expected);
                assert_eq!(primed.evaluate_indexed(target, given), expected);
            }
        }
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::LogProb;
use itertools::Itertools;

pub(crate) mod downsampler;
pub(crate) mod worker_pool;

pub(crate) const NUMERICAL_EPSILON: f64 = 1e-3;

/// Tolerance for the log-space normalization invariant. Drift beyond this is
/// a bug, not a numerical accident.
pub(crate) const NORMALIZATION_TOLERANCE: f64 = 1e-10;

/// A vector of log probabilities over a discrete event space.
pub type LogProbVector = Vec<LogProb>;

/// Normalize the given log probabilities in place such that they sum to one.
/// Returns the log normalization constant (the evidence when the input is a
/// joint distribution).
pub(crate) fn normalise_log_probs(probs: &mut [LogProb]) -> LogProb {
    let marginal = LogProb::ln_sum_exp(probs);
    if marginal != LogProb::ln_zero() {
        for p in probs.iter_mut() {
            *p = LogProb(**p - *marginal);
        }
    } else {
        // All mass vanished; fall back to the uniform distribution instead of
        // propagating -inf everywhere.
        let uniform = LogProb(-(probs.len() as f64).ln());
        for p in probs.iter_mut() {
            *p = uniform;
        }
    }
    marginal
}

/// Check the normalization invariant on a normalized log probability vector.
pub(crate) fn normalization_drift(probs: &[LogProb]) -> f64 {
    (LogProb::ln_sum_exp(probs).exp() - 1.0).abs()
}

pub(crate) fn log_uniform(n: usize) -> LogProbVector {
    vec![LogProb(-(n as f64).ln()); n]
}

/// Elementwise sum of two log probability vectors (a product of the
/// underlying distributions).
pub(crate) fn add(lhs: &[LogProb], rhs: &[LogProb]) -> LogProbVector {
    debug_assert_eq!(lhs.len(), rhs.len());
    lhs.iter()
        .zip_eq(rhs.iter())
        .map(|(a, b)| LogProb(**a + **b))
        .collect()
}

pub(crate) fn add_and_normalise(lhs: &[LogProb], rhs: &[LogProb]) -> LogProbVector {
    let mut result = add(lhs, rhs);
    normalise_log_probs(&mut result);
    result
}

/// Elementwise sum over many log probability vectors, normalized.
pub(crate) fn add_all_and_normalise(vectors: &[LogProbVector]) -> LogProbVector {
    assert!(!vectors.is_empty());
    let mut result = vectors[0].clone();
    for v in &vectors[1..] {
        result = add(&result, v);
    }
    normalise_log_probs(&mut result);
    result
}

/// Expectation of a Dirichlet distribution with the given concentrations.
pub(crate) fn dirichlet_expectation(alphas: &[f64]) -> Vec<f64> {
    let sum: f64 = alphas.iter().sum();
    alphas.iter().map(|a| a / sum).collect()
}

/// Approximate equality with the relative tolerance used for MAP tie
/// detection in the read assigner.
pub(crate) fn almost_equal(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    let scale = a.abs().max(b.abs()).max(1.0);
    diff <= scale * 1e-6
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalise_log_probs() {
        let mut probs = vec![LogProb(0.5f64.ln()), LogProb(0.25f64.ln())];
        normalise_log_probs(&mut probs);
        assert_relative_eq!(probs[0].exp(), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(probs[1].exp(), 1.0 / 3.0, epsilon = 1e-12);
        assert!(normalization_drift(&probs) < NORMALIZATION_TOLERANCE);
    }

    #[test]
    fn test_normalise_degenerate() {
        let mut probs = vec![LogProb::ln_zero(); 4];
        normalise_log_probs(&mut probs);
        assert_relative_eq!(probs[0].exp(), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_dirichlet_expectation() {
        let e = dirichlet_expectation(&[1.0, 3.0]);
        assert_relative_eq!(e[0], 0.25);
        assert_relative_eq!(e[1], 0.75);
    }

    #[test]
    fn test_almost_equal() {
        assert!(almost_equal(1.0, 1.0 + 1e-9));
        assert!(!almost_equal(1.0, 1.001));
    }
}

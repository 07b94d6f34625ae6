// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use bio::stats::pairhmm::{self, XYEmission};
use bio::stats::{LogProb, PHREDProb, Prob};

lazy_static! {
    // A base miscall is read as one of the three other bases.
    static ref PROB_CONFUSION: LogProb = LogProb::from(Prob(1.0 / 3.0));
}

/// Probability that the sequencer miscalled a base with the given quality.
pub(crate) fn prob_base_miscall(quality: u8) -> LogProb {
    LogProb::from(PHREDProb(f64::from(quality)))
}

/// Gap and flank parameters of the alignment HMM.
#[derive(Debug, Clone)]
pub(crate) struct GapParams {
    pub(crate) prob_insertion: LogProb,
    pub(crate) prob_deletion: LogProb,
    pub(crate) prob_insertion_extend: LogProb,
    pub(crate) prob_deletion_extend: LogProb,
    /// Semiglobal alignment: allow the read to align anywhere within the
    /// haplotype window.
    pub(crate) free_flanks: bool,
}

impl pairhmm::GapParameters for GapParams {
    #[inline]
    fn prob_gap_x(&self) -> LogProb {
        self.prob_insertion
    }

    #[inline]
    fn prob_gap_y(&self) -> LogProb {
        self.prob_deletion
    }

    #[inline]
    fn prob_gap_x_extend(&self) -> LogProb {
        self.prob_insertion_extend
    }

    #[inline]
    fn prob_gap_y_extend(&self) -> LogProb {
        self.prob_deletion_extend
    }
}

impl pairhmm::StartEndGapParameters for GapParams {
    #[inline]
    fn free_start_gap_x(&self) -> bool {
        self.free_flanks
    }

    #[inline]
    fn free_end_gap_x(&self) -> bool {
        self.free_flanks
    }

    #[inline]
    fn prob_start_gap_x(&self, _: usize) -> LogProb {
        if self.free_flanks {
            LogProb::ln_one()
        } else {
            LogProb::ln_zero()
        }
    }
}

/// Per-base emission table of a read window: precomputed miscall and
/// no-miscall probabilities from the base qualities.
pub(crate) struct ReadEmission<'a> {
    read_seq: &'a [u8],
    any_miscall: Vec<LogProb>,
    no_miscall: Vec<LogProb>,
}

impl<'a> ReadEmission<'a> {
    pub(crate) fn new(read_seq: &'a [u8], quals: &[u8]) -> Self {
        debug_assert_eq!(read_seq.len(), quals.len());
        let mut any_miscall = vec![LogProb::ln_zero(); quals.len()];
        let mut no_miscall = any_miscall.clone();
        for (j, &quality) in quals.iter().enumerate() {
            let prob_miscall = prob_base_miscall(quality);
            any_miscall[j] = prob_miscall;
            no_miscall[j] = prob_miscall.ln_one_minus_exp();
        }
        ReadEmission {
            read_seq,
            any_miscall,
            no_miscall,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.read_seq.len()
    }

    fn particular_miscall(&self, j: usize) -> LogProb {
        LogProb(*self.any_miscall[j] + **PROB_CONFUSION)
    }

    /// Probability of the read base at `j` given the reference base.
    pub(crate) fn prob_match_mismatch(&self, j: usize, ref_base: u8) -> XYEmission {
        if self.read_seq[j].to_ascii_uppercase() == ref_base.to_ascii_uppercase() {
            XYEmission::Match(self.no_miscall[j])
        } else {
            XYEmission::Mismatch(self.particular_miscall(j))
        }
    }

    pub(crate) fn prob_insertion(&self, j: usize) -> LogProb {
        self.any_miscall[j]
    }

    /// Probability that none of the bases is miscalled; the likelihood of a
    /// perfect match.
    pub(crate) fn certainty_est(&self) -> LogProb {
        self.no_miscall.iter().sum()
    }
}

/// Emission parameters scoring a read window against a window of the
/// haplotype sequence.
pub(crate) struct HaplotypeEmissionParams<'a> {
    pub(crate) haplotype: &'a [u8],
    pub(crate) ref_offset: usize,
    pub(crate) ref_end: usize,
    pub(crate) read_emission: &'a ReadEmission<'a>,
}

impl<'a> pairhmm::EmissionParameters for HaplotypeEmissionParams<'a> {
    #[inline]
    fn prob_emit_xy(&self, i: usize, j: usize) -> XYEmission {
        self.read_emission
            .prob_match_mismatch(j, self.haplotype[self.ref_offset + i])
    }

    #[inline]
    fn prob_emit_x(&self, _: usize) -> LogProb {
        LogProb::ln_one()
    }

    #[inline]
    fn prob_emit_y(&self, j: usize) -> LogProb {
        self.read_emission.prob_insertion(j)
    }

    #[inline]
    fn len_x(&self) -> usize {
        self.ref_end - self.ref_offset
    }

    #[inline]
    fn len_y(&self) -> usize {
        self.read_emission.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_prob_base_miscall() {
        assert_relative_eq!(prob_base_miscall(20).exp(), 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_match_mismatch_emission() {
        let emission = ReadEmission::new(b"ACGT", &[30; 4]);
        match emission.prob_match_mismatch(0, b'A') {
            XYEmission::Match(prob) => {
                assert_relative_eq!(prob.exp(), 0.999, epsilon = 1e-12)
            }
            XYEmission::Mismatch(_) => panic!("expected a match emission"),
        }
        match emission.prob_match_mismatch(0, b'C') {
            XYEmission::Mismatch(prob) => {
                assert_relative_eq!(prob.exp(), 0.001 / 3.0, epsilon = 1e-12)
            }
            XYEmission::Match(_) => panic!("expected a mismatch emission"),
        }
    }

    #[test]
    fn test_certainty_estimate() {
        let emission = ReadEmission::new(b"ACGT", &[20; 4]);
        assert_relative_eq!(emission.certainty_est().exp(), 0.99f64.powi(4));
    }
}

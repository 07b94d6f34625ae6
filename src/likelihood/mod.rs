// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Read-haplotype likelihood computation with a k-mer anchored, banded
//! pair-HMM.

use bio::stats::pairhmm::PairHMM;
use bio::stats::{LogProb, PHREDProb, Prob};

use crate::likelihood::kmer_mapping::{kmer_hashes, map_query_to_target, KmerIndex};
use crate::likelihood::pairhmm::{GapParams, HaplotypeEmissionParams, ReadEmission};
use crate::reads::{AlignedRead, CigarOp};
use crate::types::NucleotideSequence;
use crate::utils::NUMERICAL_EPSILON;

pub mod array;
pub(crate) mod kmer_mapping;
pub(crate) mod pairhmm;

pub use array::HaplotypeLikelihoodArray;

/// Band width added around candidate alignment anchors.
const EDIT_BAND: usize = 2;

/// Cap on candidate anchor positions per read; pathological low-complexity
/// reads would otherwise explode the number of HMM runs.
const MAX_MAPPING_POSITIONS: usize = 10;

lazy_static! {
    static ref PROB_ILLUMINA_INS: LogProb = LogProb::from(Prob(2.8e-6));
    static ref PROB_ILLUMINA_DEL: LogProb = LogProb::from(Prob(5.1e-6));
    static ref PROB_GAP_EXTEND: LogProb = LogProb::from(Prob(1.0e-2));
    /// Per-base likelihood floor for reads without any usable anchor.
    static ref PROB_RANDOM_BASE: LogProb = LogProb::from(Prob(0.25));
}

#[derive(Clone, Debug)]
pub struct LikelihoodModelConfig {
    /// Longest indel run the model scores before clamping band width.
    pub max_indel_error: u8,
    /// Model soft-clipped read flanks instead of trimming them.
    pub use_flank_state: bool,
    /// Mix the mapping quality into the alignment prior.
    pub use_mapping_quality: bool,
}

impl Default for LikelihoodModelConfig {
    fn default() -> Self {
        LikelihoodModelConfig {
            max_indel_error: 8,
            use_flank_state: true,
            use_mapping_quality: true,
        }
    }
}

struct HaplotypeContext {
    sequence: NucleotideSequence,
    index: KmerIndex,
    /// Reference coordinate of `sequence[0]`.
    offset: u64,
}

/// Computes `ln P(read | haplotype)`. The model is primed on one (expanded)
/// haplotype at a time via [`reset`](HaplotypeLikelihoodModel::reset) and
/// then evaluated for each read.
pub struct HaplotypeLikelihoodModel {
    pairhmm: PairHMM,
    gap_params: GapParams,
    config: LikelihoodModelConfig,
    context: Option<HaplotypeContext>,
}

impl Default for HaplotypeLikelihoodModel {
    fn default() -> Self {
        HaplotypeLikelihoodModel::new(LikelihoodModelConfig::default())
    }
}

impl HaplotypeLikelihoodModel {
    pub fn new(config: LikelihoodModelConfig) -> Self {
        let gap_params = GapParams {
            prob_insertion: *PROB_ILLUMINA_INS,
            prob_deletion: *PROB_ILLUMINA_DEL,
            prob_insertion_extend: *PROB_GAP_EXTEND,
            prob_deletion_extend: *PROB_GAP_EXTEND,
            free_flanks: true,
        };
        HaplotypeLikelihoodModel {
            pairhmm: PairHMM::new(&gap_params),
            gap_params,
            config,
            context: None,
        }
    }

    /// Flank padding each haplotype needs on both sides so that every
    /// overlapping read can be aligned without running off the sequence.
    pub fn pad_requirement(&self) -> u64 {
        (self.config.max_indel_error as u64) + EDIT_BAND as u64
    }

    /// Prime the model on a haplotype sequence starting at the given
    /// reference coordinate. Builds the k-mer anchor index once.
    pub fn reset(&mut self, sequence: NucleotideSequence, offset: u64) {
        let index = KmerIndex::build(&sequence);
        self.context = Some(HaplotypeContext {
            sequence,
            index,
            offset,
        });
    }

    /// ln P(read | primed haplotype). Candidate anchors come from the k-mer
    /// index; without any hit the read's declared alignment offset is used.
    /// Reads that cannot be anchored at all get a uniform floor.
    ///
    /// Panics if the model has not been primed.
    pub fn evaluate(&mut self, read: &AlignedRead) -> LogProb {
        let context = self
            .context
            .as_ref()
            .expect("bug: likelihood model evaluated before reset");
        let (seq, quals) = read_window(read, self.config.use_flank_state);
        if seq.is_empty() {
            return LogProb::ln_one();
        }

        let mut positions =
            map_query_to_target(&kmer_hashes(seq), &context.index, MAX_MAPPING_POSITIONS);
        if positions.is_empty() {
            // Fall back to the declared alignment offset.
            if read.region().begin() >= context.offset {
                let offset = (read.region().begin() - context.offset) as usize;
                if offset < context.sequence.len() {
                    positions.push(offset);
                }
            }
        }

        let floor = LogProb(**PROB_RANDOM_BASE * seq.len() as f64);
        let likelihood = if positions.is_empty() {
            floor
        } else {
            let emission = ReadEmission::new(seq, quals);
            let band = self.config.max_indel_error as usize + EDIT_BAND;
            let scores: Vec<LogProb> = positions
                .iter()
                .map(|&pos| {
                    let ref_offset = pos.saturating_sub(band);
                    let ref_end = (pos + seq.len() + band).min(context.sequence.len());
                    let params = HaplotypeEmissionParams {
                        haplotype: &context.sequence,
                        ref_offset,
                        ref_end,
                        read_emission: &emission,
                    };
                    self.pairhmm
                        .prob_related(&params, &self.gap_params, Some(band))
                })
                .collect();
            LogProb::ln_sum_exp(&scores).cap_numerical_overshoot(NUMERICAL_EPSILON)
        };

        if self.config.use_mapping_quality {
            let prob_mismapped = LogProb::from(PHREDProb(f64::from(*read.mapping_quality())));
            let prob_mapped = prob_mismapped.ln_one_minus_exp();
            (prob_mapped + likelihood).ln_add_exp(prob_mismapped + floor)
        } else {
            likelihood
        }
    }
}

/// The scored read window: all bases, or the soft-clip trimmed core if flank
/// modeling is disabled.
fn read_window(read: &AlignedRead, use_flank_state: bool) -> (&[u8], &[u8]) {
    let seq = read.sequence().as_slice();
    let quals = read.base_qualities().as_slice();
    if use_flank_state {
        return (seq, quals);
    }
    let lhs = match read.cigar().first() {
        Some(CigarOp::SoftClip(l)) => *l as usize,
        _ => 0,
    };
    let rhs = match read.cigar().last() {
        Some(CigarOp::SoftClip(l)) => *l as usize,
        _ => 0,
    };
    let end = seq.len().saturating_sub(rhs).max(lhs);
    (&seq[lhs..end], &quals[lhs..end])
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    /* ==================== Configuration errors ===================== */
    #[error("invalid ploidy: must be at least 1, got {ploidy}")]
    InvalidPloidy { ploidy: u32 },
    #[error("invalid thread count: must be at least 1, got {count}")]
    InvalidThreadCount { count: usize },
    #[error("contig {contig} not found in the reference")]
    UnknownContig { contig: String },
    #[error("normal sample {name} is not among the calling samples")]
    InvalidNormalSample { name: String },
    #[error("sample {name} is unknown to this run")]
    UnknownSample { name: String },
    #[error("caller {caller} requires at least {min} sample(s), got {got}")]
    TooFewSamples {
        caller: String,
        min: usize,
        got: usize,
    },
    #[error("invalid dropout concentration {value}: must be positive")]
    InvalidDropoutConcentration { value: f64 },
    #[error("invalid mutation rate {value}: must be in (0, 1)")]
    InvalidMutationRate { value: f64 },
    #[error("incompatible options: {msg}")]
    IncompatibleOptions { msg: String },
    /* ====================== Input data errors ====================== */
    #[error("malformed record in {path} at offset {offset}: {msg}")]
    MalformedInput {
        path: PathBuf,
        offset: u64,
        msg: String,
    },
    #[error("region {region} exceeds contig bounds")]
    RegionOutOfBounds { region: String },
    #[error("reference allele does not match the reference sequence at {region}")]
    ReferenceMismatch { region: String },
    /* ====================== Per-region errors ====================== */
    #[error("too many candidate haplotypes in region {region} (got {got}, cap {cap})")]
    TooManyHaplotypes {
        region: String,
        got: usize,
        cap: usize,
    },
    #[error("inference did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },
    #[error("calling window {index} exceeded its wall-clock budget")]
    WindowTimeout { index: usize },
    /* ==================== Internal invariants ====================== */
    #[error("bug: posterior normalization drifted by {drift} (tolerance {tolerance})")]
    NormalizationDrift { drift: f64, tolerance: f64 },
    #[error("bug: negative probability {value} in {context}")]
    NegativeProbability { value: f64, context: String },
    #[error("bug: likelihood array not primed on any sample")]
    UnprimedLikelihoods,
}

/// Process exit codes. Aborted calling windows do not fail the run; they are
/// reported as sentinel records and the run exits with `Success`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    ConfigurationError = 1,
    InputError = 2,
    OutputError = 3,
    InferenceError = 4,
}

impl Error {
    pub fn exit_code(&self) -> ExitCode {
        use Error::*;
        match self {
            InvalidPloidy { .. }
            | InvalidThreadCount { .. }
            | UnknownContig { .. }
            | InvalidNormalSample { .. }
            | UnknownSample { .. }
            | TooFewSamples { .. }
            | InvalidDropoutConcentration { .. }
            | InvalidMutationRate { .. }
            | IncompatibleOptions { .. } => ExitCode::ConfigurationError,
            MalformedInput { .. } | RegionOutOfBounds { .. } | ReferenceMismatch { .. } => {
                ExitCode::InputError
            }
            _ => ExitCode::InferenceError,
        }
    }
}

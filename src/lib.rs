// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Nautilus is a haplotype-based variant calling core. Given a reference
//! genome, aligned reads and candidate variants over a genomic region, it
//! enumerates candidate haplotypes, evaluates read-haplotype likelihoods with
//! a banded pair-HMM, runs sample-appropriate Bayesian inference over
//! genotypes (individual, population, trio, somatic subclone, single cell),
//! derives calls with posterior qualities and assigns reads back to the
//! called haplotypes to obtain per-allele support.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod assignment;
pub mod calling;
pub mod config;
pub mod csr;
pub mod errors;
pub mod haplotypes;
pub mod likelihood;
pub mod model;
pub mod reads;
pub mod reference;
pub mod types;
pub mod utils;

pub use crate::config::CallerConfig;
pub use crate::errors::Error;
pub use crate::types::{Allele, GenomicRegion, Genotype, Haplotype, Variant};

/// A sample identifier, as found in the read group headers of the input.
pub type SampleName = String;

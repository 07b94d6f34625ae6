// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use bio::stats::PHREDProb;
use derive_builder::Builder;
use getset::Getters;

use crate::types::{Allele, GenomicRegion, Genotype, Variant};
use crate::SampleName;

/// The kinds of records a caller can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallType {
    Reference,
    Germline,
    Somatic,
    Denovo,
    CancerGenotype,
    Cell,
}

/// A phased link between calls of one phase block.
#[derive(Clone, Debug, PartialEq)]
pub struct PhaseCall {
    /// The span of the phase block this call belongs to.
    pub region: GenomicRegion,
    pub quality: PHREDProb,
}

/// The called genotype of one sample, with its quality and optional phase.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct GenotypeCall {
    genotype: Genotype<Allele>,
    quality: PHREDProb,
    #[builder(default)]
    phase: Option<PhaseCall>,
}

/// A typed call over a region with posterior quality and per-sample
/// genotype calls.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct Call {
    call_type: CallType,
    region: GenomicRegion,
    /// The called variant; absent for reference calls.
    #[builder(default)]
    variant: Option<Variant>,
    quality: PHREDProb,
    #[builder(default)]
    model_posterior: Option<f64>,
    #[builder(default)]
    genotypes: BTreeMap<SampleName, GenotypeCall>,
    #[builder(default)]
    filters: Vec<String>,
}

impl Call {
    pub fn is_reference(&self) -> bool {
        self.call_type == CallType::Reference
    }

    pub(crate) fn set_phase(&mut self, sample: &str, phase: PhaseCall) {
        if let Some(genotype_call) = self.genotypes.get_mut(sample) {
            genotype_call.phase = Some(phase);
        }
    }

    pub(crate) fn set_model_posterior(&mut self, posterior: f64) {
        self.model_posterior = Some(posterior);
    }

    fn sort_key(&self) -> (GenomicRegion, Vec<u8>, Vec<u8>) {
        match &self.variant {
            Some(variant) => (
                self.region.clone(),
                variant.ref_sequence().to_vec(),
                variant.alt_sequence().to_vec(),
            ),
            None => (self.region.clone(), Vec::new(), Vec::new()),
        }
    }
}

/// Sort calls into output order and resolve duplicates: calls over the same
/// region and alleles are merged in favor of the highest-quality
/// representation. Ties break deterministically by (region, lexicographic
/// allele).
pub fn collate_calls(mut calls: Vec<Call>) -> Vec<Call> {
    calls.sort_by(|a, b| {
        a.sort_key()
            .cmp(&b.sort_key())
            // Highest quality first within a duplicate group.
            .then_with(|| b.quality.partial_cmp(&a.quality).expect("bug: NaN quality"))
    });
    calls.dedup_by(|b, a| {
        // `a` precedes `b`; keep `a`, the higher-quality representation.
        a.region() == b.region()
            && a.variant() == b.variant()
            && a.call_type() == b.call_type()
    });
    calls
}

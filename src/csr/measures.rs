// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use anyhow::Result;

use crate::calling::calls::Call;
use crate::csr::facets::{pileups, read_assignments, reference_context, samples, FacetKind, FacetMap};

/// The result of one measure on one record. Missing values stay `None`
/// rather than defaulting to zero.
#[derive(Clone, Debug, PartialEq)]
pub enum MeasureResult {
    Scalar(Option<f64>),
    PerSample(Vec<Option<f64>>),
    PerAllele(Vec<Option<f64>>),
    PerSamplePerAllele(Vec<Vec<Option<f64>>>),
}

/// A pure function of a call record and its facets.
pub trait Measure {
    fn name(&self) -> &str;

    fn requirements(&self) -> &[FacetKind];

    fn evaluate(&self, call: &Call, facets: &FacetMap) -> Result<MeasureResult>;
}

/// Raw read depth over the record's region, per sample.
pub struct Depth;

impl Measure for Depth {
    fn name(&self) -> &str {
        "DP"
    }

    fn requirements(&self) -> &[FacetKind] {
        &[FacetKind::Samples, FacetKind::Pileups]
    }

    fn evaluate(&self, call: &Call, facets: &FacetMap) -> Result<MeasureResult> {
        let reads = pileups(facets);
        let result = samples(facets)
            .iter()
            .map(|sample| {
                reads.get(sample).map(|reads| {
                    reads
                        .iter()
                        .filter(|read| read.region().overlaps(call.region()))
                        .count() as f64
                })
            })
            .collect();
        Ok(MeasureResult::PerSample(result))
    }
}

/// The genotype quality of each sample's called genotype.
pub struct GenotypeQuality;

impl Measure for GenotypeQuality {
    fn name(&self) -> &str {
        "GQ"
    }

    fn requirements(&self) -> &[FacetKind] {
        &[FacetKind::Samples]
    }

    fn evaluate(&self, call: &Call, facets: &FacetMap) -> Result<MeasureResult> {
        let result = samples(facets)
            .iter()
            .map(|sample| call.genotypes().get(sample).map(|g| **g.quality()))
            .collect();
        Ok(MeasureResult::PerSample(result))
    }
}

/// Number of reads assigned to the record's alternate allele, per sample.
pub struct AssignedDepth;

impl Measure for AssignedDepth {
    fn name(&self) -> &str {
        "ADP"
    }

    fn requirements(&self) -> &[FacetKind] {
        &[FacetKind::Samples, FacetKind::ReadAssignments]
    }

    fn evaluate(&self, call: &Call, facets: &FacetMap) -> Result<MeasureResult> {
        let assignments = read_assignments(facets);
        let alt = call.variant().as_ref().map(|v| v.alt_allele());
        let result = samples(facets)
            .iter()
            .map(|sample| {
                alt.as_ref().and_then(|alt| {
                    assignments
                        .get(sample)
                        .and_then(|support| support.get(alt))
                        .map(|reads| reads.len() as f64)
                })
            })
            .collect();
        Ok(MeasureResult::PerSample(result))
    }
}

/// Length (in repeat units) of the short tandem repeat at the record's
/// position, 0 when the site is not repetitive.
pub struct StrLength;

impl Measure for StrLength {
    fn name(&self) -> &str {
        "STRL"
    }

    fn requirements(&self) -> &[FacetKind] {
        &[FacetKind::ReferenceContext]
    }

    fn evaluate(&self, call: &Call, facets: &FacetMap) -> Result<MeasureResult> {
        let (context_region, sequence) = reference_context(facets);
        if call.region().begin() < context_region.begin() {
            return Ok(MeasureResult::Scalar(None));
        }
        let offset = (call.region().begin() - context_region.begin()) as usize;
        if offset >= sequence.len() {
            return Ok(MeasureResult::Scalar(None));
        }
        Ok(MeasureResult::Scalar(Some(
            str_repeat_count(sequence, offset) as f64,
        )))
    }
}

/// Longest run of tandem repeats (periods 1 to 6) starting at `offset`.
fn str_repeat_count(sequence: &[u8], offset: usize) -> usize {
    let mut best = 0;
    for period in 1..=6usize {
        if offset + 2 * period > sequence.len() {
            break;
        }
        let unit = &sequence[offset..offset + period];
        let mut repeats = 1;
        let mut pos = offset + period;
        while pos + period <= sequence.len() && &sequence[pos..pos + period] == unit {
            repeats += 1;
            pos += period;
        }
        if repeats > 1 {
            best = best.max(repeats);
        }
    }
    best
}

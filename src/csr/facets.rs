// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::assignment::AlleleSupportMap;
use crate::calling::callers::CalledWindow;
use crate::reads::ReadMap;
use crate::reference::ReferenceSource;
use crate::types::{Allele, GenomicRegion, NucleotideSequence};
use crate::SampleName;

/// Names of the derived views measures can require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FacetKind {
    Samples,
    ReadAssignments,
    ReferenceContext,
    Alleles,
    Pileups,
}

/// A derived view over one batch of calls.
pub enum Facet {
    Samples(Vec<SampleName>),
    ReadAssignments(BTreeMap<SampleName, AlleleSupportMap>),
    ReferenceContext {
        region: GenomicRegion,
        sequence: NucleotideSequence,
    },
    Alleles(Vec<Allele>),
    Pileups(ReadMap),
}

pub type FacetMap = HashMap<FacetKind, Facet>;

/// Builds the facets a set of measures requires, each computed once and
/// shared across the measures of one record batch.
pub struct FacetFactory<'a> {
    window: &'a CalledWindow,
    reads: &'a ReadMap,
    reference: &'a dyn ReferenceSource,
    /// Reference context padding around the window.
    context_pad: u64,
}

impl<'a> FacetFactory<'a> {
    pub fn new(
        window: &'a CalledWindow,
        reads: &'a ReadMap,
        reference: &'a dyn ReferenceSource,
    ) -> Self {
        FacetFactory {
            window,
            reads,
            reference,
            context_pad: 50,
        }
    }

    pub fn make(&self, requirements: &[FacetKind]) -> Result<FacetMap> {
        let mut facets = FacetMap::new();
        for &kind in requirements {
            if facets.contains_key(&kind) {
                continue;
            }
            facets.insert(kind, self.build(kind)?);
        }
        Ok(facets)
    }

    fn build(&self, kind: FacetKind) -> Result<Facet> {
        Ok(match kind {
            FacetKind::Samples => Facet::Samples(self.reads.keys().cloned().collect()),
            FacetKind::ReadAssignments => Facet::ReadAssignments(self.window.support.clone()),
            FacetKind::ReferenceContext => {
                let region = {
                    let expanded = self.window.region.expand(self.context_pad, self.context_pad);
                    let size = self
                        .reference
                        .contig_size(expanded.contig())
                        .unwrap_or_else(|| expanded.end());
                    GenomicRegion::new(expanded.contig(), expanded.begin(), expanded.end().min(size))
                };
                let sequence = self.reference.fetch(&region)?;
                Facet::ReferenceContext { region, sequence }
            }
            FacetKind::Alleles => Facet::Alleles(
                self.window
                    .calls
                    .iter()
                    .filter_map(|call| call.variant().as_ref().map(|v| v.alt_allele()))
                    .collect(),
            ),
            FacetKind::Pileups => Facet::Pileups(self.reads.clone()),
        })
    }
}

pub(crate) fn samples(facets: &FacetMap) -> &[SampleName] {
    match facets.get(&FacetKind::Samples) {
        Some(Facet::Samples(samples)) => samples,
        _ => panic!("bug: Samples facet not supplied"),
    }
}

pub(crate) fn read_assignments(facets: &FacetMap) -> &BTreeMap<SampleName, AlleleSupportMap> {
    match facets.get(&FacetKind::ReadAssignments) {
        Some(Facet::ReadAssignments(assignments)) => assignments,
        _ => panic!("bug: ReadAssignments facet not supplied"),
    }
}

pub(crate) fn pileups(facets: &FacetMap) -> &ReadMap {
    match facets.get(&FacetKind::Pileups) {
        Some(Facet::Pileups(reads)) => reads,
        _ => panic!("bug: Pileups facet not supplied"),
    }
}

pub(crate) fn reference_context(facets: &FacetMap) -> (&GenomicRegion, &[u8]) {
    match facets.get(&FacetKind::ReferenceContext) {
        Some(Facet::ReferenceContext { region, sequence }) => (region, sequence),
        _ => panic!("bug: ReferenceContext facet not supplied"),
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::cell::Cell;
use std::collections::BTreeMap;

use anyhow::Result;
use bio::stats::LogProb;

use crate::errors::Error;
use crate::likelihood::HaplotypeLikelihoodModel;
use crate::reads::ReadMap;
use crate::reference::ReferenceSource;
use crate::types::region::encompassing_region;
use crate::types::{GenomicRegion, Haplotype};
use crate::SampleName;

/// Dense table of `ln P(read | haplotype)` indexed by (sample, haplotype,
/// read). The array refers to haplotypes and reads by index only; priming on
/// a sample selects the slice subsequent lookups read from.
pub struct HaplotypeLikelihoodArray {
    samples: Vec<SampleName>,
    sample_index: BTreeMap<SampleName, usize>,
    /// likelihoods[sample][haplotype][read]
    likelihoods: Vec<Vec<Vec<LogProb>>>,
    read_counts: Vec<usize>,
    primed: Cell<Option<usize>>,
}

impl HaplotypeLikelihoodArray {
    /// Evaluate all (read, haplotype) pairs. Each haplotype is expanded so
    /// that every read plus the maximum indel extent fits into the padded
    /// sequence before the model is primed on it.
    pub fn populate<R: ReferenceSource + ?Sized>(
        reads: &ReadMap,
        haplotypes: &[Haplotype],
        model: &mut HaplotypeLikelihoodModel,
        reference: &R,
    ) -> Result<Self> {
        let samples: Vec<SampleName> = reads.keys().cloned().collect();
        let sample_index = samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        let read_counts = samples.iter().map(|s| reads[s].len()).collect();

        let reads_region = encompassing_region(reads.values().flatten().map(|r| r.region()));
        let indel_factor = haplotypes
            .iter()
            .flat_map(|h| h.alleles().iter().map(|a| a.indel_length().unsigned_abs()))
            .chain(
                reads
                    .values()
                    .flatten()
                    .map(|r| u64::from(r.max_indel_size())),
            )
            .max()
            .unwrap_or(0);

        let mut likelihoods = vec![Vec::with_capacity(haplotypes.len()); samples.len()];
        for haplotype in haplotypes {
            let expanded = expand_for_alignment(haplotype, &reads_region, indel_factor, model, reference)?;
            model.reset(expanded.sequence().to_vec(), expanded.region().begin());
            for (s, sample) in samples.iter().enumerate() {
                let row = reads[sample].iter().map(|read| model.evaluate(read)).collect();
                likelihoods[s].push(row);
            }
        }

        Ok(HaplotypeLikelihoodArray {
            samples,
            sample_index,
            likelihoods,
            read_counts,
            primed: Cell::new(None),
        })
    }

    pub fn samples(&self) -> &[SampleName] {
        &self.samples
    }

    pub fn num_haplotypes(&self) -> usize {
        self.likelihoods.first().map_or(0, |s| s.len())
    }

    pub fn read_count(&self, sample: &str) -> usize {
        self.sample_index
            .get(sample)
            .map_or(0, |&i| self.read_counts[i])
    }

    /// Select the sample subsequent lookups refer to.
    pub fn prime(&self, sample: &str) -> Result<(), Error> {
        match self.sample_index.get(sample) {
            Some(&i) => {
                self.primed.set(Some(i));
                Ok(())
            }
            None => Err(Error::UnknownSample {
                name: sample.to_owned(),
            }),
        }
    }

    pub fn unprime(&self) {
        self.primed.set(None);
    }

    /// Per-read log likelihoods of the given haplotype for the primed
    /// sample.
    pub fn read_likelihoods(&self, haplotype: usize) -> &[LogProb] {
        let sample = self
            .primed
            .get()
            .expect("bug: likelihood array not primed on any sample");
        &self.likelihoods[sample][haplotype]
    }
}

/// Expand a haplotype so reads mapped anywhere in `reads_region` can be
/// aligned against it, including `indel_factor` slack for length changes.
fn expand_for_alignment<R: ReferenceSource + ?Sized>(
    haplotype: &Haplotype,
    reads_region: &Option<GenomicRegion>,
    indel_factor: u64,
    model: &HaplotypeLikelihoodModel,
    reference: &R,
) -> Result<Haplotype> {
    let min_flank_pad = 2 * model.pad_requirement();
    let mut pad = min_flank_pad;
    if let Some(reads_region) = reads_region {
        if reads_region.contig() == haplotype.region().contig() {
            let lhs = haplotype
                .region()
                .begin()
                .saturating_sub(reads_region.begin());
            let rhs = reads_region
                .end()
                .saturating_sub(haplotype.region().end());
            pad += lhs.max(rhs);
        }
    }
    haplotype.expand(pad + indel_factor, reference)
}

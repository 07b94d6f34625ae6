// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Field-level assembly of output records. Serialization to a concrete file
//! format is the responsibility of the (external) output layer.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::calling::calls::{Call, CallType};
use crate::types::GenomicRegion;
use crate::SampleName;

/// One output record in the usual tabular layout. Positions are rendered
/// 1-based.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputRecord {
    pub chrom: String,
    pub pos: u64,
    pub id: String,
    pub ref_allele: String,
    pub alt_alleles: Vec<String>,
    pub qual: f64,
    pub filter: String,
    pub info: Vec<(String, String)>,
    pub format: Vec<String>,
    pub samples: Vec<Vec<String>>,
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{:.2}\t{}\t{}\t{}",
            self.chrom,
            self.pos + 1,
            self.id,
            self.ref_allele,
            if self.alt_alleles.is_empty() {
                ".".to_owned()
            } else {
                self.alt_alleles.join(",")
            },
            self.qual,
            self.filter,
            self.info
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{}={}", k, v)
                    }
                })
                .join(";"),
            self.format.join(":"),
        )?;
        for sample in &self.samples {
            write!(f, "\t{}", sample.join(":"))?;
        }
        Ok(())
    }
}

/// Per-sample depth annotations supplied by the driver: total depth and
/// assigned depth.
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthAnnotation {
    pub depth: usize,
    pub assigned_depth: usize,
}

/// Assemble the output record of a call. `GT` uses `|` for phased and `/`
/// for unphased genotypes; allele numbering is positional against the
/// record's REF and ALT columns.
pub fn build_record(
    call: &Call,
    samples: &[SampleName],
    depths: &BTreeMap<SampleName, DepthAnnotation>,
) -> OutputRecord {
    let (ref_allele, alt_alleles) = match call.variant() {
        Some(variant) => (
            String::from_utf8_lossy(variant.ref_sequence()).into_owned(),
            vec![String::from_utf8_lossy(variant.alt_sequence()).into_owned()],
        ),
        None => (".".to_owned(), Vec::new()),
    };

    let mut info = Vec::new();
    match call.call_type() {
        CallType::Somatic => info.push(("SOMATIC".to_owned(), String::new())),
        CallType::Denovo => info.push(("DENOVO".to_owned(), String::new())),
        CallType::Reference => info.push(("REFCALL".to_owned(), String::new())),
        _ => {}
    }
    if let Some(posterior) = call.model_posterior() {
        info.push(("PP".to_owned(), format!("{:.4}", posterior)));
    }

    let format: Vec<String> = ["GT", "GQ", "DP", "ADP"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut sample_fields = Vec::with_capacity(samples.len());
    for sample in samples {
        let fields = match call.genotypes().get(sample) {
            Some(genotype_call) => {
                let separator = if genotype_call.phase().is_some() {
                    "|"
                } else {
                    "/"
                };
                let gt = genotype_call
                    .genotype()
                    .iter()
                    .map(|allele| {
                        if call.variant().is_none() {
                            // Reference block: every called allele is the
                            // reference.
                            "0".to_owned()
                        } else if allele.sequence() == ref_allele.as_bytes() {
                            "0".to_owned()
                        } else {
                            match alt_alleles
                                .iter()
                                .position(|alt| alt.as_bytes() == allele.sequence())
                            {
                                Some(i) => (i + 1).to_string(),
                                None => ".".to_owned(),
                            }
                        }
                    })
                    .join(separator);
                let depth = depths.get(sample).copied().unwrap_or_default();
                vec![
                    gt,
                    format!("{:.0}", **genotype_call.quality()),
                    depth.depth.to_string(),
                    depth.assigned_depth.to_string(),
                ]
            }
            None => vec![".".to_owned(), ".".to_owned(), ".".to_owned(), ".".to_owned()],
        };
        sample_fields.push(fields);
    }

    OutputRecord {
        chrom: call.region().contig().to_owned(),
        pos: call.region().begin(),
        id: ".".to_owned(),
        ref_allele,
        alt_alleles,
        qual: **call.quality(),
        filter: if call.filters().is_empty() {
            "PASS".to_owned()
        } else {
            call.filters().join(";")
        },
        info,
        format,
        samples: sample_fields,
    }
}

/// The sentinel record emitted for a calling window whose worker exceeded
/// its budget or failed irrecoverably. The run continues.
pub fn window_failure_record(region: &GenomicRegion, reason: &str) -> OutputRecord {
    OutputRecord {
        chrom: region.contig().to_owned(),
        pos: region.begin(),
        id: ".".to_owned(),
        ref_allele: ".".to_owned(),
        alt_alleles: Vec::new(),
        qual: 0.0,
        filter: "FAIL".to_owned(),
        info: vec![
            ("FAILED_WINDOW".to_owned(), String::new()),
            ("REASON".to_owned(), reason.to_owned()),
            ("END".to_owned(), region.end().to_string()),
        ],
        format: Vec::new(),
        samples: Vec::new(),
    }
}

// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! End-to-end calling scenarios on in-memory references and reads.

use std::sync::Mutex;

use anyhow::Result;
use bio::stats::{LogProb, PHREDProb, Prob};

use nautilus::calling::callers::CallerKind;
use nautilus::calling::record::OutputRecord;
use nautilus::calling::scheduler::{CallingScheduler, CancellationToken};
use nautilus::config::CallerConfigBuilder;
use nautilus::reads::{
    AlignedRead, AlignedReadBuilder, CigarOp, InMemoryCandidates, InMemoryReads, ReadMap,
};
use nautilus::reference::InMemoryReference;
use nautilus::types::{GenomicRegion, Variant};

const CONTIG: &[u8] = b"ACGTACGTACCGTTACCAGGACTTGACAAACCGTTACCAGGACTT";

fn read(sample: &str, name: &str, begin: u64, sequence: &[u8]) -> AlignedRead {
    AlignedReadBuilder::default()
        .name(name.to_owned())
        .sample(sample.to_owned())
        .region(GenomicRegion::new(
            "chr1",
            begin,
            begin + sequence.len() as u64,
        ))
        .sequence(sequence.to_vec())
        .base_qualities(vec![30; sequence.len()])
        .mapping_quality(60)
        .cigar(vec![CigarOp::Match(sequence.len() as u32)])
        .build()
        .unwrap()
}

fn reads_at(sample: &str, prefix: &str, begin: u64, sequence: &[u8], count: usize) -> Vec<AlignedRead> {
    (0..count)
        .map(|i| read(sample, &format!("{}{}", prefix, i), begin, sequence))
        .collect()
}

fn run_caller(
    kind: CallerKind,
    samples: &[&str],
    reads: ReadMap,
    candidates: Vec<Variant>,
    normal_samples: Vec<String>,
) -> Vec<OutputRecord> {
    let reference = InMemoryReference::new().add_contig("chr1", CONTIG.to_vec());
    let config = CallerConfigBuilder::default()
        .normal_samples(normal_samples)
        .build()
        .unwrap();
    let samples: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
    let reads = InMemoryReads::new(reads);
    let mut candidates = InMemoryCandidates::new(candidates);
    let scheduler = CallingScheduler::new(&reference, &reads, kind, samples, config);
    let records = Mutex::new(Vec::new());
    scheduler
        .run(
            &mut candidates,
            |record: OutputRecord| -> Result<()> {
                records.lock().unwrap().push(record);
                Ok(())
            },
            &CancellationToken::new(),
        )
        .unwrap();
    records.into_inner().unwrap()
}

/// Phred round-trip: `Phred(p)` recovers `p` within 1e-12 over (1e-30, 1].
#[test]
fn test_phred_round_trip() {
    let mut p = 1.0f64;
    while p > 1e-30 {
        let phred = PHREDProb::from(Prob(p));
        let recovered = *Prob::from(phred);
        assert!(
            (recovered - p).abs() < 1e-12 * p.max(1e-12),
            "round trip failed for {}",
            p
        );
        p /= 7.3;
    }
    // And through log space.
    let log = LogProb::from(Prob(0.125));
    assert!((Prob::from(log).0 - 0.125).abs() < 1e-12);
}

/// Scenario: all reads match the reference. No variant calls; one reference
/// block per window with a homozygous reference genotype.
#[test]
fn test_homozygous_reference_scenario() {
    let mut reads = ReadMap::new();
    reads.insert(
        "s1".to_owned(),
        reads_at("s1", "ref", 5, &CONTIG[5..40], 20),
    );
    let records = run_caller(CallerKind::Individual, &["s1"], reads, Vec::new(), Vec::new());
    assert!(!records.is_empty());
    for record in &records {
        assert!(record.alt_alleles.is_empty(), "unexpected variant call");
        assert!(record
            .info
            .iter()
            .any(|(key, _)| key == "REFCALL"));
    }
    // The block is confidently homozygous reference.
    assert!(records.iter().any(|r| r.qual >= 30.0));
    for record in &records {
        assert_eq!(record.samples[0][0], "0/0");
    }
}

/// Scenario: a clean heterozygous SNV with balanced support.
#[test]
fn test_clean_het_snv_scenario() {
    let site = 20u64;
    let mut alt_window = CONTIG[10..35].to_vec();
    alt_window[(site - 10) as usize] = b'C';
    assert_ne!(CONTIG[site as usize], b'C');

    let mut reads = ReadMap::new();
    let mut sample_reads = reads_at("s1", "ref", 10, &CONTIG[10..35], 10);
    sample_reads.extend(reads_at("s1", "alt", 10, &alt_window, 10));
    reads.insert("s1".to_owned(), sample_reads);

    let candidate = Variant::new(
        GenomicRegion::new("chr1", site, site + 1),
        vec![CONTIG[site as usize]],
        b"C".to_vec(),
    );
    let records = run_caller(
        CallerKind::Individual,
        &["s1"],
        reads,
        vec![candidate],
        Vec::new(),
    );
    let variant_records: Vec<_> = records
        .iter()
        .filter(|r| !r.alt_alleles.is_empty())
        .collect();
    assert_eq!(variant_records.len(), 1);
    let record = variant_records[0];
    assert_eq!(record.pos, site);
    assert_eq!(record.alt_alleles, vec!["C".to_owned()]);
    assert_eq!(record.samples[0][0], "0/1");
    assert!(record.qual >= 40.0);
}

/// Scenario: trio de novo SNV. Parents homozygous reference, child
/// heterozygous; the call carries the DENOVO flag.
#[test]
fn test_trio_denovo_scenario() {
    let site = 20u64;
    let mut alt_window = CONTIG[10..35].to_vec();
    alt_window[(site - 10) as usize] = b'C';

    let mut reads = ReadMap::new();
    reads.insert(
        "mother".to_owned(),
        reads_at("mother", "m", 10, &CONTIG[10..35], 30),
    );
    reads.insert(
        "father".to_owned(),
        reads_at("father", "f", 10, &CONTIG[10..35], 30),
    );
    let mut child_reads = reads_at("child", "cr", 10, &CONTIG[10..35], 15);
    child_reads.extend(reads_at("child", "ca", 10, &alt_window, 15));
    reads.insert("child".to_owned(), child_reads);

    let candidate = Variant::new(
        GenomicRegion::new("chr1", site, site + 1),
        vec![CONTIG[site as usize]],
        b"C".to_vec(),
    );
    let records = run_caller(
        CallerKind::Trio(nautilus::model::trio::Trio {
            mother: "mother".to_owned(),
            father: "father".to_owned(),
            child: "child".to_owned(),
        }),
        &["child", "father", "mother"],
        reads,
        vec![candidate],
        Vec::new(),
    );
    let denovo: Vec<_> = records
        .iter()
        .filter(|r| r.info.iter().any(|(key, _)| key == "DENOVO"))
        .collect();
    assert_eq!(denovo.len(), 1);
    let record = denovo[0];
    assert_eq!(record.pos, site);
    // Sample columns are ordered: child, father, mother.
    assert_eq!(record.samples[0][0], "0/1");
    assert_eq!(record.samples[1][0], "0/0");
    assert_eq!(record.samples[2][0], "0/0");
    // Posterior of the de novo event.
    let posterior: f64 = record
        .info
        .iter()
        .find(|(key, _)| key == "PP")
        .map(|(_, value)| value.parse().unwrap())
        .unwrap();
    assert!(posterior > 0.9);
}

/// Scenario: somatic SNV at 20% VAF in the tumor, clean normal.
#[test]
fn test_somatic_scenario() {
    let site = 20u64;
    let mut alt_window = CONTIG[10..35].to_vec();
    alt_window[(site - 10) as usize] = b'C';

    let mut reads = ReadMap::new();
    reads.insert(
        "normal".to_owned(),
        reads_at("normal", "n", 10, &CONTIG[10..35], 30),
    );
    let mut tumor_reads = reads_at("tumor", "tr", 10, &CONTIG[10..35], 80);
    tumor_reads.extend(reads_at("tumor", "ta", 10, &alt_window, 20));
    reads.insert("tumor".to_owned(), tumor_reads);

    let candidate = Variant::new(
        GenomicRegion::new("chr1", site, site + 1),
        vec![CONTIG[site as usize]],
        b"C".to_vec(),
    );
    let records = run_caller(
        CallerKind::Cancer,
        &["normal", "tumor"],
        reads,
        vec![candidate],
        vec!["normal".to_owned()],
    );
    let somatic: Vec<_> = records
        .iter()
        .filter(|r| r.info.iter().any(|(key, _)| key == "SOMATIC"))
        .collect();
    assert_eq!(somatic.len(), 1);
    let record = somatic[0];
    assert_eq!(record.pos, site);
    // Tumor genotype includes the somatic alt allele; sample order is
    // normal, tumor.
    assert!(record.samples[1][0].contains('1'));
    assert!(!record.samples[0][0].contains('1'));
    let posterior: f64 = record
        .info
        .iter()
        .find(|(key, _)| key == "PP")
        .map(|(_, value)| value.parse().unwrap())
        .unwrap();
    assert!(posterior >= 0.8);
}

/// Output records arrive in (contig, position) order even with several
/// workers.
#[test]
fn test_ordered_multithreaded_output() {
    let mut reads = ReadMap::new();
    reads.insert(
        "s1".to_owned(),
        reads_at("s1", "ref", 0, &CONTIG[0..40], 8),
    );
    let reference = InMemoryReference::new().add_contig("chr1", CONTIG.to_vec());
    let config = CallerConfigBuilder::default().threads(4).build().unwrap();
    let reads = InMemoryReads::new(reads);
    let mut candidates = InMemoryCandidates::new(Vec::new());
    let scheduler = CallingScheduler::new(
        &reference,
        &reads,
        CallerKind::Individual,
        vec!["s1".to_owned()],
        config,
    )
    .window_size(10);
    let records = Mutex::new(Vec::new());
    scheduler
        .run(
            &mut candidates,
            |record: OutputRecord| -> Result<()> {
                records.lock().unwrap().push(record);
                Ok(())
            },
            &CancellationToken::new(),
        )
        .unwrap();
    let positions: Vec<u64> = records.into_inner().unwrap().iter().map(|r| r.pos).collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
    assert!(!positions.is_empty());
}

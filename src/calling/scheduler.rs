// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Coarse-grained parallel calling: the genome is partitioned into calling
//! windows, windows are dispatched to workers, and finished windows are
//! released to the output sink in genomic order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam::channel::{Receiver, Sender};

use crate::calling::callers::{make_caller, CallerKind, ConfiguredCaller};
use crate::calling::record::{window_failure_record, OutputRecord};
use crate::config::CallerConfig;
use crate::errors::Error;
use crate::reads::{CandidateSource, ReadSource};
use crate::reference::ReferenceSource;
use crate::types::{GenomicRegion, Variant};
use crate::utils::worker_pool::{worker_pool, Orderable, OrderedContainer};
use crate::SampleName;

/// Cooperative cancellation, polled between windows and inference stages.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Anything that consumes ordered output records.
pub trait OutputSink: Send {
    fn write(&mut self, record: OutputRecord) -> Result<()>;
}

impl<F: FnMut(OutputRecord) -> Result<()> + Send> OutputSink for F {
    fn write(&mut self, record: OutputRecord) -> Result<()> {
        self(record)
    }
}

struct WindowItem {
    index: usize,
    region: GenomicRegion,
    candidates: Vec<Variant>,
}

struct WindowResult {
    index: usize,
    records: Vec<OutputRecord>,
}

impl Orderable for WindowResult {
    fn index(&self) -> usize {
        self.index
    }
}

/// Runs one caller kind over the whole genome. Callers are instantiated per
/// contig so that per-contig ploidy overrides apply.
pub struct CallingScheduler<'a> {
    reference: &'a dyn ReferenceSource,
    reads: &'a dyn ReadSource,
    caller_kind: CallerKind,
    samples: Vec<SampleName>,
    config: CallerConfig,
    /// Target calling window size in bases.
    window_size: u64,
}

struct ContigCaller {
    caller: ConfiguredCaller,
    config: CallerConfig,
}

impl<'a> CallingScheduler<'a> {
    pub fn new(
        reference: &'a dyn ReferenceSource,
        reads: &'a dyn ReadSource,
        caller_kind: CallerKind,
        samples: Vec<SampleName>,
        config: CallerConfig,
    ) -> Self {
        CallingScheduler {
            reference,
            reads,
            caller_kind,
            samples,
            config,
            window_size: 1000,
        }
    }

    pub fn window_size(mut self, window_size: u64) -> Self {
        assert!(window_size > 0);
        self.window_size = window_size;
        self
    }

    /// Call every contig, writing records to the sink in (contig, position,
    /// alleles) order. Per-window failures degrade to sentinel records; only
    /// configuration and I/O errors abort the run.
    pub fn run<S: OutputSink>(
        &self,
        candidates: &mut dyn CandidateSource,
        sink: S,
        token: &CancellationToken,
    ) -> Result<()> {
        // Windows are enumerated up front; candidate generation is cheap
        // compared to inference. One caller per contig, so that per-contig
        // ploidies apply.
        let mut items = Vec::new();
        let mut callers = std::collections::BTreeMap::new();
        for contig in self.reference.contigs() {
            let size = self.reference.contig_size(&contig).ok_or(Error::UnknownContig {
                contig: contig.clone(),
            })?;
            let mut contig_config = self.config.clone();
            contig_config.ploidy = self.config.contig_ploidy(&contig);
            callers.insert(
                contig.clone(),
                ContigCaller {
                    caller: make_caller(self.caller_kind.clone(), &contig_config, &self.samples)?,
                    config: contig_config,
                },
            );
            let mut begin = 0u64;
            while begin < size {
                let end = (begin + self.window_size).min(size);
                let region = GenomicRegion::new(contig.clone(), begin, end);
                let window_candidates = candidates.generate(&region)?;
                items.push(WindowItem {
                    index: items.len(),
                    region,
                    candidates: window_candidates,
                });
                begin = end;
            }
        }

        let sink = Mutex::new(sink);
        let timeout = self.config.window_timeout_secs.map(Duration::from_secs);

        let preprocessor = |sender: Sender<WindowItem>| -> Result<()> {
            for item in items {
                if token.is_cancelled() {
                    info!("calling cancelled; stopping window dispatch");
                    break;
                }
                if sender.send(item).is_err() {
                    break;
                }
            }
            Ok(())
        };

        let num_workers = self.config.threads;
        let workers = (0..num_workers).map(|_| {
            |receiver: Receiver<WindowItem>, sender: Sender<WindowResult>| -> Result<()> {
                for item in receiver {
                    if token.is_cancelled() {
                        break;
                    }
                    let contig_caller = &callers[item.region.contig()];
                    let result = self.call_window(contig_caller, &item, timeout);
                    if sender.send(result).is_err() {
                        break;
                    }
                }
                Ok(())
            }
        });

        let postprocessor = |receiver: Receiver<WindowResult>| -> Result<()> {
            let mut buffered = OrderedContainer::default();
            let mut processed = 0usize;
            for result in receiver {
                buffered.insert(result);
                for released in buffered.remove_continuous_prefix() {
                    let mut sink = sink.lock().unwrap();
                    for record in released.records {
                        sink.write(record)?;
                    }
                    processed += 1;
                    if processed % 100 == 0 {
                        info!("{} windows processed", processed);
                    }
                }
            }
            // On cancellation some windows never arrive; flush what is
            // ordered and stop.
            Ok(())
        };

        // The read buffer budget bounds how many windows are in flight at
        // once (assuming a generous per-window footprint).
        let buffered_windows =
            (self.config.target_read_buffer_size / (8 << 20)).max(num_workers * 2);
        worker_pool(preprocessor, workers, postprocessor, buffered_windows, buffered_windows)
    }

    fn call_window(
        &self,
        contig_caller: &ContigCaller,
        item: &WindowItem,
        timeout: Option<Duration>,
    ) -> WindowResult {
        let deadline = timeout.map(|t| Instant::now() + t);
        let reads = match self.reads.fetch_reads(&self.samples, &item.region) {
            Ok(reads) => reads,
            Err(error) => {
                warn!("window {} failed to fetch reads: {}", item.region, error);
                return WindowResult {
                    index: item.index,
                    records: vec![window_failure_record(&item.region, "read_fetch_failed")],
                };
            }
        };
        match contig_caller.caller.call_region(
            &item.region,
            &item.candidates,
            &reads,
            self.reference,
            &contig_caller.config,
            deadline,
        ) {
            Ok(window) => WindowResult {
                index: item.index,
                records: window.records(&self.samples, &reads),
            },
            Err(error) => {
                // Per-region failures never propagate to the scheduler.
                warn!("window {} failed: {}", item.region, error);
                let reason = match error.downcast_ref::<Error>() {
                    Some(Error::WindowTimeout { .. }) => "timeout",
                    Some(Error::TooManyHaplotypes { .. }) => "too_many_haplotypes",
                    Some(Error::NotConverged { .. }) => "not_converged",
                    _ => "inference_error",
                };
                WindowResult {
                    index: item.index,
                    records: vec![window_failure_record(&item.region, reason)],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::CONTIG;
    use crate::reads::tests::read;
    use crate::reads::{InMemoryCandidates, InMemoryReads, ReadMap};
    use crate::reference::InMemoryReference;

    fn setup() -> (InMemoryReference, InMemoryReads, InMemoryCandidates) {
        let reference = InMemoryReference::new().add_contig("1", CONTIG.to_vec());
        let mut alt_window = CONTIG[12..28].to_vec();
        alt_window[8] = b'T';
        let mut reads = ReadMap::new();
        let mut sample_reads = Vec::new();
        for i in 0..10 {
            sample_reads.push(read(
                "s1",
                &format!("ref{}", i),
                GenomicRegion::new("1", 12, 28),
                &CONTIG[12..28],
            ));
            sample_reads.push(read(
                "s1",
                &format!("alt{}", i),
                GenomicRegion::new("1", 12, 28),
                &alt_window,
            ));
        }
        reads.insert("s1".to_owned(), sample_reads);
        let candidates = InMemoryCandidates::new(vec![Variant::new(
            GenomicRegion::new("1", 20, 21),
            b"A".to_vec(),
            b"T".to_vec(),
        )]);
        (reference, InMemoryReads::new(reads), candidates)
    }

    #[test]
    fn test_end_to_end_ordered_output() {
        let (reference, reads, mut candidates) = setup();
        let scheduler = CallingScheduler::new(
            &reference,
            &reads,
            CallerKind::Individual,
            vec!["s1".to_owned()],
            CallerConfig::default(),
        )
        .window_size(20);
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
        let records = records.into_inner().unwrap();
        assert!(!records.is_empty());
        // Records are ordered by position.
        let positions: Vec<u64> = records.iter().map(|r| r.pos).collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        assert_eq!(positions, sorted);
        // The het SNV is called.
        assert!(records
            .iter()
            .any(|r| r.pos == 20 && r.alt_alleles == vec!["T".to_owned()]));
    }

    #[test]
    fn test_multithreaded_matches_single_threaded() {
        let (reference, reads, mut candidates) = setup();
        let mut collect = |threads: usize| {
            let mut config = CallerConfig::default();
            config.threads = threads;
            let scheduler = CallingScheduler::new(
                &reference,
                &reads,
                CallerKind::Individual,
                vec!["s1".to_owned()],
                config,
            )
            .window_size(15);
            let records = Mutex::new(Vec::new());
            scheduler
                .run(
                    &mut candidates,
                    |record: OutputRecord| {
                        records.lock().unwrap().push(record);
                        Ok(())
                    },
                    &CancellationToken::new(),
                )
                .unwrap();
            records.into_inner().unwrap()
        };
        let single = collect(1);
        let multi = collect(4);
        assert_eq!(single, multi);
    }

    #[test]
    fn test_cancellation_stops_early() {
        let (reference, reads, mut candidates) = setup();
        let scheduler = CallingScheduler::new(
            &reference,
            &reads,
            CallerKind::Individual,
            vec!["s1".to_owned()],
            CallerConfig::default(),
        );
        let token = CancellationToken::new();
        token.cancel();
        scheduler
            .run(
                &mut candidates,
                |_record: OutputRecord| -> Result<()> { Ok(()) },
                &token,
            )
            .unwrap();
    }
}

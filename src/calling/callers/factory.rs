// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::time::Instant;

use anyhow::Result;

use crate::calling::callers::cancer::{CancerCaller, CancerCallerParams};
use crate::calling::callers::cell::{CellCaller, CellCallerParams};
use crate::calling::callers::individual::{IndividualCaller, IndividualCallerParams};
use crate::calling::callers::population::{PopulationCaller, PopulationCallerParams};
use crate::calling::callers::trio::{TrioCaller, TrioCallerParams};
use crate::calling::callers::{call_region, CalledWindow, Caller};
use crate::config::CallerConfig;
use crate::errors::Error;
use crate::model::denovo::DeNovoModelParams;
use crate::model::priors::CoalescentParams;
use crate::model::trio::Trio;
use crate::reads::ReadMap;
use crate::reference::ReferenceSource;
use crate::types::{GenomicRegion, Variant};
use crate::SampleName;

/// Which caller to build for a run.
#[derive(Clone, Debug)]
pub enum CallerKind {
    Individual,
    Population,
    Trio(Trio),
    Cancer,
    Cell,
}

/// A fully configured caller, dispatching to the concrete implementation.
pub enum ConfiguredCaller {
    Individual(IndividualCaller),
    Population(PopulationCaller),
    Trio(TrioCaller),
    Cancer(CancerCaller),
    Cell(CellCaller),
}

impl ConfiguredCaller {
    pub fn name(&self) -> &str {
        match self {
            ConfiguredCaller::Individual(caller) => caller.name(),
            ConfiguredCaller::Population(caller) => caller.name(),
            ConfiguredCaller::Trio(caller) => caller.name(),
            ConfiguredCaller::Cancer(caller) => caller.name(),
            ConfiguredCaller::Cell(caller) => caller.name(),
        }
    }

    pub fn call_region<R: ReferenceSource + ?Sized>(
        &self,
        region: &GenomicRegion,
        candidates: &[Variant],
        reads: &ReadMap,
        reference: &R,
        config: &CallerConfig,
        deadline: Option<Instant>,
    ) -> Result<CalledWindow> {
        match self {
            ConfiguredCaller::Individual(caller) => {
                call_region(caller, region, candidates, reads, reference, config, deadline)
            }
            ConfiguredCaller::Population(caller) => {
                call_region(caller, region, candidates, reads, reference, config, deadline)
            }
            ConfiguredCaller::Trio(caller) => {
                call_region(caller, region, candidates, reads, reference, config, deadline)
            }
            ConfiguredCaller::Cancer(caller) => {
                call_region(caller, region, candidates, reads, reference, config, deadline)
            }
            ConfiguredCaller::Cell(caller) => {
                call_region(caller, region, candidates, reads, reference, config, deadline)
            }
        }
    }
}

/// Map a validated configuration onto a concrete caller.
pub fn make_caller(
    kind: CallerKind,
    config: &CallerConfig,
    samples: &[SampleName],
) -> Result<ConfiguredCaller, Error> {
    config.validate(samples)?;
    let prior = CoalescentParams {
        snp_heterozygosity: (config.mutation_rate * 100.0).min(0.5),
        indel_heterozygosity: config.indel_heterozygosity,
    };
    let mutation = DeNovoModelParams {
        mutation_rate: config.mutation_rate,
    };
    Ok(match kind {
        CallerKind::Individual => {
            if samples.len() != 1 {
                return Err(Error::TooFewSamples {
                    caller: "individual".to_owned(),
                    min: 1,
                    got: samples.len(),
                });
            }
            ConfiguredCaller::Individual(IndividualCaller::new(IndividualCallerParams {
                ploidy: config.ploidy,
                prior,
                min_variant_posterior: config.min_variant_posterior,
                min_refcall_posterior: config.min_refcall_posterior,
                max_genotypes: config.max_genotypes,
            }))
        }
        CallerKind::Population => {
            ConfiguredCaller::Population(PopulationCaller::new(PopulationCallerParams {
                ploidy: config.ploidy,
                prior,
                min_variant_posterior: config.min_variant_posterior,
                min_refcall_posterior: config.min_refcall_posterior,
                max_genotypes: config.max_genotypes,
            }))
        }
        CallerKind::Trio(trio) => {
            for member in [&trio.mother, &trio.father, &trio.child] {
                if !samples.contains(member) {
                    return Err(Error::UnknownSample {
                        name: member.clone(),
                    });
                }
            }
            if config.ploidy != 2 {
                return Err(Error::IncompatibleOptions {
                    msg: format!("the trio caller is diploid, got ploidy {}", config.ploidy),
                });
            }
            ConfiguredCaller::Trio(TrioCaller::new(
                TrioCallerParams {
                    prior,
                    mutation,
                    min_variant_posterior: config.min_variant_posterior,
                    min_refcall_posterior: config.min_refcall_posterior,
                    max_genotypes: config.max_genotypes,
                    max_joint_genotypes: config.max_joint_genotypes,
                },
                trio,
            ))
        }
        CallerKind::Cancer => ConfiguredCaller::Cancer(CancerCaller::new(CancerCallerParams {
            ploidy: config.ploidy,
            prior,
            mutation,
            min_variant_posterior: config.min_variant_posterior,
            min_refcall_posterior: config.min_refcall_posterior,
            max_genotypes: config.max_genotypes,
            max_vb_seeds: config.max_vb_seeds,
            normal_samples: config.normal_samples.clone(),
        })),
        CallerKind::Cell => {
            if samples.is_empty() {
                return Err(Error::TooFewSamples {
                    caller: "cell".to_owned(),
                    min: 1,
                    got: 0,
                });
            }
            ConfiguredCaller::Cell(CellCaller::new(CellCallerParams {
                ploidy: config.ploidy,
                prior,
                min_variant_posterior: config.min_variant_posterior,
                min_refcall_posterior: config.min_refcall_posterior,
                max_genotypes: config.max_genotypes,
                max_clones: config.max_clones,
                max_vb_seeds: config.max_vb_seeds,
                dropout_concentration: config.dropout_concentration,
                normal_samples: config.normal_samples.clone(),
            }))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_validates() {
        let config = CallerConfig::default();
        assert!(make_caller(CallerKind::Individual, &config, &["s".to_owned()]).is_ok());
        assert!(make_caller(CallerKind::Individual, &config, &[]).is_err());
        assert!(make_caller(
            CallerKind::Trio(Trio {
                mother: "m".to_owned(),
                father: "f".to_owned(),
                child: "c".to_owned()
            }),
            &config,
            &["m".to_owned(), "f".to_owned()],
        )
        .is_err());
        assert!(make_caller(CallerKind::Cell, &config, &[]).is_err());
    }

    #[test]
    fn test_caller_names() {
        let config = CallerConfig::default();
        let samples = vec!["s".to_owned()];
        assert_eq!(
            make_caller(CallerKind::Individual, &config, &samples)
                .unwrap()
                .name(),
            "individual"
        );
        assert_eq!(
            make_caller(CallerKind::Cancer, &config, &samples)
                .unwrap()
                .name(),
            "cancer"
        );
    }
}

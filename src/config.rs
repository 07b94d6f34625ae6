// Copyright 2021 Nautilus developers.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

use std::collections::BTreeMap;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::assignment::{AmbiguousAction, AmbiguousRecord};
use crate::errors::Error;
use crate::SampleName;

/// The calling configuration surface. Thresholds are phred-scaled
/// probabilities of the call NOT holding, as usual for variant callers.
#[derive(Clone, Debug, Builder, Serialize, Deserialize)]
#[builder(pattern = "owned")]
pub struct CallerConfig {
    #[builder(default = "2")]
    pub ploidy: u32,
    /// Per-contig ploidy overrides (e.g. Y: 1).
    #[builder(default)]
    pub contig_ploidies: BTreeMap<String, u32>,
    #[builder(default = "2.0")]
    pub min_variant_posterior: f64,
    #[builder(default = "2.0")]
    pub min_refcall_posterior: f64,
    #[builder(default = "200")]
    pub max_haplotypes: usize,
    #[builder(default = "10000")]
    pub max_genotypes: usize,
    #[builder(default = "1000000")]
    pub max_joint_genotypes: usize,
    #[builder(default = "3")]
    pub max_clones: u32,
    #[builder(default = "12")]
    pub max_vb_seeds: usize,
    #[builder(default = "0.2")]
    pub dropout_concentration: f64,
    #[builder(default = "1e-5")]
    pub mutation_rate: f64,
    #[builder(default = "1e-4")]
    pub indel_heterozygosity: f64,
    #[builder(default = "false")]
    pub deduplicate_haplotypes_with_prior_model: bool,
    #[builder(default)]
    pub normal_samples: Vec<SampleName>,
    #[builder(default)]
    pub ambiguous_action: AmbiguousAction,
    #[builder(default)]
    pub ambiguous_record: AmbiguousRecord,
    #[builder(default = "1")]
    pub threads: usize,
    #[builder(default = "64 * 1024 * 1024")]
    pub target_read_buffer_size: usize,
    /// Wall-clock budget per calling window in seconds; `None` disables the
    /// deadline.
    #[builder(default)]
    pub window_timeout_secs: Option<u64>,
}

impl Default for CallerConfig {
    fn default() -> Self {
        CallerConfigBuilder::default().build().unwrap()
    }
}

impl CallerConfig {
    pub fn validate(&self, samples: &[SampleName]) -> Result<(), Error> {
        if self.ploidy == 0 {
            return Err(Error::InvalidPloidy { ploidy: 0 });
        }
        if let Some((contig, &ploidy)) = self.contig_ploidies.iter().find(|(_, &p)| p == 0) {
            let _ = contig;
            return Err(Error::InvalidPloidy { ploidy });
        }
        if self.threads == 0 {
            return Err(Error::InvalidThreadCount { count: 0 });
        }
        if !(self.mutation_rate > 0.0 && self.mutation_rate < 1.0) {
            return Err(Error::InvalidMutationRate {
                value: self.mutation_rate,
            });
        }
        if self.dropout_concentration <= 0.0 {
            return Err(Error::InvalidDropoutConcentration {
                value: self.dropout_concentration,
            });
        }
        for normal in &self.normal_samples {
            if !samples.contains(normal) {
                return Err(Error::InvalidNormalSample {
                    name: normal.clone(),
                });
            }
        }
        Ok(())
    }

    /// The genotype size to call on the given contig.
    pub fn contig_ploidy(&self, contig: &str) -> u32 {
        self.contig_ploidies
            .get(contig)
            .copied()
            .unwrap_or(self.ploidy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = CallerConfig::default();
        config.validate(&["s1".to_owned()]).unwrap();
        assert_eq!(config.contig_ploidy("1"), 2);
    }

    #[test]
    fn test_contig_ploidy_override() {
        let config = CallerConfigBuilder::default()
            .contig_ploidies([("Y".to_owned(), 1)].into_iter().collect())
            .build()
            .unwrap();
        assert_eq!(config.contig_ploidy("Y"), 1);
        assert_eq!(config.contig_ploidy("1"), 2);
    }

    #[test]
    fn test_rejects_unknown_normal_sample() {
        let config = CallerConfigBuilder::default()
            .normal_samples(vec!["normal".to_owned()])
            .build()
            .unwrap();
        assert_eq!(
            config.validate(&["tumor".to_owned()]),
            Err(Error::InvalidNormalSample {
                name: "normal".to_owned()
            })
        );
    }

    #[test]
    fn test_rejects_zero_ploidy() {
        let config = CallerConfigBuilder::default().ploidy(0).build().unwrap();
        assert!(config.validate(&[]).is_err());
    }
}

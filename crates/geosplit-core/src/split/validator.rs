/// Advisory comparison of empirical split composition against targets.
/// Never touches the assignment; a failing check is a warning, not an error.

use serde::Serialize;

use super::{Split, SplitStatistics};
use crate::config::SplitConfig;
use crate::error::ConfigError;

/// One split's target vs. actual.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitCheck {
    pub split: Split,
    pub samples: usize,
    pub target_pct: f64,
    pub actual_pct: f64,
    /// |actual - target| in percentage points.
    pub deviation_pct: f64,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitValidationReport {
    pub total_samples: usize,
    pub tolerance_pct: f64,
    /// No samples at all. Every check passes vacuously.
    pub empty: bool,
    pub passed: bool,
    pub checks: Vec<SplitCheck>,
}

impl SplitValidationReport {
    pub fn failing(&self) -> impl Iterator<Item = &SplitCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// One-line human summary, e.g. `train 72.0% (target 70.0%), ...`.
    pub fn describe(&self) -> String {
        self.checks
            .iter()
            .map(|c| format!("{} {:.1}% (target {:.1}%)", c.split, c.actual_pct, c.target_pct))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SplitValidator {
    tolerance_pct: f64,
}

impl SplitValidator {
    pub fn new(tolerance_pct: f64) -> Result<Self, ConfigError> {
        if !(tolerance_pct.is_finite() && tolerance_pct >= 0.0) {
            return Err(ConfigError::InvalidTolerance(tolerance_pct));
        }
        Ok(Self { tolerance_pct })
    }

    pub fn tolerance_pct(&self) -> f64 {
        self.tolerance_pct
    }

    pub fn validate(
        &self,
        statistics: &SplitStatistics,
        config: &SplitConfig,
    ) -> SplitValidationReport {
        let empty = statistics.total_samples == 0;
        let checks: Vec<SplitCheck> = Split::ALL
            .iter()
            .map(|&split| {
                let tally = statistics.tally(split);
                let target_pct = config.target(split);
                let deviation_pct = (tally.percentage - target_pct).abs();
                SplitCheck {
                    split,
                    samples: tally.samples,
                    target_pct,
                    actual_pct: tally.percentage,
                    deviation_pct,
                    passed: empty || deviation_pct <= self.tolerance_pct,
                }
            })
            .collect();

        SplitValidationReport {
            total_samples: statistics.total_samples,
            tolerance_pct: self.tolerance_pct,
            empty,
            passed: checks.iter().all(|c| c.passed),
            checks,
        }
    }
}

//! Monte Carlo engine
//!
//! Trials are independent: trial `i` draws from its own RNG derived from
//! `(seed, i)`, so the rayon split does not affect the result.

use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::time::Instant;
use tracing::debug;

use crate::config::SimulationConfig;
use crate::sampling::{SeedStream, VariantSampler};
use crate::types::{ConfidenceInterval, DesignVariant, SimulationResult};

use super::SimulationError;

/// z for a 95% two-sided interval, used if the quantile cannot be computed.
const Z_95: f64 = 1.959_963_984_540_054;

#[derive(Debug, Clone)]
pub struct SimulationEngine {
    config: SimulationConfig,
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self {
            config: SimulationConfig::default(),
        }
    }
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.risk_bands.check()?;
        if !(config.confidence_level > 0.0 && config.confidence_level < 1.0) {
            return Err(SimulationError::InvalidConfidenceLevel(config.confidence_level));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// `simulate` with the configured trial count and failure threshold.
    pub fn simulate_default(
        &self,
        variant: &DesignVariant,
        seed: u64,
    ) -> Result<SimulationResult, SimulationError> {
        self.simulate(variant, self.config.trials, self.config.failure_threshold, seed)
    }

    /// Run `trials` independent trials of `variant` and summarise them.
    ///
    /// Every distribution is validated before the first trial. Blocks until
    /// all trials finish; call through `spawn_blocking` from async code.
    pub fn simulate(
        &self,
        variant: &DesignVariant,
        trials: usize,
        failure_threshold: f64,
        seed: u64,
    ) -> Result<SimulationResult, SimulationError> {
        if trials == 0 {
            return Err(SimulationError::InvalidTrialCount(trials));
        }
        if !failure_threshold.is_finite() {
            return Err(SimulationError::InvalidFailureThreshold(failure_threshold));
        }
        let sampler = VariantSampler::new(variant)?;

        let start = Instant::now();
        let stream = SeedStream::new(seed);
        // One value buffer per rayon worker split, reused across its trials
        let factors: Vec<f64> = (0..trials)
            .into_par_iter()
            .map_init(
                || Vec::with_capacity(variant.parameters().len()),
                |values, i| {
                    let mut rng = stream.rng_for(i as u64);
                    sampler.safety_factor_into(variant, &mut rng, values)
                },
            )
            .collect();

        let failures = factors
            .iter()
            .filter(|sf| !sf.is_finite() || **sf < failure_threshold)
            .count();
        let marginal = factors
            .iter()
            .filter(|sf| **sf >= failure_threshold && **sf < self.config.target_safety_factor)
            .count();

        let finite: Vec<f64> = factors.into_iter().filter(|sf| sf.is_finite()).collect();
        let stats = SummaryStats::from_samples(finite);

        let n = trials as f64;
        let probability_of_failure = failures as f64 / n;
        let risk_band = self.config.risk_bands.classify(probability_of_failure);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(
            variant = %variant.id(),
            trials,
            pf = probability_of_failure,
            band = %risk_band,
            elapsed_ms,
            "Simulation complete"
        );

        Ok(SimulationResult {
            variant_id: variant.id().to_string(),
            trials,
            seed,
            failure_threshold,
            mean_safety_factor: stats.mean,
            std_dev_safety_factor: stats.std_dev,
            p5_safety_factor: stats.p5,
            p95_safety_factor: stats.p95,
            min_safety_factor: stats.min,
            max_safety_factor: stats.max,
            failures,
            probability_of_failure,
            probability_marginal: marginal as f64 / n,
            confidence_interval: wilson_interval(failures, trials, self.config.confidence_level),
            risk_band,
            elapsed_ms,
        })
    }
}

struct SummaryStats {
    mean: f64,
    std_dev: f64,
    p5: f64,
    p95: f64,
    min: f64,
    max: f64,
}

impl SummaryStats {
    fn from_samples(samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self {
                mean: f64::NAN,
                std_dev: f64::NAN,
                p5: f64::NAN,
                p95: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }

        let mean = samples.iter().mean();
        // sample std dev is undefined for a single trial
        let std_dev = if samples.len() > 1 { samples.iter().std_dev() } else { 0.0 };
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut data = Data::new(samples);
        Self {
            mean,
            std_dev,
            p5: data.quantile(0.05),
            p95: data.quantile(0.95),
            min,
            max,
        }
    }
}

/// Wilson score interval for `failures` out of `trials` at `level` confidence.
pub fn wilson_interval(failures: usize, trials: usize, level: f64) -> ConfidenceInterval {
    if trials == 0 {
        return ConfidenceInterval { level, lower: 0.0, upper: 1.0 };
    }

    let z = Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(1.0 - (1.0 - level) / 2.0))
        .unwrap_or(Z_95);
    let n = trials as f64;
    let p = failures as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let centre = (p + z2 / (2.0 * n)) / denom;
    let half = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;

    ConfidenceInterval {
        level,
        lower: (centre - half).max(0.0),
        upper: (centre + half).min(1.0),
    }
}

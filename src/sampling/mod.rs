//! Statistical sampling utility
//!
//! Turns a [`ParameterSpec`] into a validated sampler and draws reproducible
//! variates from it. [`SeedStream`] hands each Monte Carlo trial its own RNG
//! derived from `(seed, trial index)`, so parallel runs give the same result
//! regardless of how trials land on threads.

use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, Normal, Triangular};
use thiserror::Error;

use crate::types::{DesignVariant, ParameterDistribution, ParameterSpec, SimulationRun};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SamplingError {
    #[error("invalid {kind} parameters for '{parameter}': {reason}")]
    InvalidDistributionParameters {
        parameter: String,
        kind: &'static str,
        reason: String,
    },
}

impl SamplingError {
    fn invalid(spec: &ParameterSpec, reason: impl Into<String>) -> Self {
        SamplingError::InvalidDistributionParameters {
            parameter: spec.name.clone(),
            kind: spec.distribution.kind_name(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Single-parameter sampler
// ============================================================================

/// A validated distribution, ready to sample.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    Normal(Normal<f64>),
    Lognormal(LogNormal<f64>),
    Uniform(Uniform<f64>),
    Triangular(Triangular<f64>),
}

impl Sampler {
    pub fn new(spec: &ParameterSpec) -> Result<Self, SamplingError> {
        match spec.distribution {
            ParameterDistribution::Normal { mean, std_dev } => {
                if !mean.is_finite() || !std_dev.is_finite() {
                    return Err(SamplingError::invalid(spec, "parameters must be finite"));
                }
                if std_dev < 0.0 {
                    return Err(SamplingError::invalid(spec, format!("std_dev {std_dev} < 0")));
                }
                Normal::new(mean, std_dev)
                    .map(Sampler::Normal)
                    .map_err(|e| SamplingError::invalid(spec, e.to_string()))
            }
            ParameterDistribution::Lognormal { mean, std_dev } => {
                if !mean.is_finite() || !std_dev.is_finite() {
                    return Err(SamplingError::invalid(spec, "parameters must be finite"));
                }
                if mean <= 0.0 {
                    return Err(SamplingError::invalid(spec, format!("mean {mean} must be > 0")));
                }
                if std_dev < 0.0 {
                    return Err(SamplingError::invalid(spec, format!("std_dev {std_dev} < 0")));
                }
                let (mu, sigma) = lognormal_parameters(mean, std_dev);
                LogNormal::new(mu, sigma)
                    .map(Sampler::Lognormal)
                    .map_err(|e| SamplingError::invalid(spec, e.to_string()))
            }
            ParameterDistribution::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() {
                    return Err(SamplingError::invalid(spec, "bounds must be finite"));
                }
                if min > max {
                    return Err(SamplingError::invalid(spec, format!("min {min} > max {max}")));
                }
                Ok(Sampler::Uniform(Uniform::new_inclusive(min, max)))
            }
            ParameterDistribution::Triangular { min, mode, max } => {
                if !min.is_finite() || !mode.is_finite() || !max.is_finite() {
                    return Err(SamplingError::invalid(spec, "parameters must be finite"));
                }
                if min > max {
                    return Err(SamplingError::invalid(spec, format!("min {min} > max {max}")));
                }
                if mode < min || mode > max {
                    return Err(SamplingError::invalid(
                        spec,
                        format!("mode {mode} outside [{min}, {max}]"),
                    ));
                }
                Triangular::new(min, max, mode)
                    .map(Sampler::Triangular)
                    .map_err(|e| SamplingError::invalid(spec, e.to_string()))
            }
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Sampler::Normal(d) => d.sample(rng),
            Sampler::Lognormal(d) => d.sample(rng),
            Sampler::Uniform(d) => d.sample(rng),
            Sampler::Triangular(d) => d.sample(rng),
        }
    }
}

/// Underlying normal `(mu, sigma)` for a lognormal with the given arithmetic mean and sd.
pub fn lognormal_parameters(mean: f64, std_dev: f64) -> (f64, f64) {
    let cv = std_dev / mean;
    let sigma_sq = (1.0 + cv * cv).ln();
    (mean.ln() - sigma_sq / 2.0, sigma_sq.sqrt())
}

/// Draw one value for `spec`.
pub fn sample_one<R: Rng + ?Sized>(spec: &ParameterSpec, rng: &mut R) -> Result<f64, SamplingError> {
    Ok(Sampler::new(spec)?.sample(rng))
}

// ============================================================================
// Whole-variant sampler
// ============================================================================

/// Samplers for every parameter of a variant, validated up front.
#[derive(Debug, Clone)]
pub struct VariantSampler {
    samplers: Vec<Sampler>,
}

impl VariantSampler {
    /// Fails on the first parameter whose distribution is invalid.
    pub fn new(variant: &DesignVariant) -> Result<Self, SamplingError> {
        let samplers = variant
            .parameters()
            .iter()
            .map(Sampler::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { samplers })
    }

    /// One trial: sample every parameter independently, then apply the formula.
    pub fn run<R: Rng + ?Sized>(&self, variant: &DesignVariant, rng: &mut R) -> SimulationRun {
        let mut values = Vec::with_capacity(self.samplers.len());
        let safety_factor = self.safety_factor_into(variant, rng, &mut values);
        SimulationRun { values, safety_factor }
    }

    /// Same draws as [`run`](Self::run), written into a caller-owned buffer
    /// that is cleared first. Returns only the safety factor.
    pub fn safety_factor_into<R: Rng + ?Sized>(
        &self,
        variant: &DesignVariant,
        rng: &mut R,
        values: &mut Vec<f64>,
    ) -> f64 {
        values.clear();
        values.extend(self.samplers.iter().map(|s| s.sample(rng)));
        variant.safety_factor(values)
    }
}

// ============================================================================
// Seed stream
// ============================================================================

/// Deterministic source of independent per-trial RNGs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedStream {
    seed: u64,
}

impl SeedStream {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// RNG for trial `index`. Same `(seed, index)` always gives the same stream.
    pub fn rng_for(&self, index: u64) -> StdRng {
        StdRng::seed_from_u64(splitmix64(self.seed ^ splitmix64(index)))
    }

    /// Child stream for a labelled sub-computation (e.g. one recalibration case).
    pub fn derive(&self, label: u64) -> SeedStream {
        SeedStream::new(splitmix64(self.seed.wrapping_add(splitmix64(label))))
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

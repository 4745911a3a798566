//! Monte Carlo Simulation Engine
//!
//! Estimates a design variant's probability of failure by sampling its
//! uncertain parameters N times and evaluating the safety formula on each
//! realization. The result is classified into a [`RiskBand`](crate::types::RiskBand)
//! using the configured probability cut-points.

mod bands;
mod engine;

pub use engine::{wilson_interval, SimulationEngine};

use thiserror::Error;

use crate::sampling::SamplingError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error("trial count must be >= 1, got {0}")]
    InvalidTrialCount(usize),
    #[error("failure threshold must be finite, got {0}")]
    InvalidFailureThreshold(f64),
    #[error("risk band cut-points must satisfy 0 <= safe ({safe_max_pf}) < marginal ({marginal_max_pf}) <= 1")]
    InvalidRiskBands { safe_max_pf: f64, marginal_max_pf: f64 },
    #[error("confidence level must be in (0, 1), got {0}")]
    InvalidConfidenceLevel(f64),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
}

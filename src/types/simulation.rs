//! Monte Carlo outputs

use serde::{Deserialize, Serialize};

/// Risk classification of a probability of failure.
///
/// Ordered from best to worst so bands can be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Safe,
    Marginal,
    Critical,
}

impl std::fmt::Display for RiskBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskBand::Safe => write!(f, "SAFE"),
            RiskBand::Marginal => write!(f, "MARGINAL"),
            RiskBand::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One trial: the realized parameter vector and the resulting safety factor.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRun {
    pub values: Vec<f64>,
    pub safety_factor: f64,
}

impl SimulationRun {
    /// Trials with an undefined safety factor count as failures.
    pub fn is_failure(&self, failure_threshold: f64) -> bool {
        !self.safety_factor.is_finite() || self.safety_factor < failure_threshold
    }
}

/// Aggregate risk profile of one variant.
///
/// Summary statistics cover the trials with a finite safety factor; they are
/// NaN when no trial produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub variant_id: String,
    pub trials: usize,
    pub seed: u64,
    pub failure_threshold: f64,
    pub mean_safety_factor: f64,
    pub std_dev_safety_factor: f64,
    pub p5_safety_factor: f64,
    pub p95_safety_factor: f64,
    pub min_safety_factor: f64,
    pub max_safety_factor: f64,
    /// Trials with SF below the failure threshold (or undefined)
    pub failures: usize,
    pub probability_of_failure: f64,
    /// Fraction of trials with `failure_threshold <= SF < target_safety_factor`
    pub probability_marginal: f64,
    pub confidence_interval: ConfidenceInterval,
    pub risk_band: RiskBand,
    pub elapsed_ms: u64,
}

impl SimulationResult {
    pub fn summary(&self) -> String {
        format!(
            "{}: Pf={:.4} ({}), mean SF={:.3}, N={}",
            self.variant_id,
            self.probability_of_failure,
            self.risk_band,
            self.mean_safety_factor,
            self.trials
        )
    }
}

/// Two-sided Wilson score interval on the probability of failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
}

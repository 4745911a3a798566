//! Acceptance rule for a paired evaluation

use serde::{Deserialize, Serialize};

use crate::config::RecalibrationConfig;
use crate::types::{RiskBand, SimulationResult};

/// Why a candidate was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Candidate pf exceeds the original pf plus the slack
    ProbabilityWorse { original: f64, candidate: f64, slack: f64 },
    /// Candidate lands in a worse band than the original
    BandWorse { original: RiskBand, candidate: RiskBand },
    /// Candidate band is above the configured acceptance ceiling
    BandNotAcceptable { candidate: RiskBand, limit: RiskBand },
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::ProbabilityWorse { original, candidate, slack } => write!(
                f,
                "candidate Pf {candidate:.4} exceeds original Pf {original:.4} + slack {slack:.4}"
            ),
            RejectionReason::BandWorse { original, candidate } => {
                write!(f, "candidate band {candidate} is worse than original band {original}")
            }
            RejectionReason::BandNotAcceptable { candidate, limit } => {
                write!(f, "candidate band {candidate} is above the acceptance limit {limit}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Rejected(RejectionReason),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Judge `after` (candidate) against `before` (original).
///
/// Accepted iff pf does not worsen beyond the slack, the band does not
/// worsen, and the candidate band is within `max_accepted_band`.
pub fn evaluate(
    before: &SimulationResult,
    after: &SimulationResult,
    config: &RecalibrationConfig,
) -> Verdict {
    let slack = config.acceptance_slack;
    if after.probability_of_failure > before.probability_of_failure + slack {
        return Verdict::Rejected(RejectionReason::ProbabilityWorse {
            original: before.probability_of_failure,
            candidate: after.probability_of_failure,
            slack,
        });
    }
    if after.risk_band > before.risk_band {
        return Verdict::Rejected(RejectionReason::BandWorse {
            original: before.risk_band,
            candidate: after.risk_band,
        });
    }
    if after.risk_band > config.max_accepted_band {
        return Verdict::Rejected(RejectionReason::BandNotAcceptable {
            candidate: after.risk_band,
            limit: config.max_accepted_band,
        });
    }
    Verdict::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskBands;
    use crate::types::ConfidenceInterval;

    fn result(id: &str, pf: f64) -> SimulationResult {
        SimulationResult {
            variant_id: id.to_string(),
            trials: 10_000,
            seed: 42,
            failure_threshold: 1.0,
            mean_safety_factor: 1.5,
            std_dev_safety_factor: 0.1,
            p5_safety_factor: 1.3,
            p95_safety_factor: 1.7,
            min_safety_factor: 1.0,
            max_safety_factor: 2.0,
            failures: (pf * 10_000.0).round() as usize,
            probability_of_failure: pf,
            probability_marginal: 0.0,
            confidence_interval: ConfidenceInterval {
                level: 0.95,
                lower: pf,
                upper: pf,
            },
            risk_band: RiskBands::default().classify(pf),
            elapsed_ms: 1,
        }
    }

    #[test]
    fn test_marginal_improvement_still_rejected() {
        let verdict = evaluate(
            &result("V1", 0.08),
            &result("V2", 0.02),
            &RecalibrationConfig::default(),
        );
        assert_eq!(
            verdict,
            Verdict::Rejected(RejectionReason::BandNotAcceptable {
                candidate: RiskBand::Marginal,
                limit: RiskBand::Safe,
            })
        );
    }

    #[test]
    fn test_safe_candidate_accepted() {
        let verdict = evaluate(
            &result("V1", 0.08),
            &result("V2", 0.0005),
            &RecalibrationConfig::default(),
        );
        assert!(verdict.is_accepted());
    }

    #[test]
    fn test_two_clause_rule_when_ceiling_is_critical() {
        let config = RecalibrationConfig {
            max_accepted_band: RiskBand::Critical,
            ..RecalibrationConfig::default()
        };
        assert!(evaluate(&result("V1", 0.08), &result("V2", 0.02), &config).is_accepted());
    }

    #[test]
    fn test_worse_probability_rejected_unless_within_slack() {
        let before = result("V1", 0.0002);
        let after = result("V2", 0.0008);
        assert!(matches!(
            evaluate(&before, &after, &RecalibrationConfig::default()),
            Verdict::Rejected(RejectionReason::ProbabilityWorse { .. })
        ));

        let config = RecalibrationConfig {
            acceptance_slack: 0.001,
            ..RecalibrationConfig::default()
        };
        assert!(evaluate(&before, &after, &config).is_accepted());
    }

    #[test]
    fn test_worse_band_rejected_even_within_slack() {
        let config = RecalibrationConfig {
            acceptance_slack: 0.05,
            max_accepted_band: RiskBand::Critical,
            ..RecalibrationConfig::default()
        };
        let verdict = evaluate(&result("V1", 0.0005), &result("V2", 0.02), &config);
        assert_eq!(
            verdict,
            Verdict::Rejected(RejectionReason::BandWorse {
                original: RiskBand::Safe,
                candidate: RiskBand::Marginal,
            })
        );
    }
}

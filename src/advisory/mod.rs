//! Advisory boundary
//!
//! The recalibration controller does not invent patches itself. It asks a
//! [`DesignAdvisor`] for a candidate variant and a rationale, then judges the
//! candidate with its own paired simulation. Two advisors ship with the crate:
//!
//! - [`RuleBasedAdvisor`]: deterministic tiered patches, no network
//! - [`HttpAdvisor`]: JSON over HTTP to a remote generative service

mod http;
mod rules;

pub use http::HttpAdvisor;
pub use rules::RuleBasedAdvisor;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{AdvisoryConfig, AdvisoryProvider};
use crate::types::{DesignVariant, DeviationEvent};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdvisoryError {
    #[error("advisor did not answer within {0:?}")]
    Timeout(Duration),
    #[error("advisor failed: {0}")]
    Failure(String),
    #[error("advisory request cancelled")]
    Cancelled,
    #[error("advisor proposal rejected: {0}")]
    InvalidProposal(String),
}

/// What the advisor is asked to patch.
#[derive(Debug, Clone)]
pub struct AdvisoryRequest {
    pub case_id: String,
    /// Design currently in force
    pub variant: DesignVariant,
    /// Sustained deviation that opened the case
    pub event: DeviationEvent,
    /// 1 for the first call, 2 for the retry
    pub attempt: u32,
}

/// A candidate design with the advisor's explanation.
#[derive(Debug, Clone)]
pub struct AdvisoryProposal {
    pub candidate: DesignVariant,
    pub rationale: String,
}

#[async_trait]
pub trait DesignAdvisor: Send + Sync {
    /// Propose a patched variant for the request.
    async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError>;

    fn name(&self) -> &str;
}

/// Call the advisor once, bounded by `deadline` and `cancel`.
pub async fn propose_with_deadline(
    advisor: &dyn DesignAdvisor,
    request: &AdvisoryRequest,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<AdvisoryProposal, AdvisoryError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AdvisoryError::Cancelled),
        result = tokio::time::timeout(deadline, advisor.propose(request)) => {
            result.unwrap_or(Err(AdvisoryError::Timeout(deadline)))
        }
    }
}

/// Reject proposals the controller cannot evaluate as a patch of `original`.
pub fn check_proposal(
    original: &DesignVariant,
    proposal: &AdvisoryProposal,
) -> Result<(), AdvisoryError> {
    let candidate = &proposal.candidate;
    if candidate.id() == original.id() {
        return Err(AdvisoryError::InvalidProposal(format!(
            "candidate reuses the original id '{}'",
            original.id()
        )));
    }
    for metric in original.baselines().keys() {
        if candidate.baseline(metric).is_none() {
            return Err(AdvisoryError::InvalidProposal(format!(
                "candidate '{}' has no baseline for monitored metric '{}'",
                candidate.id(),
                metric
            )));
        }
    }
    Ok(())
}

/// Build the advisor selected in the configuration.
pub fn from_config(config: &AdvisoryConfig) -> Result<Arc<dyn DesignAdvisor>, AdvisoryError> {
    match config.provider {
        AdvisoryProvider::Rules => Ok(Arc::new(RuleBasedAdvisor::new(config.tiers.clone()))),
        AdvisoryProvider::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| AdvisoryError::Failure("advisory.endpoint not set".to_string()))?;
            let api_key = std::env::var(&config.api_key_env).ok();
            Ok(Arc::new(HttpAdvisor::new(endpoint, api_key)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertLevel, BuiltinFormula, ParameterSpec};
    use chrono::Utc;

    fn sample_variant(id: &str, capacity: f64) -> DesignVariant {
        DesignVariant::builder(
            id,
            Arc::new(BuiltinFormula::CapacityDemand {
                capacity: "capacity".to_string(),
                demand: "demand".to_string(),
            }),
        )
        .parameter(ParameterSpec::normal("capacity", capacity, 10.0, "kPa"))
        .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa"))
        .build()
        .unwrap()
    }

    fn request() -> AdvisoryRequest {
        AdvisoryRequest {
            case_id: "RC-000001".to_string(),
            variant: sample_variant("V1", 150.0),
            event: DeviationEvent {
                sensor_id: "S1".to_string(),
                metric: "capacity".to_string(),
                baseline: 150.0,
                observed: 120.0,
                deviation_percent: -20.0,
                level: AlertLevel::Critical,
                sustained: true,
                timestamp: Utc::now(),
                rolling_mean: 120.0,
                consecutive_readings: 3,
                baseline_version: 1,
                variant_id: "V1".to_string(),
            },
            attempt: 1,
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl DesignAdvisor for Sleepy {
        async fn propose(&self, _request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError> {
            tokio::time::sleep(self.0).await;
            Ok(AdvisoryProposal {
                candidate: sample_variant("V2", 180.0),
                rationale: "late".to_string(),
            })
        }

        fn name(&self) -> &str {
            "sleepy"
        }
    }

    #[tokio::test]
    async fn test_deadline_exceeded_is_timeout() {
        let advisor = Sleepy(Duration::from_secs(5));
        let result = propose_with_deadline(
            &advisor,
            &request(),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap_err(), AdvisoryError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_cancelled_token_wins() {
        let advisor = Sleepy(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = propose_with_deadline(&advisor, &request(), Duration::from_secs(1), &cancel).await;
        assert_eq!(result.unwrap_err(), AdvisoryError::Cancelled);
    }

    #[test]
    fn test_proposal_must_be_new_variant() {
        let original = sample_variant("V1", 150.0);
        let same_id = AdvisoryProposal {
            candidate: sample_variant("V1", 180.0),
            rationale: String::new(),
        };
        assert!(matches!(
            check_proposal(&original, &same_id),
            Err(AdvisoryError::InvalidProposal(_))
        ));

        let ok = AdvisoryProposal {
            candidate: sample_variant("V2", 180.0),
            rationale: String::new(),
        };
        assert!(check_proposal(&original, &ok).is_ok());
    }
}

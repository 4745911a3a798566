//! Deterministic tiered patch rules
//!
//! The tier is picked from |deviation|: the largest tier whose
//! `min_deviation_percent` the deviation reaches, else the smallest tier.
//! The candidate takes the deviated parameter at its field value and scales
//! every resistance parameter up by the tier's uplift. Its baseline for the
//! deviated metric is the field value, so the detector measures later
//! readings against the conditions the patch was designed for.

use async_trait::async_trait;
use tracing::debug;

use super::{AdvisoryError, AdvisoryProposal, AdvisoryRequest, DesignAdvisor};
use crate::config::PatchTier;
use crate::types::{DesignVariant, ParameterRole, VariantError};

pub struct RuleBasedAdvisor {
    /// Sorted by `min_deviation_percent`, largest first
    tiers: Vec<PatchTier>,
}

impl RuleBasedAdvisor {
    pub fn new(mut tiers: Vec<PatchTier>) -> Self {
        tiers.sort_by(|a, b| b.min_deviation_percent.total_cmp(&a.min_deviation_percent));
        Self { tiers }
    }

    pub fn tier_for(&self, deviation_percent: f64) -> Option<&PatchTier> {
        let magnitude = deviation_percent.abs();
        self.tiers
            .iter()
            .find(|t| magnitude >= t.min_deviation_percent)
            .or_else(|| self.tiers.last())
    }

    fn patch(&self, request: &AdvisoryRequest, tier: &PatchTier) -> Result<DesignVariant, AdvisoryError> {
        let original = &request.variant;
        let event = &request.event;
        let field_value = event.field_value();
        let factor = 1.0 + tier.capacity_uplift;

        let parameters = original
            .parameters()
            .iter()
            .map(|spec| {
                let mut patched = if spec.name == event.metric {
                    spec.rebased(field_value)?
                } else {
                    spec.clone()
                };
                if patched.role == ParameterRole::Resistance {
                    patched.distribution = patched.distribution.scaled(factor);
                }
                Ok(patched)
            })
            .collect::<Result<Vec<_>, VariantError>>()
            .map_err(|e| AdvisoryError::InvalidProposal(e.to_string()))?;

        let mut builder = DesignVariant::builder(
            format!("{}-{}", original.id(), request.case_id),
            std::sync::Arc::clone(original.formula()),
        )
        .parameters(parameters)
        .cost_estimate(original.cost_estimate() * (1.0 + tier.cost_delta_fraction))
        .rationale(self.rationale(request, tier))
        .parent(original.id());

        // Monitored metrics that are not parameters keep their design baseline
        for (metric, value) in original.baselines() {
            if original.parameter(metric).is_none() {
                builder = builder.baseline(metric.clone(), *value);
            }
        }
        // Sensors on the deviated metric are expected to keep reading the field value
        if field_value.is_finite() && field_value != 0.0 {
            builder = builder.baseline(event.metric.clone(), field_value);
        }

        builder
            .build()
            .map_err(|e| AdvisoryError::InvalidProposal(e.to_string()))
    }

    fn rationale(&self, request: &AdvisoryRequest, tier: &PatchTier) -> String {
        let event = &request.event;
        let unit = request
            .variant
            .parameter(&event.metric)
            .map(|p| p.unit.as_str())
            .unwrap_or("");
        let resistance: Vec<&str> = request
            .variant
            .parameters()
            .iter()
            .filter(|p| p.role == ParameterRole::Resistance)
            .map(|p| p.name.as_str())
            .collect();

        let mut text = format!(
            "{} patch: {} measured {:.1} {} against a design value of {:.1} ({:+.1}%).",
            tier.name,
            event.metric,
            event.field_value(),
            unit,
            event.baseline,
            event.deviation_percent
        );
        if !tier.action.is_empty() {
            text.push_str(&format!(" {}.", tier.action));
        }
        if resistance.is_empty() {
            text.push_str(" No resistance parameter to reinforce; design re-evaluated at field conditions only.");
        } else {
            text.push_str(&format!(
                " {} increased by {:.0}%; cost {:+.0}%.",
                resistance.join(", "),
                tier.capacity_uplift * 100.0,
                tier.cost_delta_fraction * 100.0
            ));
        }
        text
    }
}

#[async_trait]
impl DesignAdvisor for RuleBasedAdvisor {
    async fn propose(&self, request: &AdvisoryRequest) -> Result<AdvisoryProposal, AdvisoryError> {
        let tier = self
            .tier_for(request.event.deviation_percent)
            .ok_or_else(|| AdvisoryError::Failure("no patch tiers configured".to_string()))?;
        let candidate = self.patch(request, tier)?;

        debug!(
            case = %request.case_id,
            tier = %tier.name,
            candidate = %candidate.id(),
            "Rule-based patch proposed"
        );
        Ok(AdvisoryProposal {
            rationale: candidate.rationale().to_string(),
            candidate,
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

//! One case from advisory request to verdict
//!
//! The task running [`CaseRun::run`] is the only writer of its case. Inputs
//! from the controller (coalesced events, audit notes) arrive on a channel
//! and are folded in between steps; every step publishes a snapshot.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::acceptance::{self, Verdict};
use super::{ControllerError, RecalibrationCase};
use crate::advisory::{check_proposal, propose_with_deadline, AdvisoryError, AdvisoryProposal, AdvisoryRequest, DesignAdvisor};
use crate::config::RecalibrationConfig;
use crate::simulation::SimulationEngine;
use crate::types::{AuditRecord, DesignVariant, DeviationEvent, EscalationReason, RecalibrationState, SimulationResult};

/// Sent from the controller to a running case.
#[derive(Debug)]
pub(crate) enum CaseInput {
    Coalesce(DeviationEvent),
    Note(AuditRecord),
}

pub(crate) fn apply_input(case: &mut RecalibrationCase, input: CaseInput) {
    match input {
        CaseInput::Coalesce(event) => case.coalesce(event),
        CaseInput::Note(record) => case.note(record),
    }
}

/// What a finished case hands back to the controller.
pub(crate) struct CaseReport {
    pub case: RecalibrationCase,
    /// Set when the case ended on an error the caller must see
    pub error: Option<ControllerError>,
    /// Inputs still queued when the task stopped
    pub inputs: Option<mpsc::UnboundedReceiver<CaseInput>>,
}

pub(crate) struct CaseRun {
    pub case: RecalibrationCase,
    pub engine: SimulationEngine,
    pub advisor: Arc<dyn DesignAdvisor>,
    pub config: RecalibrationConfig,
    pub seed: u64,
    pub cancel: CancellationToken,
    pub snapshot: watch::Sender<RecalibrationCase>,
    pub inputs: mpsc::UnboundedReceiver<CaseInput>,
}

impl CaseRun {
    pub async fn run(mut self) -> CaseReport {
        let error = self.drive().await.err();
        if let Some(e) = &error {
            warn!(case = %self.case.id(), error = %e, "Case ended with error");
        }
        self.publish();
        CaseReport {
            case: self.case,
            error,
            inputs: Some(self.inputs),
        }
    }

    async fn drive(&mut self) -> Result<(), ControllerError> {
        let advisor = Arc::clone(&self.advisor);
        self.case.transition(
            RecalibrationState::PatchRequested,
            format!("candidate requested from {} advisor", advisor.name()),
        )?;
        self.publish();

        let proposal = match self.request_patch(advisor.as_ref()).await {
            Ok(proposal) => proposal,
            Err((reason, detail)) => {
                warn!(case = %self.case.id(), %reason, %detail, "Escalating case");
                return self.case.escalate(reason, detail);
            }
        };
        let candidate = proposal.candidate.clone();
        self.case.record_candidate(proposal.candidate, proposal.rationale);
        self.publish();

        let event = self.case.trigger();
        let before = if self.config.evaluate_original_as_observed {
            match self.case.original().with_observed(&event.metric, event.field_value()) {
                Ok(variant) => variant,
                Err(e) => {
                    warn!(case = %self.case.id(), error = %e, "Field value cannot be applied to the original design");
                    return self.case.escalate(EscalationReason::SimulationFailed, e.to_string());
                }
            }
        } else {
            self.case.original().clone()
        };

        let (before, after) = match self.evaluate(before, candidate).await {
            Ok(pair) => pair,
            Err(e) => {
                self.case.escalate(EscalationReason::SimulationFailed, e.to_string())?;
                return Err(e);
            }
        };
        let verdict = acceptance::evaluate(&before, &after, &self.config);
        self.case.record_evaluation(before, after)?;
        self.publish();

        if self.cancel.is_cancelled() {
            return self
                .case
                .escalate(EscalationReason::Cancelled, "cancelled during evaluation");
        }

        match verdict {
            Verdict::Accepted => {
                self.case.accept()?;
                info!(
                    case = %self.case.id(),
                    candidate = self.case.candidate().map(DesignVariant::id).unwrap_or_default(),
                    "Candidate accepted"
                );
            }
            Verdict::Rejected(reason) => {
                warn!(case = %self.case.id(), %reason, "Candidate rejected, escalating");
                self.case.reject(reason.to_string())?;
            }
        }
        Ok(())
    }

    /// Ask the advisor, retrying once after the backoff. On failure returns
    /// the escalation reason and detail.
    async fn request_patch(
        &mut self,
        advisor: &dyn DesignAdvisor,
    ) -> Result<AdvisoryProposal, (EscalationReason, String)> {
        let timeout = Duration::from_millis(self.config.advisory_timeout_ms);
        let backoff = Duration::from_millis(self.config.advisory_retry_backoff_ms);
        let attempts = 1 + self.config.advisory_max_retries.min(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => {
                        return Err((EscalationReason::Cancelled, "cancelled during retry backoff".to_string()));
                    }
                    () = tokio::time::sleep(backoff) => {}
                }
            }

            let request = AdvisoryRequest {
                case_id: self.case.id().to_string(),
                variant: self.case.original().clone(),
                event: self.case.trigger().clone(),
                attempt,
            };
            let result = propose_with_deadline(advisor, &request, timeout, &self.cancel)
                .await
                .and_then(|proposal| check_proposal(&request.variant, &proposal).map(|()| proposal));

            match result {
                Ok(proposal) => return Ok(proposal),
                Err(AdvisoryError::Cancelled) => {
                    return Err((EscalationReason::Cancelled, "cancelled while waiting for the advisor".to_string()));
                }
                Err(e) => {
                    warn!(case = %self.case.id(), attempt, error = %e, "Advisory attempt failed");
                    self.case.note(AuditRecord::AdvisoryAttemptFailed {
                        attempt,
                        error: e.to_string(),
                    });
                    self.publish();
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(AdvisoryError::Timeout(d)) => (
                EscalationReason::AdvisoryTimeout,
                format!("no answer within {d:?} after {attempts} attempt(s)"),
            ),
            Some(AdvisoryError::InvalidProposal(detail)) => (EscalationReason::InvalidProposal, detail),
            Some(e) => (EscalationReason::AdvisoryFailure, e.to_string()),
            None => (EscalationReason::AdvisoryFailure, "no advisory attempt made".to_string()),
        })
    }

    /// Paired simulation: same trial count and seed on both sides.
    async fn evaluate(
        &self,
        before: DesignVariant,
        candidate: DesignVariant,
    ) -> Result<(SimulationResult, SimulationResult), ControllerError> {
        let engine = self.engine.clone();
        let seed = self.seed;
        let case_id = self.case.id().to_string();

        let (before, after) = tokio::task::spawn_blocking(move || {
            rayon::join(
                || engine.simulate_default(&before, seed),
                || engine.simulate_default(&candidate, seed),
            )
        })
        .await
        .map_err(|e| ControllerError::TaskFailed {
            case_id: case_id.clone(),
            detail: e.to_string(),
        })?;

        let wrap = |source| ControllerError::Simulation {
            case_id: case_id.clone(),
            source,
        };
        Ok((before.map_err(wrap)?, after.map_err(wrap)?))
    }

    fn publish(&mut self) {
        while let Ok(input) = self.inputs.try_recv() {
            apply_input(&mut self.case, input);
        }
        self.snapshot.send_replace(self.case.clone());
    }
}

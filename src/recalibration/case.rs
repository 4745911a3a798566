//! Recalibration case record
//!
//! A case is written by exactly one task. Every state change goes through
//! [`RecalibrationCase::transition`], which checks the edge against the state
//! machine and appends an audit entry. Once the outcome is terminal the case
//! refuses further transitions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ControllerError;
use crate::types::{
    AlertLevel, AuditEntry, AuditRecord, CaseOutcome, DesignVariant, DeviationEvent,
    EscalationBrief, EscalationReason, RecalibrationState, RiskSummary, SimulationResult,
};

#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationCase {
    id: String,
    state: RecalibrationState,
    outcome: CaseOutcome,
    trigger: DeviationEvent,
    original: DesignVariant,
    candidate: Option<DesignVariant>,
    rationale: Option<String>,
    before: Option<SimulationResult>,
    after: Option<SimulationResult>,
    escalation_reason: Option<EscalationReason>,
    escalation: Option<EscalationBrief>,
    coalesced: Vec<DeviationEvent>,
    audit: Vec<AuditEntry>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl RecalibrationCase {
    /// Open a case for `trigger` against the design in force.
    pub fn open(id: impl Into<String>, trigger: DeviationEvent, original: DesignVariant) -> Self {
        let note = format!(
            "{} {} on {}: {:+.1}% from baseline {}",
            trigger.level, trigger.metric, trigger.sensor_id, trigger.deviation_percent, trigger.baseline
        );
        let mut case = Self {
            id: id.into(),
            state: RecalibrationState::Monitoring,
            outcome: CaseOutcome::Pending,
            trigger,
            original,
            candidate: None,
            rationale: None,
            before: None,
            after: None,
            escalation_reason: None,
            escalation: None,
            coalesced: Vec::new(),
            audit: Vec::new(),
            opened_at: Utc::now(),
            closed_at: None,
        };
        case.state = RecalibrationState::DeviationDetected;
        case.note(AuditRecord::Transition {
            from: RecalibrationState::Monitoring,
            to: RecalibrationState::DeviationDetected,
            note,
        });
        case
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> RecalibrationState {
        self.state
    }

    pub fn outcome(&self) -> CaseOutcome {
        self.outcome
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_terminal()
    }

    pub fn trigger(&self) -> &DeviationEvent {
        &self.trigger
    }

    pub fn original(&self) -> &DesignVariant {
        &self.original
    }

    pub fn candidate(&self) -> Option<&DesignVariant> {
        self.candidate.as_ref()
    }

    pub fn rationale(&self) -> Option<&str> {
        self.rationale.as_deref()
    }

    /// Original-side result of the paired evaluation.
    pub fn before(&self) -> Option<&SimulationResult> {
        self.before.as_ref()
    }

    /// Candidate-side result of the paired evaluation.
    pub fn after(&self) -> Option<&SimulationResult> {
        self.after.as_ref()
    }

    pub fn escalation_reason(&self) -> Option<EscalationReason> {
        self.escalation_reason
    }

    pub fn escalation(&self) -> Option<&EscalationBrief> {
        self.escalation.as_ref()
    }

    pub fn coalesced(&self) -> &[DeviationEvent] {
        &self.coalesced
    }

    pub fn audit(&self) -> &[AuditEntry] {
        &self.audit
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    /// Append an audit entry with the next sequence number.
    pub fn note(&mut self, record: AuditRecord) {
        let sequence = u32::try_from(self.audit.len()).unwrap_or(u32::MAX).saturating_add(1);
        self.audit.push(AuditEntry {
            sequence,
            at: Utc::now(),
            record,
        });
    }

    /// Move to `to` if the state machine allows it.
    pub fn transition(&mut self, to: RecalibrationState, note: impl Into<String>) -> Result<(), ControllerError> {
        if self.outcome.is_terminal() || !self.state.can_transition_to(to) {
            return Err(ControllerError::InvalidTransition {
                case_id: self.id.clone(),
                from: self.state,
                to,
            });
        }
        let from = self.state;
        self.state = to;
        self.note(AuditRecord::Transition {
            from,
            to,
            note: note.into(),
        });
        Ok(())
    }

    /// Record a later event for the same variant.
    pub fn coalesce(&mut self, event: DeviationEvent) {
        self.note(AuditRecord::EventCoalesced {
            sensor_id: event.sensor_id.clone(),
            metric: event.metric.clone(),
            level: event.level,
            deviation_percent: event.deviation_percent,
        });
        self.coalesced.push(event);
    }

    pub fn record_candidate(&mut self, candidate: DesignVariant, rationale: String) {
        self.candidate = Some(candidate);
        self.rationale = Some(rationale);
    }

    /// Store the paired results and move to `PatchEvaluated`.
    pub fn record_evaluation(
        &mut self,
        before: SimulationResult,
        after: SimulationResult,
    ) -> Result<(), ControllerError> {
        let note = format!(
            "Pf {:.4} ({}) -> {:.4} ({})",
            before.probability_of_failure, before.risk_band, after.probability_of_failure, after.risk_band
        );
        self.transition(RecalibrationState::PatchEvaluated, note)?;
        self.before = Some(before);
        self.after = Some(after);
        Ok(())
    }

    /// Accept the candidate and return to monitoring.
    pub fn accept(&mut self) -> Result<(), ControllerError> {
        let candidate_id = self
            .candidate
            .as_ref()
            .map_or_else(String::new, |c| c.id().to_string());
        self.transition(RecalibrationState::Accepted, format!("{candidate_id} accepted"))?;
        self.transition(RecalibrationState::Monitoring, format!("{candidate_id} now active"))?;
        self.close(CaseOutcome::Accepted);
        Ok(())
    }

    /// Reject the candidate; the case is escalated for a manual decision.
    pub fn reject(&mut self, detail: impl Into<String>) -> Result<(), ControllerError> {
        let detail = detail.into();
        self.transition(RecalibrationState::Rejected, detail.clone())?;
        self.transition(RecalibrationState::Escalated, "manual decision required")?;
        self.escalation_reason = Some(EscalationReason::EvaluationRejected);
        self.escalation = Some(self.brief(EscalationReason::EvaluationRejected, detail));
        self.close(CaseOutcome::Rejected);
        Ok(())
    }

    /// Hand the case to a human.
    pub fn escalate(&mut self, reason: EscalationReason, detail: impl Into<String>) -> Result<(), ControllerError> {
        let detail = detail.into();
        self.transition(RecalibrationState::Escalated, format!("{reason}: {detail}"))?;
        self.escalation_reason = Some(reason);
        self.escalation = Some(self.brief(reason, detail));
        self.close(CaseOutcome::Escalated);
        Ok(())
    }

    /// Close a case whose task died, whatever its state. The audit trail keeps
    /// the forced edge.
    pub fn abort(&mut self, reason: EscalationReason, detail: impl Into<String>) {
        if self.outcome.is_terminal() {
            return;
        }
        let detail = detail.into();
        let from = self.state;
        self.state = RecalibrationState::Escalated;
        self.note(AuditRecord::Transition {
            from,
            to: RecalibrationState::Escalated,
            note: format!("aborted: {detail}"),
        });
        self.escalation_reason = Some(reason);
        self.escalation = Some(self.brief(reason, detail));
        self.close(CaseOutcome::Escalated);
    }

    fn close(&mut self, outcome: CaseOutcome) {
        self.outcome = outcome;
        self.closed_at = Some(Utc::now());
    }

    fn brief(&self, reason: EscalationReason, detail: String) -> EscalationBrief {
        let event = &self.trigger;
        let mut instructions = vec![format!(
            "Verify calibration of sensor {} and repeat the {} measurement",
            event.sensor_id, event.metric
        )];
        match event.level {
            AlertLevel::Critical => instructions.push(format!(
                "Suspend work in the zone monitored by {} until a revised design is approved",
                event.sensor_id
            )),
            _ => instructions.push(format!(
                "Increase the reading frequency of {} until the case is closed",
                event.sensor_id
            )),
        }
        match (reason, &self.candidate) {
            (EscalationReason::EvaluationRejected, Some(candidate)) => instructions.push(format!(
                "Review candidate {} against the observed conditions; it did not meet the acceptance rule",
                candidate.id()
            )),
            _ => instructions.push(format!(
                "Prepare a manual revision of {} for {} = {:.1}",
                self.original.id(),
                event.metric,
                event.field_value()
            )),
        }

        EscalationBrief {
            case_id: self.id.clone(),
            reason,
            detail,
            metric: event.metric.clone(),
            sensor_id: event.sensor_id.clone(),
            level: event.level,
            deviation_percent: event.deviation_percent,
            original: self.before.as_ref().map(summarize),
            candidate: self.after.as_ref().map(summarize),
            instructions,
            issued_at: Utc::now(),
        }
    }
}

fn summarize(result: &SimulationResult) -> RiskSummary {
    RiskSummary {
        variant_id: result.variant_id.clone(),
        probability_of_failure: result.probability_of_failure,
        risk_band: result.risk_band,
        mean_safety_factor: result.mean_safety_factor,
    }
}

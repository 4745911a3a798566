//! Recalibration case vocabulary: states, outcomes, audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertLevel, RiskBand};

/// Position of a case in the recalibration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalibrationState {
    Monitoring,
    DeviationDetected,
    PatchRequested,
    PatchEvaluated,
    Accepted,
    Rejected,
    Escalated,
}

impl RecalibrationState {
    /// Allowed edges of the state machine.
    pub fn can_transition_to(self, next: RecalibrationState) -> bool {
        use RecalibrationState::*;
        matches!(
            (self, next),
            (Monitoring, DeviationDetected)
                | (DeviationDetected, PatchRequested)
                | (PatchRequested, PatchEvaluated)
                | (PatchRequested, Escalated)
                | (PatchEvaluated, Accepted)
                | (PatchEvaluated, Rejected)
                | (PatchEvaluated, Escalated)
                | (Accepted, Monitoring)
                | (Rejected, Escalated)
        )
    }
}

impl std::fmt::Display for RecalibrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecalibrationState::Monitoring => write!(f, "Monitoring"),
            RecalibrationState::DeviationDetected => write!(f, "Deviation Detected"),
            RecalibrationState::PatchRequested => write!(f, "Patch Requested"),
            RecalibrationState::PatchEvaluated => write!(f, "Patch Evaluated"),
            RecalibrationState::Accepted => write!(f, "Accepted"),
            RecalibrationState::Rejected => write!(f, "Rejected"),
            RecalibrationState::Escalated => write!(f, "Escalated"),
        }
    }
}

/// Final disposition of a case. Anything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Escalated,
}

impl CaseOutcome {
    pub fn is_terminal(self) -> bool {
        self != CaseOutcome::Pending
    }
}

impl std::fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaseOutcome::Pending => write!(f, "PENDING"),
            CaseOutcome::Accepted => write!(f, "ACCEPTED"),
            CaseOutcome::Rejected => write!(f, "REJECTED"),
            CaseOutcome::Escalated => write!(f, "ESCALATED"),
        }
    }
}

/// Why a case was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    AdvisoryTimeout,
    AdvisoryFailure,
    InvalidProposal,
    Cancelled,
    EvaluationRejected,
    SimulationFailed,
    TaskFailed,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationReason::AdvisoryTimeout => write!(f, "advisory service timed out"),
            EscalationReason::AdvisoryFailure => write!(f, "advisory service failed"),
            EscalationReason::InvalidProposal => write!(f, "advisory proposal was invalid"),
            EscalationReason::Cancelled => write!(f, "case was cancelled"),
            EscalationReason::EvaluationRejected => write!(f, "candidate did not improve the risk profile"),
            EscalationReason::SimulationFailed => write!(f, "simulation failed"),
            EscalationReason::TaskFailed => write!(f, "recalibration task stopped unexpectedly"),
        }
    }
}

/// Compact view of one side of a paired evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub variant_id: String,
    pub probability_of_failure: f64,
    pub risk_band: RiskBand,
    pub mean_safety_factor: f64,
}

/// Material handed to the engineer on call when a case cannot auto-resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationBrief {
    pub case_id: String,
    pub reason: EscalationReason,
    pub detail: String,
    pub metric: String,
    pub sensor_id: String,
    pub level: AlertLevel,
    pub deviation_percent: f64,
    pub original: Option<RiskSummary>,
    pub candidate: Option<RiskSummary>,
    pub instructions: Vec<String>,
    pub issued_at: DateTime<Utc>,
}

/// What happened at one step of a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Transition {
        from: RecalibrationState,
        to: RecalibrationState,
        note: String,
    },
    AdvisoryAttemptFailed {
        attempt: u32,
        error: String,
    },
    EventCoalesced {
        sensor_id: String,
        metric: String,
        level: AlertLevel,
        deviation_percent: f64,
    },
    ReadingRejected {
        sensor_id: String,
        metric: String,
        reason: String,
    },
}

/// One line of a case's audit trail. Sequence numbers start at 1 and have no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u32,
    pub at: DateTime<Utc>,
    pub record: AuditRecord,
}

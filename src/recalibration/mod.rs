//! Recalibration controller
//!
//! Closes the loop between the detector and the engine. A sustained
//! deviation opens a case; the case asks the advisor for a candidate, runs a
//! paired simulation of the original (at field conditions) and the
//! candidate, and either promotes the candidate or escalates to a human.
//!
//! ```text
//! Monitoring -> DeviationDetected -> PatchRequested -> PatchEvaluated -> Accepted -> Monitoring
//!                                          |                 |---------> Rejected -> Escalated
//!                                          +-----------------+---------> Escalated
//! ```

mod acceptance;
mod case;
mod controller;
mod workflow;

pub use acceptance::{evaluate, RejectionReason, Verdict};
pub use case::RecalibrationCase;
pub use controller::{ControllerHandle, Disposition, RecalibrationController};

use thiserror::Error;

use crate::simulation::SimulationError;
use crate::types::RecalibrationState;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ControllerError {
    #[error("case {case_id}: simulation failed: {source}")]
    Simulation {
        case_id: String,
        #[source]
        source: SimulationError,
    },
    #[error("recalibration controller channel closed")]
    ChannelClosed,
    #[error("case {case_id}: transition {from} -> {to} not allowed")]
    InvalidTransition {
        case_id: String,
        from: RecalibrationState,
        to: RecalibrationState,
    },
    #[error("unknown case {0}")]
    UnknownCase(String),
    #[error("variant {0} is already registered")]
    DuplicateVariant(String),
    #[error("case {case_id}: task failed: {detail}")]
    TaskFailed { case_id: String, detail: String },
}

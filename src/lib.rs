//! NEXUS: closed-loop structural design recalibration
//!
//! Estimates the probabilistic safety margin of a design, watches field
//! sensor data for drift away from the design's assumptions, and decides when
//! and how to revise the design.
//!
//! ## Architecture
//!
//! - **Sampling**: reproducible variates for normal, lognormal, uniform and triangular parameters
//! - **Simulation**: parallel Monte Carlo engine producing a risk profile per variant
//! - **Detector**: streaming deviation classification with debounce
//! - **Recalibration**: per-case state machine driven by an actor
//! - **Advisory**: the boundary to whatever proposes candidate designs
//! - **Pipeline**: reading sources and the loop that wires them to the controller

pub mod advisory;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod pipeline;
pub mod recalibration;
pub mod sampling;
pub mod simulation;
pub mod types;

pub use config::NexusConfig;

pub use types::{
    AlertLevel, CaseOutcome, DesignVariant, DeviationEvent, ParameterDistribution, ParameterSpec,
    RecalibrationState, RiskBand, SafetyFormula, SensorReading, SimulationResult,
};

pub use advisory::{DesignAdvisor, HttpAdvisor, RuleBasedAdvisor};
pub use baseline::{BaselineSnapshot, BaselineStore};
pub use detector::{DetectorPool, DeviationDetector};
pub use recalibration::{ControllerHandle, RecalibrationCase, RecalibrationController};
pub use simulation::SimulationEngine;

//! Shared data structures for the recalibration loop
//!
//! - Design: ParameterSpec, DesignVariant, SafetyFormula
//! - Simulation: SimulationRun, SimulationResult, RiskBand
//! - Sensor: SensorReading, DeviationEvent, AlertLevel
//! - Case: RecalibrationState, CaseOutcome, audit and escalation records

mod case;
mod design;
mod sensor;
mod simulation;

pub use case::*;
pub use design::*;
pub use sensor::*;
pub use simulation::*;

//! System-wide default constants.
//!
//! Values that are not operator-tunable, grouped by subsystem.

// ============================================================================
// Detector
// ============================================================================

/// Queue depth for each detector worker (readings).
pub const DETECTOR_CHANNEL_CAPACITY: usize = 1_024;

/// Queue depth for detector output (events and rejections) towards the controller.
pub const DETECTOR_OUTPUT_CAPACITY: usize = 256;

// ============================================================================
// Recalibration Controller
// ============================================================================

/// Command queue depth of the controller actor.
pub const CONTROLLER_COMMAND_CAPACITY: usize = 64;

/// Prefix of case identifiers (`RC-000001`).
pub const CASE_ID_PREFIX: &str = "RC";

// ============================================================================
// Advisory
// ============================================================================

/// Default HTTP client timeout for the remote advisor (seconds).
///
/// The per-call deadline comes from `recalibration.advisory_timeout_ms`;
/// this only bounds connection setup and stray requests.
pub const ADVISOR_HTTP_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Reading Sources
// ============================================================================

/// Default replay pacing between readings (milliseconds). 0 = as fast as possible.
pub const REPLAY_DELAY_MS: u64 = 0;

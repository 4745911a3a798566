//! Field readings and deviation events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One timestamped observation from a field sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor_id: String,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn new(
        sensor_id: impl Into<String>,
        metric: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            metric: metric.into(),
            value,
            unit: unit.into(),
            timestamp,
        }
    }
}

/// Severity of a deviation from the design baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Normal => write!(f, "NORMAL"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Emitted when the tracked `(level, sustained)` state of a (sensor, metric) changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationEvent {
    pub sensor_id: String,
    pub metric: String,
    pub baseline: f64,
    pub observed: f64,
    /// `(observed - baseline) / baseline * 100`
    pub deviation_percent: f64,
    pub level: AlertLevel,
    pub sustained: bool,
    pub timestamp: DateTime<Utc>,
    /// Mean of the recent readings kept for this metric
    pub rolling_mean: f64,
    /// Consecutive readings at or above `level`
    pub consecutive_readings: u32,
    pub baseline_version: u64,
    pub variant_id: String,
}

impl DeviationEvent {
    /// Whether the controller should open a recalibration case for this event.
    pub fn is_actionable(&self) -> bool {
        self.sustained && self.level > AlertLevel::Normal
    }

    /// Best estimate of the field value: the rolling mean, or the triggering
    /// reading when no mean is available.
    pub fn field_value(&self) -> f64 {
        if self.rolling_mean.is_finite() {
            self.rolling_mean
        } else {
            self.observed
        }
    }
}

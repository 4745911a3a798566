//! Sensor Deviation Detector
//!
//! Compares each reading with the design baseline for its metric and
//! classifies the deviation as Normal, Warning or Critical. A level is only
//! reported as `sustained` once it has held for `debounce_readings`
//! consecutive readings (or `debounce_window_secs` of reading time, when
//! configured), so a single spike never reaches the controller as actionable.
//!
//! One event is emitted per reading that changes the tracked
//! `(level, sustained)` pair of a (sensor, metric); steady readings are silent.

mod pool;
mod stream;

pub use pool::{DetectorOutput, DetectorPool};
pub use stream::{event_stream, DeviationEvents};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::baseline::BaselineStore;
use crate::config::DetectorConfig;
use crate::types::{AlertLevel, DeviationEvent, SensorReading};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectorError {
    #[error("reading from {sensor_id} at {timestamp} precedes latest seen {latest}")]
    OutOfOrderReading {
        sensor_id: String,
        timestamp: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
    #[error("no baseline for metric '{metric}' (sensor {sensor_id})")]
    UnknownMetric { sensor_id: String, metric: String },
    #[error("non-finite value {value} from {sensor_id}/{metric}")]
    InvalidReading {
        sensor_id: String,
        metric: String,
        value: f64,
    },
    #[error("detector worker for sensor {0} has stopped")]
    WorkerStopped(String),
}

/// Map a deviation percentage to an alert level.
pub fn classify_deviation(deviation_percent: f64, config: &DetectorConfig) -> AlertLevel {
    let magnitude = deviation_percent.abs();
    if magnitude >= config.critical_percent {
        AlertLevel::Critical
    } else if magnitude >= config.warning_percent {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Readings processed and rejected, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectorStats {
    pub readings_processed: u64,
    pub events_emitted: u64,
    pub rejected_out_of_order: u64,
    pub rejected_unknown_metric: u64,
    pub rejected_invalid: u64,
}

impl DetectorStats {
    pub fn merge(&mut self, other: &DetectorStats) {
        self.readings_processed += other.readings_processed;
        self.events_emitted += other.events_emitted;
        self.rejected_out_of_order += other.rejected_out_of_order;
        self.rejected_unknown_metric += other.rejected_unknown_metric;
        self.rejected_invalid += other.rejected_invalid;
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_out_of_order + self.rejected_unknown_metric + self.rejected_invalid
    }
}

/// Run of consecutive readings at or above some level.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Streak {
    count: u32,
    started_at: DateTime<Utc>,
}

impl Streak {
    fn extend(streak: Option<Streak>, at: DateTime<Utc>) -> Streak {
        match streak {
            Some(s) => Streak { count: s.count + 1, ..s },
            None => Streak { count: 1, started_at: at },
        }
    }
}

/// Per (sensor, metric) state.
#[derive(Debug, Clone)]
struct MetricTrack {
    window: VecDeque<f64>,
    level: AlertLevel,
    sustained: bool,
    warning_streak: Option<Streak>,
    critical_streak: Option<Streak>,
    baseline_version: u64,
}

impl MetricTrack {
    fn new(baseline_version: u64) -> Self {
        Self {
            window: VecDeque::new(),
            level: AlertLevel::Normal,
            sustained: false,
            warning_streak: None,
            critical_streak: None,
            baseline_version,
        }
    }

    fn rolling_mean(&self) -> f64 {
        if self.window.is_empty() {
            return f64::NAN;
        }
        self.window.iter().sum::<f64>() / self.window.len() as f64
    }
}

/// Whether a streak has held long enough, by count or by reading time.
fn is_held(config: &DetectorConfig, streak: Streak, now: DateTime<Utc>) -> bool {
    if streak.count >= config.debounce_readings {
        return true;
    }
    config.debounce_window_secs.is_some_and(|secs| {
        let window_ms = i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000);
        (now - streak.started_at).num_milliseconds() >= window_ms
    })
}

/// Read-only view of a (sensor, metric) track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatus {
    pub level: AlertLevel,
    pub sustained: bool,
    pub consecutive_readings: u32,
    pub rolling_mean: f64,
    pub baseline_version: u64,
}

/// Streaming deviation classifier for any number of (sensor, metric) pairs.
///
/// A deviation that persists at the same level is reported as actionable
/// once. The track is not re-armed when the case it opened closes, so an
/// escalated case is not followed by a fresh case for the same readings;
/// a new actionable event needs a level change or a new baseline version.
pub struct DeviationDetector {
    config: DetectorConfig,
    baselines: Arc<BaselineStore>,
    tracks: HashMap<(String, String), MetricTrack>,
    latest_by_sensor: HashMap<String, DateTime<Utc>>,
    stats: DetectorStats,
}

impl DeviationDetector {
    pub fn new(config: DetectorConfig, baselines: Arc<BaselineStore>) -> Self {
        Self {
            config,
            baselines,
            tracks: HashMap::new(),
            latest_by_sensor: HashMap::new(),
            stats: DetectorStats::default(),
        }
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    pub fn baselines(&self) -> &Arc<BaselineStore> {
        &self.baselines
    }

    pub fn status(&self, sensor_id: &str, metric: &str) -> Option<MetricStatus> {
        self.tracks
            .get(&(sensor_id.to_string(), metric.to_string()))
            .map(|t| MetricStatus {
                level: t.level,
                sustained: t.sustained,
                consecutive_readings: self.consecutive_for(t, t.level),
                rolling_mean: t.rolling_mean(),
                baseline_version: t.baseline_version,
            })
    }

    /// Lazily turn a reading iterator into the events it produces.
    pub fn events<I>(&mut self, readings: I) -> DeviationEvents<'_, I::IntoIter>
    where
        I: IntoIterator<Item = SensorReading>,
    {
        DeviationEvents::new(self, readings.into_iter())
    }

    /// Process one reading. Returns the event it produced, if the tracked
    /// state changed. A rejected reading leaves all state untouched.
    pub fn process(&mut self, reading: &SensorReading) -> Result<Option<DeviationEvent>, DetectorError> {
        let snapshot = self.baselines.load();
        let baseline = match self.check(reading, snapshot.get(&reading.metric)) {
            Ok(baseline) => baseline,
            Err(e) => {
                match e {
                    DetectorError::OutOfOrderReading { .. } => self.stats.rejected_out_of_order += 1,
                    DetectorError::UnknownMetric { .. } => self.stats.rejected_unknown_metric += 1,
                    DetectorError::InvalidReading { .. } => self.stats.rejected_invalid += 1,
                    DetectorError::WorkerStopped(_) => {}
                }
                warn!(sensor = %reading.sensor_id, metric = %reading.metric, error = %e, "Reading rejected");
                return Err(e);
            }
        };

        self.latest_by_sensor
            .insert(reading.sensor_id.clone(), reading.timestamp);
        self.stats.readings_processed += 1;

        let key = (reading.sensor_id.clone(), reading.metric.clone());
        let track = self
            .tracks
            .entry(key)
            .or_insert_with(|| MetricTrack::new(snapshot.version));

        if track.baseline_version != snapshot.version {
            debug!(
                sensor = %reading.sensor_id,
                metric = %reading.metric,
                from = track.baseline_version,
                to = snapshot.version,
                "Baseline changed, resetting debounce"
            );
            *track = MetricTrack::new(snapshot.version);
        }

        let deviation_percent = (reading.value - baseline) / baseline * 100.0;
        let level = classify_deviation(deviation_percent, &self.config);

        track.window.push_back(reading.value);
        while track.window.len() > self.config.window_size.max(1) {
            track.window.pop_front();
        }

        // A Normal reading clears both streaks
        track.warning_streak = (level >= AlertLevel::Warning)
            .then(|| Streak::extend(track.warning_streak, reading.timestamp));
        track.critical_streak = (level >= AlertLevel::Critical)
            .then(|| Streak::extend(track.critical_streak, reading.timestamp));

        let streak = match level {
            AlertLevel::Normal => None,
            AlertLevel::Warning => track.warning_streak,
            AlertLevel::Critical => track.critical_streak,
        };
        let sustained = streak.is_some_and(|s| is_held(&self.config, s, reading.timestamp));

        if (level, sustained) == (track.level, track.sustained) {
            return Ok(None);
        }
        track.level = level;
        track.sustained = sustained;

        let event = DeviationEvent {
            sensor_id: reading.sensor_id.clone(),
            metric: reading.metric.clone(),
            baseline,
            observed: reading.value,
            deviation_percent,
            level,
            sustained,
            timestamp: reading.timestamp,
            rolling_mean: track.rolling_mean(),
            consecutive_readings: streak.map_or(0, |s| s.count),
            baseline_version: snapshot.version,
            variant_id: snapshot.variant_id.clone(),
        };
        self.stats.events_emitted += 1;

        if event.is_actionable() {
            info!(
                sensor = %event.sensor_id,
                metric = %event.metric,
                level = %event.level,
                deviation_percent = format_args!("{:.1}", event.deviation_percent),
                consecutive = event.consecutive_readings,
                "Sustained deviation"
            );
        } else {
            debug!(
                sensor = %event.sensor_id,
                metric = %event.metric,
                level = %event.level,
                sustained = event.sustained,
                "Deviation state changed"
            );
        }
        Ok(Some(event))
    }

    /// Validate a reading and resolve its baseline.
    fn check(&self, reading: &SensorReading, baseline: Option<f64>) -> Result<f64, DetectorError> {
        if !reading.value.is_finite() {
            return Err(DetectorError::InvalidReading {
                sensor_id: reading.sensor_id.clone(),
                metric: reading.metric.clone(),
                value: reading.value,
            });
        }
        if let Some(&latest) = self.latest_by_sensor.get(&reading.sensor_id) {
            if reading.timestamp < latest {
                return Err(DetectorError::OutOfOrderReading {
                    sensor_id: reading.sensor_id.clone(),
                    timestamp: reading.timestamp,
                    latest,
                });
            }
        }
        baseline.ok_or_else(|| DetectorError::UnknownMetric {
            sensor_id: reading.sensor_id.clone(),
            metric: reading.metric.clone(),
        })
    }

    fn consecutive_for(&self, track: &MetricTrack, level: AlertLevel) -> u32 {
        match level {
            AlertLevel::Normal => 0,
            AlertLevel::Warning => track.warning_streak.map_or(0, |s| s.count),
            AlertLevel::Critical => track.critical_streak.map_or(0, |s| s.count),
        }
    }
}

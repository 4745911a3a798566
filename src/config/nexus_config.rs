//! NEXUS configuration: every loop threshold as an operator-tunable TOML value
//!
//! Each section implements `Default`, so a missing file or a partial file
//! yields a complete, valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::RiskBand;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "NEXUS_CONFIG";

/// File looked up in the working directory when the env var is unset.
pub const LOCAL_CONFIG_FILE: &str = "nexus.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitored structure.
///
/// Load with `NexusConfig::load()` which searches:
/// 1. `$NEXUS_CONFIG` env var
/// 2. `./nexus.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NexusConfig {
    /// Project identification
    #[serde(default)]
    pub project: ProjectInfo,

    /// Monte Carlo engine settings and risk bands
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Deviation thresholds and debounce
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Acceptance rule and advisory call budget
    #[serde(default)]
    pub recalibration: RecalibrationConfig,

    /// Which advisor proposes patches, and the rule tiers
    #[serde(default)]
    pub advisory: AdvisoryConfig,
}

impl NexusConfig {
    /// Load configuration using the standard search order:
    /// 1. `$NEXUS_CONFIG` environment variable
    /// 2. `./nexus.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), project = %config.project.name, "Loaded config from NEXUS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from NEXUS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "NEXUS_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(project = %config.project.name, "Loaded config from ./nexus.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./nexus.toml, using defaults");
                }
            }
        }

        info!("No nexus.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    ///
    /// Unknown keys are logged as warnings; validation errors are fatal.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;

        for w in super::validation::validate_ranges(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Critical thresholds must be >= warning thresholds
    /// - Risk band cut-points must satisfy 0 <= safe < marginal <= 1
    /// - Counts (trials, debounce readings, window, workers) must be > 0
    /// - At most one advisory retry
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        // Simulation
        let s = &self.simulation;
        if s.trials == 0 {
            errors.push("simulation.trials must be >= 1".to_string());
        }
        if !s.failure_threshold.is_finite() {
            errors.push(format!(
                "simulation.failure_threshold must be finite (got {})",
                s.failure_threshold
            ));
        }
        if !s.target_safety_factor.is_finite() || s.target_safety_factor < s.failure_threshold {
            errors.push(format!(
                "simulation.target_safety_factor ({}) must be finite and >= failure_threshold ({})",
                s.target_safety_factor, s.failure_threshold
            ));
        }
        if !(s.confidence_level > 0.0 && s.confidence_level < 1.0) {
            errors.push(format!(
                "simulation.confidence_level must be in (0, 1) (got {})",
                s.confidence_level
            ));
        }
        if let Err(e) = s.risk_bands.check() {
            errors.push(format!("simulation.risk_bands: {e}"));
        }

        // Detector
        let d = &self.detector;
        Self::check_escalation(d.warning_percent, d.critical_percent, "detector", &mut errors);
        if d.warning_percent < 0.0 {
            errors.push(format!(
                "detector.warning_percent ({}) must be >= 0",
                d.warning_percent
            ));
        }
        if d.debounce_readings == 0 {
            errors.push("detector.debounce_readings must be >= 1".to_string());
        }
        if d.window_size == 0 {
            errors.push("detector.window_size must be >= 1".to_string());
        }
        if d.workers == 0 {
            errors.push("detector.workers must be >= 1".to_string());
        }
        if d.channel_capacity == 0 {
            errors.push("detector.channel_capacity must be >= 1".to_string());
        }

        // Recalibration
        let r = &self.recalibration;
        if !r.acceptance_slack.is_finite() || r.acceptance_slack < 0.0 {
            errors.push(format!(
                "recalibration.acceptance_slack must be finite and >= 0 (got {})",
                r.acceptance_slack
            ));
        }
        if r.advisory_timeout_ms == 0 {
            errors.push("recalibration.advisory_timeout_ms must be > 0".to_string());
        }
        if r.advisory_max_retries > 1 {
            errors.push(format!(
                "recalibration.advisory_max_retries must be 0 or 1 (got {})",
                r.advisory_max_retries
            ));
        }

        // Advisory
        let a = &self.advisory;
        if a.provider == AdvisoryProvider::Http && a.endpoint.as_deref().map_or(true, str::is_empty) {
            errors.push("advisory.endpoint is required when advisory.provider = \"http\"".to_string());
        }
        if a.tiers.is_empty() {
            errors.push("advisory.tiers must contain at least one tier".to_string());
        }
        for (i, tier) in a.tiers.iter().enumerate() {
            let fields = [
                ("min_deviation_percent", tier.min_deviation_percent),
                ("capacity_uplift", tier.capacity_uplift),
                ("cost_delta_fraction", tier.cost_delta_fraction),
            ];
            for (name, value) in fields {
                if !value.is_finite() || value < 0.0 {
                    errors.push(format!(
                        "advisory.tiers[{i}].{name} must be finite and >= 0 (got {value})"
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_escalation(warning: f64, critical: f64, name: &str, errors: &mut Vec<String>) {
        // NaN/Inf comparisons silently pass, catch them explicitly
        if !warning.is_finite() || !critical.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got warning={warning}, critical={critical})"
            ));
            return;
        }
        if critical < warning {
            errors.push(format!(
                "{name}: critical ({critical:.3}) must be >= warning ({warning:.3})"
            ));
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Project Info
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default)]
    pub structure: String,
    #[serde(default)]
    pub location: String,
}

fn default_project_name() -> String {
    "UNNAMED".to_string()
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            structure: String::new(),
            location: String::new(),
        }
    }
}

// ============================================================================
// Simulation
// ============================================================================

/// Monte Carlo engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Trials per simulation
    #[serde(default = "default_trials")]
    pub trials: usize,

    /// A trial fails when its safety factor is below this value
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Safety factors between the failure threshold and this value count as marginal
    #[serde(default = "default_target_safety_factor")]
    pub target_safety_factor: f64,

    /// Confidence level of the interval reported on the probability of failure
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,

    /// Base seed; each recalibration case derives its own seed from it
    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub risk_bands: RiskBands,
}

fn default_trials() -> usize { 1000 }
fn default_failure_threshold() -> f64 { 1.0 }
fn default_target_safety_factor() -> f64 { 1.5 }
fn default_confidence_level() -> f64 { 0.95 }
fn default_seed() -> u64 { 42 }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: default_trials(),
            failure_threshold: default_failure_threshold(),
            target_safety_factor: default_target_safety_factor(),
            confidence_level: default_confidence_level(),
            seed: default_seed(),
            risk_bands: RiskBands::default(),
        }
    }
}

/// Probability-of-failure cut-points: pf <= safe_max_pf is Safe,
/// pf <= marginal_max_pf is Marginal, anything above is Critical.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBands {
    #[serde(default = "default_safe_max_pf")]
    pub safe_max_pf: f64,
    #[serde(default = "default_marginal_max_pf")]
    pub marginal_max_pf: f64,
}

fn default_safe_max_pf() -> f64 { 0.001 }
fn default_marginal_max_pf() -> f64 { 0.10 }

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            safe_max_pf: default_safe_max_pf(),
            marginal_max_pf: default_marginal_max_pf(),
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Deviation classification and debounce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// |deviation| at or above this percentage is a Warning
    #[serde(default = "default_warning_percent")]
    pub warning_percent: f64,

    /// |deviation| at or above this percentage is Critical
    #[serde(default = "default_critical_percent")]
    pub critical_percent: f64,

    /// Consecutive readings at a level before it is reported as sustained
    #[serde(default = "default_debounce_readings")]
    pub debounce_readings: u32,

    /// Optional reading-time duration that also makes a level sustained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_window_secs: Option<u64>,

    /// Recent readings kept per (sensor, metric) for the rolling mean
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Detector worker tasks; readings are sharded across them by sensor id
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded queue depth per worker
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_warning_percent() -> f64 { 5.0 }
fn default_critical_percent() -> f64 { 20.0 }
fn default_debounce_readings() -> u32 { 3 }
fn default_window_size() -> usize { 5 }
fn default_workers() -> usize { 4 }
fn default_channel_capacity() -> usize { super::defaults::DETECTOR_CHANNEL_CAPACITY }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            warning_percent: default_warning_percent(),
            critical_percent: default_critical_percent(),
            debounce_readings: default_debounce_readings(),
            debounce_window_secs: None,
            window_size: default_window_size(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

// ============================================================================
// Recalibration
// ============================================================================

/// Acceptance rule and advisory call budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalibrationConfig {
    /// Candidate pf may exceed the original pf by at most this much
    #[serde(default)]
    pub acceptance_slack: f64,

    /// Worst band a candidate may land in and still be accepted
    #[serde(default = "default_max_accepted_band")]
    pub max_accepted_band: RiskBand,

    /// Evaluate the original design with the deviated parameter moved to the observed value
    #[serde(default = "default_true")]
    pub evaluate_original_as_observed: bool,

    #[serde(default = "default_advisory_timeout_ms")]
    pub advisory_timeout_ms: u64,

    /// 0 or 1
    #[serde(default = "default_advisory_max_retries")]
    pub advisory_max_retries: u32,

    #[serde(default = "default_advisory_retry_backoff_ms")]
    pub advisory_retry_backoff_ms: u64,
}

fn default_max_accepted_band() -> RiskBand { RiskBand::Safe }
fn default_true() -> bool { true }
fn default_advisory_timeout_ms() -> u64 { 30_000 }
fn default_advisory_max_retries() -> u32 { 1 }
fn default_advisory_retry_backoff_ms() -> u64 { 2_000 }

impl Default for RecalibrationConfig {
    fn default() -> Self {
        Self {
            acceptance_slack: 0.0,
            max_accepted_band: default_max_accepted_band(),
            evaluate_original_as_observed: default_true(),
            advisory_timeout_ms: default_advisory_timeout_ms(),
            advisory_max_retries: default_advisory_max_retries(),
            advisory_retry_backoff_ms: default_advisory_retry_backoff_ms(),
        }
    }
}

// ============================================================================
// Advisory
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryProvider {
    /// Deterministic tiered patch rules, no network
    #[default]
    Rules,
    /// Remote generative service over HTTP
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub provider: AdvisoryProvider,

    /// URL the HTTP advisor POSTs proposal requests to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Environment variable holding the bearer token for the HTTP advisor
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Patch tiers, matched on |deviation_percent|
    #[serde(default = "default_tiers")]
    pub tiers: Vec<PatchTier>,
}

fn default_api_key_env() -> String {
    "NEXUS_ADVISOR_API_KEY".to_string()
}

fn default_tiers() -> Vec<PatchTier> {
    vec![
        PatchTier {
            name: "critical".to_string(),
            min_deviation_percent: 20.0,
            capacity_uplift: 0.45,
            cost_delta_fraction: 0.18,
            action: "Extend foundation depth by 600 mm and add 4 piles".to_string(),
        },
        PatchTier {
            name: "moderate".to_string(),
            min_deviation_percent: 10.0,
            capacity_uplift: 0.25,
            cost_delta_fraction: 0.09,
            action: "Extend foundation depth by 350 mm and add 2 piles".to_string(),
        },
        PatchTier {
            name: "minor".to_string(),
            min_deviation_percent: 5.0,
            capacity_uplift: 0.10,
            cost_delta_fraction: 0.03,
            action: "Extend foundation depth by 150 mm".to_string(),
        },
    ]
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            provider: AdvisoryProvider::default(),
            endpoint: None,
            api_key_env: default_api_key_env(),
            tiers: default_tiers(),
        }
    }
}

/// One rung of the rule-based patch ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchTier {
    pub name: String,
    /// Tier applies when |deviation| >= this percentage
    pub min_deviation_percent: f64,
    /// Fractional increase applied to every resistance parameter
    pub capacity_uplift: f64,
    /// Fractional cost increase over the original variant
    pub cost_delta_fraction: f64,
    /// Field instruction quoted in the rationale
    #[serde(default)]
    pub action: String,
}

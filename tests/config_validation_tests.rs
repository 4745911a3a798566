//! Integration tests for configuration loading and validation:
//! unknown-key warnings, range warnings, partial overrides and round-trips.

use nexus::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use nexus::config::{AdvisoryProvider, ConfigError, NexusConfig};
use nexus::types::RiskBand;

// ============================================================================
// Unknown Key Detection
// ============================================================================

#[test]
fn typo_in_detector_key_warns_with_suggestion() {
    let toml_str = r#"
[detector]
critcal_percent = 25.0
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert_eq!(warnings[0].field, "detector.critcal_percent");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("detector.critical_percent")
    );
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[project]
name = "North Abutment"
structure = "Bridge abutment footing"
location = "Pier 3"

[simulation]
trials = 5000
failure_threshold = 1.0
seed = 7

[simulation.risk_bands]
safe_max_pf = 0.001
marginal_max_pf = 0.10

[detector]
warning_percent = 5.0
critical_percent = 20.0
debounce_readings = 3
window_size = 5

[recalibration]
acceptance_slack = 0.0
max_accepted_band = "safe"
advisory_timeout_ms = 10000

[advisory]
provider = "rules"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(
        warnings.is_empty(),
        "Valid config should produce 0 warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn unknown_section_warns() {
    let toml_str = r#"
[finite_elements]
mesh_size = 0.5
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(warnings.iter().any(|w| w.field == "finite_elements"));
    assert!(warnings.iter().any(|w| w.field == "finite_elements.mesh_size"));
}

#[test]
fn multiple_typos_all_warned() {
    let toml_str = r#"
[simulation]
trails = 500

[recalibration]
acceptance_slak = 0.01
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(
        warnings.len(),
        2,
        "Expected 2 warnings for 2 typos, got {}",
        warnings.len()
    );
}

#[test]
fn empty_toml_produces_zero_warnings() {
    assert!(validate_unknown_keys("").is_empty());
}

#[test]
fn known_keys_set_is_complete() {
    let toml_str = NexusConfig::default()
        .to_toml()
        .expect("Default config should serialize");
    let warnings = validate_unknown_keys(&toml_str);
    assert!(
        warnings.is_empty(),
        "Default config serialization should produce 0 unknown-key warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );
}

#[test]
fn suggest_correction_returns_none_for_garbage() {
    let known = known_config_keys();
    assert!(suggest_correction("zzz_completely_invalid_xyz_12345", &known).is_none());
}

// ============================================================================
// Consistency Validation
// ============================================================================

#[test]
fn defaults_pass_validation() {
    let config = NexusConfig::default();
    assert!(config.validate().is_ok(), "Default config must always pass validation");
    assert!(
        validate_ranges(&config).is_empty(),
        "Default config should have 0 range warnings"
    );
}

#[test]
fn inverted_detector_thresholds_fail() {
    let mut config = NexusConfig::default();
    config.detector.warning_percent = 25.0;
    config.detector.critical_percent = 10.0;
    match config.validate() {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("detector")), "{errors:?}");
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn overlapping_risk_bands_fail() {
    let mut config = NexusConfig::default();
    config.simulation.risk_bands.safe_max_pf = 0.2;
    config.simulation.risk_bands.marginal_max_pf = 0.1;
    assert!(config.validate().is_err());
}

#[test]
fn zero_trials_fail() {
    let mut config = NexusConfig::default();
    config.simulation.trials = 0;
    assert!(config.validate().is_err());
}

#[test]
fn zero_debounce_fails() {
    let mut config = NexusConfig::default();
    config.detector.debounce_readings = 0;
    assert!(config.validate().is_err());
}

#[test]
fn more_than_one_advisory_retry_fails() {
    let mut config = NexusConfig::default();
    config.recalibration.advisory_max_retries = 3;
    assert!(config.validate().is_err());
}

#[test]
fn http_provider_without_endpoint_fails() {
    let mut config = NexusConfig::default();
    config.advisory.provider = AdvisoryProvider::Http;
    config.advisory.endpoint = None;
    assert!(config.validate().is_err());

    config.advisory.endpoint = Some("http://127.0.0.1:9000/propose".to_string());
    assert!(config.validate().is_ok());
}

#[test]
fn single_reading_debounce_is_a_warning_not_an_error() {
    let mut config = NexusConfig::default();
    config.detector.debounce_readings = 1;
    assert!(config.validate().is_ok());
    assert!(validate_ranges(&config)
        .iter()
        .any(|w| w.field == "detector.debounce_readings"));
}

// ============================================================================
// Partial Files and Round-trips
// ============================================================================

#[test]
fn partial_toml_keeps_other_defaults() {
    let config: NexusConfig = toml::from_str(
        r#"
[detector]
debounce_readings = 5
"#,
    )
    .expect("partial config should parse");

    let defaults = NexusConfig::default();
    assert_eq!(config.detector.debounce_readings, 5);
    assert!((config.detector.critical_percent - defaults.detector.critical_percent).abs() < f64::EPSILON);
    assert_eq!(config.simulation.trials, defaults.simulation.trials);
    assert_eq!(config.recalibration.max_accepted_band, RiskBand::Safe);
    assert_eq!(config.advisory.tiers.len(), defaults.advisory.tiers.len());
    assert!(config.validate().is_ok());
}

#[test]
fn config_roundtrip_preserves_values() {
    let mut original = NexusConfig::default();
    original.project.name = "Roundtrip-Test".to_string();
    original.simulation.trials = 25_000;
    original.detector.warning_percent = 7.5;
    original.recalibration.max_accepted_band = RiskBand::Marginal;

    let toml_str = original.to_toml().expect("Serialization should work");
    let roundtripped: NexusConfig = toml::from_str(&toml_str).expect("Deserialization should work");

    assert_eq!(roundtripped.project.name, "Roundtrip-Test");
    assert_eq!(roundtripped.simulation.trials, 25_000);
    assert!((roundtripped.detector.warning_percent - 7.5).abs() < f64::EPSILON);
    assert_eq!(roundtripped.recalibration.max_accepted_band, RiskBand::Marginal);
    assert!(roundtripped.validate().is_ok());
}

#[test]
fn load_from_file_reads_and_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nexus.toml");
    std::fs::write(
        &path,
        r#"
[project]
name = "File-Test"

[simulation]
trials = 2000
"#,
    )
    .expect("write config");

    let config = NexusConfig::load_from_file(&path).expect("config should load");
    assert_eq!(config.project.name, "File-Test");
    assert_eq!(config.simulation.trials, 2000);
}

#[test]
fn load_from_file_rejects_invalid_values() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nexus.toml");
    std::fs::write(
        &path,
        r#"
[detector]
warning_percent = 30.0
critical_percent = 10.0
"#,
    )
    .expect("write config");

    assert!(matches!(
        NexusConfig::load_from_file(&path),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn save_then_load_roundtrips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("saved.toml");
    let mut config = NexusConfig::default();
    config.project.name = "Saved".to_string();
    config.save_to_file(&path).expect("save");

    let loaded = NexusConfig::load_from_file(&path).expect("load");
    assert_eq!(loaded.project.name, "Saved");
}

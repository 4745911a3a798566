//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks on suspicious values.
//!
//! The raw TOML is first parsed into `toml::Value` and its key tree compared
//! against the known field names. Unknown keys only produce warnings, so a
//! typo never stops the loop from starting.

use std::collections::HashSet;

use super::NexusConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Every valid dotted key path of `NexusConfig`.
///
/// Kept by hand in step with nexus_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [project]
        "project",
        "project.name",
        "project.structure",
        "project.location",
        // [simulation]
        "simulation",
        "simulation.trials",
        "simulation.failure_threshold",
        "simulation.target_safety_factor",
        "simulation.confidence_level",
        "simulation.seed",
        "simulation.risk_bands",
        "simulation.risk_bands.safe_max_pf",
        "simulation.risk_bands.marginal_max_pf",
        // [detector]
        "detector",
        "detector.warning_percent",
        "detector.critical_percent",
        "detector.debounce_readings",
        "detector.debounce_window_secs",
        "detector.window_size",
        "detector.workers",
        "detector.channel_capacity",
        // [recalibration]
        "recalibration",
        "recalibration.acceptance_slack",
        "recalibration.max_accepted_band",
        "recalibration.evaluate_original_as_observed",
        "recalibration.advisory_timeout_ms",
        "recalibration.advisory_max_retries",
        "recalibration.advisory_retry_backoff_ms",
        // [advisory]
        "advisory",
        "advisory.provider",
        "advisory.endpoint",
        "advisory.api_key_env",
        "advisory.tiers",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// Arrays of tables (`[[advisory.tiers]]`) are reported by their own key only.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Closest known key within edit distance 3, ties broken alphabetically.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), *k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        // parse errors are reported by serde afterwards
        Err(_) => return Vec::new(),
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range Warnings
// ============================================================================

/// Values that validate but are unlikely to be intended.
pub fn validate_ranges(config: &NexusConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |field: &str, message: String| {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message,
            suggestion: None,
        });
    };

    let s = &config.simulation;
    if s.trials < 100 {
        warn(
            "simulation.trials",
            format!("simulation.trials = {} gives a coarse probability of failure", s.trials),
        );
    }
    if s.failure_threshold <= 0.0 {
        warn(
            "simulation.failure_threshold",
            format!(
                "simulation.failure_threshold = {} means no trial can fail",
                s.failure_threshold
            ),
        );
    }

    let d = &config.detector;
    if d.critical_percent > 100.0 {
        warn(
            "detector.critical_percent",
            format!(
                "detector.critical_percent = {:.1} is above 100%, critical alerts are unlikely",
                d.critical_percent
            ),
        );
    }
    if d.debounce_readings == 1 {
        warn(
            "detector.debounce_readings",
            "detector.debounce_readings = 1 reports every deviation as sustained".to_string(),
        );
    }

    let r = &config.recalibration;
    if r.acceptance_slack > s.risk_bands.safe_max_pf {
        warn(
            "recalibration.acceptance_slack",
            format!(
                "recalibration.acceptance_slack = {} exceeds the Safe band width ({})",
                r.acceptance_slack, s.risk_bands.safe_max_pf
            ),
        );
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("trials", "trials"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("critcal_percent", "critical_percent"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [simulation]
            trials = 500
            [simulation.risk_bands]
            safe_max_pf = 0.002
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"simulation".to_string()));
        assert!(keys.contains(&"simulation.trials".to_string()));
        assert!(keys.contains(&"simulation.risk_bands.safe_max_pf".to_string()));
    }

    #[test]
    fn test_typo_gets_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
            [detector]
            debounce_reading = 4
            "#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "detector.debounce_reading");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("detector.debounce_readings")
        );
    }

    #[test]
    fn test_tier_tables_not_flagged() {
        let warnings = validate_unknown_keys(
            r#"
            [[advisory.tiers]]
            name = "only"
            min_deviation_percent = 5.0
            capacity_uplift = 0.2
            cost_delta_fraction = 0.1
            "#,
        );
        assert!(warnings.is_empty(), "unexpected: {:?}", warnings);
    }

    #[test]
    fn test_range_warnings_for_low_trials() {
        let mut config = NexusConfig::default();
        assert!(validate_ranges(&config).is_empty());
        config.simulation.trials = 10;
        let warnings = validate_ranges(&config);
        assert!(warnings.iter().any(|w| w.field == "simulation.trials"));
    }
}

//! Design variants and their uncertain parameters

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Parameter distributions
// ============================================================================

/// Probability distribution of one uncertain design parameter.
///
/// Lognormal is given by the arithmetic mean and standard deviation of the
/// variable itself, not of its logarithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterDistribution {
    Normal { mean: f64, std_dev: f64 },
    Lognormal { mean: f64, std_dev: f64 },
    Uniform { min: f64, max: f64 },
    Triangular { min: f64, mode: f64, max: f64 },
}

impl ParameterDistribution {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ParameterDistribution::Normal { .. } => "normal",
            ParameterDistribution::Lognormal { .. } => "lognormal",
            ParameterDistribution::Uniform { .. } => "uniform",
            ParameterDistribution::Triangular { .. } => "triangular",
        }
    }

    /// Central value used as the design baseline.
    pub fn point_estimate(&self) -> f64 {
        match *self {
            ParameterDistribution::Normal { mean, .. } => mean,
            ParameterDistribution::Lognormal { mean, .. } => mean,
            ParameterDistribution::Uniform { min, max } => (min + max) / 2.0,
            ParameterDistribution::Triangular { min, mode, max } => (min + mode + max) / 3.0,
        }
    }

    /// Copy of this distribution moved so its point estimate equals `observed`.
    ///
    /// Normal and lognormal keep their coefficient of variation. Uniform and
    /// triangular keep their bounds relative to the point estimate. Fails
    /// when the current point estimate is zero, or when `observed` is not a
    /// usable centre for this kind.
    pub fn rebased(&self, observed: f64) -> Result<Self, &'static str> {
        let centre = self.point_estimate();
        if !observed.is_finite() || observed == 0.0 {
            return Err("observed value must be finite and non-zero");
        }
        if !centre.is_finite() || centre == 0.0 {
            return Err("design point estimate is zero");
        }
        if matches!(self, ParameterDistribution::Lognormal { .. }) && observed < 0.0 {
            return Err("lognormal mean must be > 0");
        }
        let ratio = (observed / centre).abs();
        let rebased = match *self {
            ParameterDistribution::Normal { std_dev, .. } => ParameterDistribution::Normal {
                mean: observed,
                std_dev: std_dev * ratio,
            },
            ParameterDistribution::Lognormal { std_dev, .. } => ParameterDistribution::Lognormal {
                mean: observed,
                std_dev: std_dev * ratio,
            },
            ParameterDistribution::Uniform { min, max } => ParameterDistribution::Uniform {
                min: observed - (centre - min) * ratio,
                max: observed + (max - centre) * ratio,
            },
            ParameterDistribution::Triangular { min, mode, max } => {
                ParameterDistribution::Triangular {
                    min: observed - (centre - min) * ratio,
                    mode: observed + (mode - centre) * ratio,
                    max: observed + (max - centre) * ratio,
                }
            }
        };
        Ok(rebased)
    }

    /// Same distribution with every location and spread term multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        match *self {
            ParameterDistribution::Normal { mean, std_dev } => ParameterDistribution::Normal {
                mean: mean * factor,
                std_dev: std_dev * factor.abs(),
            },
            ParameterDistribution::Lognormal { mean, std_dev } => ParameterDistribution::Lognormal {
                mean: mean * factor,
                std_dev: std_dev * factor.abs(),
            },
            ParameterDistribution::Uniform { min, max } => ParameterDistribution::Uniform {
                min: min * factor,
                max: max * factor,
            },
            ParameterDistribution::Triangular { min, mode, max } => {
                ParameterDistribution::Triangular {
                    min: min * factor,
                    mode: mode * factor,
                    max: max * factor,
                }
            }
        }
    }
}

/// How a parameter acts on the structure. Used by patch rules to decide
/// which parameters a reinforcement strengthens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterRole {
    /// Capacity side (soil bearing, member strength)
    Resistance,
    /// Demand side (applied load)
    Load,
    #[default]
    Other,
}

/// One uncertain input of a design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub distribution: ParameterDistribution,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub role: ParameterRole,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, distribution: ParameterDistribution, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            distribution,
            unit: unit.into(),
            role: ParameterRole::Other,
        }
    }

    pub fn normal(name: impl Into<String>, mean: f64, std_dev: f64, unit: impl Into<String>) -> Self {
        Self::new(name, ParameterDistribution::Normal { mean, std_dev }, unit)
    }

    pub fn lognormal(name: impl Into<String>, mean: f64, std_dev: f64, unit: impl Into<String>) -> Self {
        Self::new(name, ParameterDistribution::Lognormal { mean, std_dev }, unit)
    }

    pub fn uniform(name: impl Into<String>, min: f64, max: f64, unit: impl Into<String>) -> Self {
        Self::new(name, ParameterDistribution::Uniform { min, max }, unit)
    }

    pub fn triangular(
        name: impl Into<String>,
        min: f64,
        mode: f64,
        max: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self::new(name, ParameterDistribution::Triangular { min, mode, max }, unit)
    }

    pub fn with_role(mut self, role: ParameterRole) -> Self {
        self.role = role;
        self
    }

    pub fn point_estimate(&self) -> f64 {
        self.distribution.point_estimate()
    }

    pub fn rebased(&self, observed: f64) -> Result<Self, VariantError> {
        let distribution =
            self.distribution
                .rebased(observed)
                .map_err(|reason| VariantError::InvalidObserved {
                    metric: self.name.clone(),
                    value: observed,
                    reason,
                })?;
        Ok(Self {
            distribution,
            ..self.clone()
        })
    }
}

// ============================================================================
// Safety formulas
// ============================================================================

/// One realized parameter vector, in the variant's parameter order.
#[derive(Debug, Clone, Copy)]
pub struct RealizedParameters<'a> {
    specs: &'a [ParameterSpec],
    values: &'a [f64],
}

impl<'a> RealizedParameters<'a> {
    pub fn new(specs: &'a [ParameterSpec], values: &'a [f64]) -> Self {
        Self { specs, values }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.specs
            .iter()
            .position(|s| s.name == name)
            .and_then(|i| self.values.get(i).copied())
    }

    pub fn values(&self) -> &'a [f64] {
        self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.specs
            .iter()
            .map(|s| s.name.as_str())
            .zip(self.values.iter().copied())
    }
}

/// Deterministic mapping from realized parameters to a safety factor.
///
/// A missing parameter or an undefined ratio should yield a non-finite value;
/// the engine counts those trials as failures.
pub trait SafetyFormula: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Parameter names the formula reads. Checked when a variant is built.
    fn required_parameters(&self) -> Vec<String>;

    fn evaluate(&self, parameters: &RealizedParameters<'_>) -> f64;
}

/// Formulas that can be described in a design file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuiltinFormula {
    /// `capacity / demand`
    CapacityDemand { capacity: String, demand: String },
}

impl SafetyFormula for BuiltinFormula {
    fn name(&self) -> &str {
        match self {
            BuiltinFormula::CapacityDemand { .. } => "capacity_demand",
        }
    }

    fn required_parameters(&self) -> Vec<String> {
        match self {
            BuiltinFormula::CapacityDemand { capacity, demand } => {
                vec![capacity.clone(), demand.clone()]
            }
        }
    }

    fn evaluate(&self, parameters: &RealizedParameters<'_>) -> f64 {
        match self {
            BuiltinFormula::CapacityDemand { capacity, demand } => {
                match (parameters.get(capacity), parameters.get(demand)) {
                    (Some(c), Some(d)) => c / d,
                    _ => f64::NAN,
                }
            }
        }
    }
}

/// Formula backed by a closure, for designs assembled in code.
pub struct FnFormula<F> {
    name: String,
    required: Vec<String>,
    f: F,
}

impl<F> FnFormula<F>
where
    F: Fn(&RealizedParameters<'_>) -> f64 + Send + Sync,
{
    pub fn new(name: impl Into<String>, required: &[&str], f: F) -> Self {
        Self {
            name: name.into(),
            required: required.iter().map(|s| (*s).to_string()).collect(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnFormula<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFormula")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

impl<F> SafetyFormula for FnFormula<F>
where
    F: Fn(&RealizedParameters<'_>) -> f64 + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn required_parameters(&self) -> Vec<String> {
        self.required.clone()
    }

    fn evaluate(&self, parameters: &RealizedParameters<'_>) -> f64 {
        (self.f)(parameters)
    }
}

// ============================================================================
// Design variants
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VariantError {
    #[error("variant id must not be empty")]
    EmptyId,
    #[error("variant '{0}' has no parameters")]
    NoParameters(String),
    #[error("duplicate parameter '{0}'")]
    DuplicateParameter(String),
    #[error("formula '{formula}' requires parameter '{parameter}'")]
    MissingFormulaParameter { formula: String, parameter: String },
    #[error("baseline for '{metric}' must be finite and non-zero, got {value}")]
    InvalidBaseline { metric: String, value: f64 },
    #[error("cannot rebase '{metric}' to {value}: {reason}")]
    InvalidObserved {
        metric: String,
        value: f64,
        reason: &'static str,
    },
    #[error("cost estimate must be finite, got {0}")]
    InvalidCost(f64),
    #[error("variant '{0}' names no safety formula")]
    NoFormula(String),
}

/// A concrete candidate design. Immutable once built; patches produce new variants.
#[derive(Debug, Clone)]
pub struct DesignVariant {
    id: String,
    parameters: Vec<ParameterSpec>,
    formula: Arc<dyn SafetyFormula>,
    baselines: BTreeMap<String, f64>,
    cost_estimate: f64,
    rationale: String,
    parent: Option<String>,
}

impl DesignVariant {
    pub fn builder(id: impl Into<String>, formula: Arc<dyn SafetyFormula>) -> DesignVariantBuilder {
        DesignVariantBuilder {
            id: id.into(),
            parameters: Vec::new(),
            formula,
            baselines: BTreeMap::new(),
            cost_estimate: 0.0,
            rationale: String::new(),
            parent: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn formula(&self) -> &Arc<dyn SafetyFormula> {
        &self.formula
    }

    pub fn baselines(&self) -> &BTreeMap<String, f64> {
        &self.baselines
    }

    pub fn baseline(&self, metric: &str) -> Option<f64> {
        self.baselines.get(metric).copied()
    }

    pub fn cost_estimate(&self) -> f64 {
        self.cost_estimate
    }

    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Safety factor for one realized parameter vector.
    pub fn safety_factor(&self, values: &[f64]) -> f64 {
        self.formula
            .evaluate(&RealizedParameters::new(&self.parameters, values))
    }

    /// This design evaluated under a field condition: the parameter named
    /// `metric` is rebased so its point estimate equals `observed`. The id is
    /// unchanged; a metric that is not a parameter leaves the design as is.
    pub fn with_observed(&self, metric: &str, observed: f64) -> Result<DesignVariant, VariantError> {
        let mut rebased = self.clone();
        if let Some(spec) = rebased.parameters.iter_mut().find(|p| p.name == metric) {
            *spec = spec.rebased(observed)?;
            rebased.baselines.insert(metric.to_string(), observed);
        }
        Ok(rebased)
    }
}

impl Serialize for DesignVariant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            id: &'a str,
            parameters: &'a [ParameterSpec],
            formula: &'a str,
            baselines: &'a BTreeMap<String, f64>,
            cost_estimate: f64,
            rationale: &'a str,
            parent: Option<&'a str>,
        }

        View {
            id: &self.id,
            parameters: &self.parameters,
            formula: self.formula.name(),
            baselines: &self.baselines,
            cost_estimate: self.cost_estimate,
            rationale: &self.rationale,
            parent: self.parent.as_deref(),
        }
        .serialize(serializer)
    }
}

pub struct DesignVariantBuilder {
    id: String,
    parameters: Vec<ParameterSpec>,
    formula: Arc<dyn SafetyFormula>,
    baselines: BTreeMap<String, f64>,
    cost_estimate: f64,
    rationale: String,
    parent: Option<String>,
}

impl DesignVariantBuilder {
    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn parameters(mut self, specs: impl IntoIterator<Item = ParameterSpec>) -> Self {
        self.parameters.extend(specs);
        self
    }

    /// Override the baseline for one metric. Metrics without an override use
    /// the matching parameter's point estimate.
    pub fn baseline(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.baselines.insert(metric.into(), value);
        self
    }

    pub fn cost_estimate(mut self, cost: f64) -> Self {
        self.cost_estimate = cost;
        self
    }

    pub fn rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn build(self) -> Result<DesignVariant, VariantError> {
        if self.id.trim().is_empty() {
            return Err(VariantError::EmptyId);
        }
        if self.parameters.is_empty() {
            return Err(VariantError::NoParameters(self.id));
        }

        let mut seen = HashSet::new();
        for spec in &self.parameters {
            if !seen.insert(spec.name.as_str()) {
                return Err(VariantError::DuplicateParameter(spec.name.clone()));
            }
        }

        for required in self.formula.required_parameters() {
            if !seen.contains(required.as_str()) {
                return Err(VariantError::MissingFormulaParameter {
                    formula: self.formula.name().to_string(),
                    parameter: required,
                });
            }
        }

        if !self.cost_estimate.is_finite() {
            return Err(VariantError::InvalidCost(self.cost_estimate));
        }

        let mut baselines = self.baselines;
        for spec in &self.parameters {
            baselines
                .entry(spec.name.clone())
                .or_insert_with(|| spec.point_estimate());
        }
        for (metric, &value) in &baselines {
            if !value.is_finite() || value == 0.0 {
                return Err(VariantError::InvalidBaseline {
                    metric: metric.clone(),
                    value,
                });
            }
        }

        Ok(DesignVariant {
            id: self.id,
            parameters: self.parameters,
            formula: self.formula,
            baselines,
            cost_estimate: self.cost_estimate,
            rationale: self.rationale,
            parent: self.parent,
        })
    }
}

/// Serializable description of a variant; the formula may be omitted when a
/// draft patches an existing design and inherits its formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDraft {
    pub id: String,
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub formula: Option<BuiltinFormula>,
    #[serde(default)]
    pub baselines: BTreeMap<String, f64>,
    #[serde(default)]
    pub cost_estimate: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub parent: Option<String>,
}

impl VariantDraft {
    /// Build the variant, using `fallback` when the draft names no formula.
    pub fn into_variant(
        self,
        fallback: Option<Arc<dyn SafetyFormula>>,
    ) -> Result<DesignVariant, VariantError> {
        let formula: Arc<dyn SafetyFormula> = match (self.formula, fallback) {
            (Some(builtin), _) => Arc::new(builtin),
            (None, Some(inherited)) => inherited,
            (None, None) => return Err(VariantError::NoFormula(self.id)),
        };

        let mut builder = DesignVariant::builder(self.id, formula)
            .parameters(self.parameters)
            .cost_estimate(self.cost_estimate)
            .rationale(self.rationale);
        for (metric, value) in self.baselines {
            builder = builder.baseline(metric, value);
        }
        if let Some(parent) = self.parent {
            builder = builder.parent(parent);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio() -> Arc<dyn SafetyFormula> {
        Arc::new(BuiltinFormula::CapacityDemand {
            capacity: "capacity".to_string(),
            demand: "demand".to_string(),
        })
    }

    #[test]
    fn test_point_estimates() {
        assert_eq!(ParameterDistribution::Normal { mean: 150.0, std_dev: 10.0 }.point_estimate(), 150.0);
        assert_eq!(ParameterDistribution::Uniform { min: 10.0, max: 20.0 }.point_estimate(), 15.0);
        assert_eq!(
            ParameterDistribution::Triangular { min: 0.0, mode: 3.0, max: 6.0 }.point_estimate(),
            3.0
        );
    }

    #[test]
    fn test_rebased_keeps_coefficient_of_variation() {
        let d = ParameterDistribution::Normal { mean: 150.0, std_dev: 15.0 }
            .rebased(120.0)
            .unwrap();
        match d {
            ParameterDistribution::Normal { mean, std_dev } => {
                assert_eq!(mean, 120.0);
                assert!((std_dev - 12.0).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rebased_uniform_scales_width() {
        let d = ParameterDistribution::Uniform { min: 90.0, max: 110.0 }
            .rebased(50.0)
            .unwrap();
        assert_eq!(d, ParameterDistribution::Uniform { min: 45.0, max: 55.0 });
    }

    #[test]
    fn test_build_defaults_baselines_to_point_estimates() {
        let v = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
            .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa"))
            .baseline("settlement", 12.0)
            .build()
            .unwrap();

        assert_eq!(v.baseline("capacity"), Some(150.0));
        assert_eq!(v.baseline("demand"), Some(100.0));
        assert_eq!(v.baseline("settlement"), Some(12.0));
        assert!((v.safety_factor(&[150.0, 100.0]) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_build_rejects_duplicate_and_missing_parameters() {
        let dup = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
            .parameter(ParameterSpec::normal("capacity", 140.0, 10.0, "kPa"))
            .build();
        assert_eq!(dup.unwrap_err(), VariantError::DuplicateParameter("capacity".to_string()));

        let missing = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
            .build();
        assert!(matches!(missing, Err(VariantError::MissingFormulaParameter { .. })));
    }

    #[test]
    fn test_build_rejects_zero_baseline() {
        let result = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
            .parameter(ParameterSpec::normal("demand", 0.0, 1.0, "kPa"))
            .build();
        assert!(matches!(result, Err(VariantError::InvalidBaseline { .. })));
    }

    #[test]
    fn test_with_observed_rebases_only_named_parameter() {
        let v = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::normal("capacity", 150.0, 10.0, "kPa"))
            .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa"))
            .build()
            .unwrap();

        let field = v.with_observed("capacity", 120.0).unwrap();
        assert_eq!(field.id(), "V1");
        assert_eq!(field.baseline("capacity"), Some(120.0));
        assert_eq!(field.parameter("demand"), v.parameter("demand"));
        assert_eq!(v.baseline("capacity"), Some(150.0));
    }

    #[test]
    fn test_with_observed_rejects_unusable_field_values() {
        let v = DesignVariant::builder("V1", ratio())
            .parameter(ParameterSpec::lognormal("capacity", 150.0, 15.0, "kPa"))
            .parameter(ParameterSpec::normal("demand", 100.0, 0.0, "kPa"))
            .build()
            .unwrap();

        for observed in [0.0, -20.0, f64::NAN] {
            match v.with_observed("capacity", observed) {
                Err(VariantError::InvalidObserved { metric, .. }) => assert_eq!(metric, "capacity"),
                other => panic!("field value {observed} accepted: {other:?}"),
            }
        }
        let err = v.with_observed("capacity", -20.0).unwrap_err();
        assert!(err.to_string().contains("'capacity'"), "{err}");

        // Normal parameters may move below zero, but never rebase from a zero centre
        assert!(v.with_observed("demand", -5.0).is_ok());
        let zero = ParameterSpec::normal("offset", 0.0, 1.0, "mm");
        assert!(matches!(
            zero.rebased(3.0),
            Err(VariantError::InvalidObserved { reason: "design point estimate is zero", .. })
        ));
    }

    #[test]
    fn test_draft_inherits_formula() {
        let draft: VariantDraft = serde_json::from_str(
            r#"{
                "id": "V1-patch",
                "parameters": [
                    {"name": "capacity", "distribution": {"kind": "normal", "mean": 180.0, "std_dev": 10.0}, "unit": "kPa"},
                    {"name": "demand", "distribution": {"kind": "normal", "mean": 100.0, "std_dev": 0.0}}
                ],
                "cost_estimate": 1.18
            }"#,
        )
        .unwrap();

        assert!(draft.clone().into_variant(None).is_err());
        let v = draft.into_variant(Some(ratio())).unwrap();
        assert_eq!(v.formula().name(), "capacity_demand");
        assert_eq!(v.cost_estimate(), 1.18);
    }
}

//! Project configuration and named-parameter access for tuning.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Everything needed to generate and run one simulated project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Development effort available per sprint.
    pub dev_effort: f64,
    /// Testing effort available per sprint.
    pub test_effort: f64,
    /// Probability in [0,1] that completing a feature causes a regression.
    pub regression_risk: f64,
    /// Smallest generated feature size; sizes are whole numbers.
    pub min_feature_size: f64,
    /// Largest generated feature size.
    pub max_feature_size: f64,
    /// Smallest generated feature complexity; whole numbers as well.
    pub min_feature_complexity: f64,
    /// Largest generated feature complexity.
    pub max_feature_complexity: f64,
    /// Number of generated features (> 0).
    pub feature_count: u32,
    /// Upper bound in [0,1] for defect stealth.
    pub max_stealth: f64,
    /// Weight of the effort-to-size ratio in detection.
    pub test_effort_coefficient: f64,
    /// Detection multiplier when test and defect categories differ.
    pub test_type_coefficient: f64,
    /// How strongly missing knowledge suppresses detection.
    pub test_knowledge_coefficient: f64,
    /// Upper bound for direct defects generated per completed feature.
    pub max_defects_per_feature: u32,
    /// Sprints executed before the release deadline.
    pub max_sprints: u32,
    /// Total severity of unfixed defects tolerated at release.
    pub max_escaped_severity: f64,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            dev_effort: 20.0,
            test_effort: 10.0,
            regression_risk: 0.2,
            min_feature_size: 2.0,
            max_feature_size: 8.0,
            min_feature_complexity: 1.0,
            max_feature_complexity: 5.0,
            feature_count: 10,
            max_stealth: 0.6,
            test_effort_coefficient: 1.0,
            test_type_coefficient: 0.2,
            test_knowledge_coefficient: 1.0,
            max_defects_per_feature: 3,
            max_sprints: 20,
            max_escaped_severity: 12.0,
        }
    }
}

impl ProjectConfig {
    /// Names accepted by [`ProjectConfig::get`] and [`ProjectConfig::set`].
    pub const PARAMETERS: [&'static str; 15] = [
        "dev_effort",
        "test_effort",
        "regression_risk",
        "min_feature_size",
        "max_feature_size",
        "min_feature_complexity",
        "max_feature_complexity",
        "feature_count",
        "max_stealth",
        "test_effort_coefficient",
        "test_type_coefficient",
        "test_knowledge_coefficient",
        "max_defects_per_feature",
        "max_sprints",
        "max_escaped_severity",
    ];

    /// Check cross-field consistency before a project is generated.
    pub fn validate(&self) -> Result<(), SimError> {
        let numbers = [
            self.dev_effort,
            self.test_effort,
            self.regression_risk,
            self.min_feature_size,
            self.max_feature_size,
            self.min_feature_complexity,
            self.max_feature_complexity,
            self.max_stealth,
            self.test_effort_coefficient,
            self.test_type_coefficient,
            self.test_knowledge_coefficient,
            self.max_escaped_severity,
        ];
        if numbers.iter().any(|v| !v.is_finite()) {
            return Err(SimError::InvalidConfig("non-finite value".into()));
        }
        if self.feature_count == 0 {
            return Err(SimError::InvalidFeatureCount);
        }
        if self.dev_effort < 0.0 {
            return Err(SimError::NegativeEffort(self.dev_effort));
        }
        if self.test_effort < 0.0 {
            return Err(SimError::NegativeEffort(self.test_effort));
        }
        if !(0.0..=1.0).contains(&self.regression_risk) {
            return Err(SimError::InvalidConfig("regression_risk must be within [0,1]".into()));
        }
        if !(0.0..=1.0).contains(&self.max_stealth) {
            return Err(SimError::InvalidConfig("max_stealth must be within [0,1]".into()));
        }
        if self.min_feature_size < 1.0 || self.min_feature_size > self.max_feature_size {
            return Err(SimError::InvalidConfig(
                "feature size bounds must satisfy 1 <= min <= max".into(),
            ));
        }
        if self.min_feature_complexity < 1.0
            || self.min_feature_complexity > self.max_feature_complexity
        {
            return Err(SimError::InvalidConfig(
                "feature complexity bounds must satisfy 1 <= min <= max".into(),
            ));
        }
        if self.max_defects_per_feature == 0 {
            return Err(SimError::InvalidConfig("max_defects_per_feature must be > 0".into()));
        }
        if self.max_sprints == 0 {
            return Err(SimError::InvalidConfig("max_sprints must be > 0".into()));
        }
        if self.test_effort_coefficient < 0.0
            || self.test_type_coefficient < 0.0
            || self.test_knowledge_coefficient < 0.0
        {
            return Err(SimError::InvalidConfig("coefficients must be >= 0".into()));
        }
        Ok(())
    }

    /// Read a parameter by name as a float.
    pub fn get(&self, name: &str) -> Option<f64> {
        let v = match name {
            "dev_effort" => self.dev_effort,
            "test_effort" => self.test_effort,
            "regression_risk" => self.regression_risk,
            "min_feature_size" => self.min_feature_size,
            "max_feature_size" => self.max_feature_size,
            "min_feature_complexity" => self.min_feature_complexity,
            "max_feature_complexity" => self.max_feature_complexity,
            "feature_count" => f64::from(self.feature_count),
            "max_stealth" => self.max_stealth,
            "test_effort_coefficient" => self.test_effort_coefficient,
            "test_type_coefficient" => self.test_type_coefficient,
            "test_knowledge_coefficient" => self.test_knowledge_coefficient,
            "max_defects_per_feature" => f64::from(self.max_defects_per_feature),
            "max_sprints" => f64::from(self.max_sprints),
            "max_escaped_severity" => self.max_escaped_severity,
            _ => return None,
        };
        Some(v)
    }

    /// Write a parameter by name. Integer parameters are rounded and
    /// saturate at 0.
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), SimError> {
        let as_count = |v: f64| v.round().clamp(0.0, f64::from(u32::MAX)) as u32;
        match name {
            "dev_effort" => self.dev_effort = value,
            "test_effort" => self.test_effort = value,
            "regression_risk" => self.regression_risk = value,
            "min_feature_size" => self.min_feature_size = value,
            "max_feature_size" => self.max_feature_size = value,
            "min_feature_complexity" => self.min_feature_complexity = value,
            "max_feature_complexity" => self.max_feature_complexity = value,
            "feature_count" => self.feature_count = as_count(value),
            "max_stealth" => self.max_stealth = value,
            "test_effort_coefficient" => self.test_effort_coefficient = value,
            "test_type_coefficient" => self.test_type_coefficient = value,
            "test_knowledge_coefficient" => self.test_knowledge_coefficient = value,
            "max_defects_per_feature" => self.max_defects_per_feature = as_count(value),
            "max_sprints" => self.max_sprints = as_count(value),
            "max_escaped_severity" => self.max_escaped_severity = value,
            _ => return Err(SimError::UnknownParameter(name.to_string())),
        }
        Ok(())
    }
}

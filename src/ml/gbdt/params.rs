use serde::{Deserialize, Serialize};

/// Ensemble shape searched over by the tuner. Immutable once sampled for a trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSet {
    /// Maximum depth of each tree (root has depth 0).
    pub max_depth: u32,
    /// Shrinkage applied to every leaf value.
    pub learning_rate: f64,
    /// Number of boosting rounds.
    pub n_estimators: u32,
}

impl HyperparameterSet {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.n_estimators == 0 {
            return Err("n_estimators must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for HyperparameterSet {
    fn default() -> Self {
        Self {
            max_depth: 6,
            learning_rate: 0.3,
            n_estimators: 100,
        }
    }
}

/// Fixed booster settings that are not part of the search space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterOptions {
    /// L2 regularization on leaf weights.
    pub lambda: f64,
    /// Maximum number of histogram bins per feature.
    pub max_bins: usize,
    /// Minimum training rows per leaf.
    pub min_samples_leaf: usize,
    /// Minimum loss reduction required to split.
    pub min_split_gain: f64,
}

impl Default for BoosterOptions {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            max_bins: 64,
            min_samples_leaf: 1,
            min_split_gain: 0.0,
        }
    }
}

impl BoosterOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.lambda.is_finite() && self.lambda >= 0.0) {
            return Err(format!("lambda must be non-negative, got {}", self.lambda));
        }
        if !(2..=u16::MAX as usize).contains(&self.max_bins) {
            return Err(format!("max_bins must be in [2, 65535], got {}", self.max_bins));
        }
        if self.min_samples_leaf == 0 {
            return Err("min_samples_leaf must be at least 1".to_string());
        }
        if !(self.min_split_gain.is_finite() && self.min_split_gain >= 0.0) {
            return Err(format!(
                "min_split_gain must be non-negative, got {}",
                self.min_split_gain
            ));
        }
        Ok(())
    }
}

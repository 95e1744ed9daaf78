use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ml::gbdt::HyperparameterSet;

/// Number of searched dimensions (depth, learning rate, tree count).
pub const SPACE_DIMS: usize = 3;

/// Inclusive bounds for every searched hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSpace {
    pub max_depth: (u32, u32),
    pub learning_rate: (f64, f64),
    pub n_estimators: (u32, u32),
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            max_depth: (3, 10),
            learning_rate: (0.01, 0.3),
            n_estimators: (50, 300),
        }
    }
}

impl SearchSpace {
    pub fn validate(&self) -> Result<(), String> {
        let (d_lo, d_hi) = self.max_depth;
        if d_lo == 0 || d_lo > d_hi {
            return Err(format!("invalid max_depth range [{d_lo}, {d_hi}]"));
        }
        let (lr_lo, lr_hi) = self.learning_rate;
        if !(lr_lo.is_finite() && lr_hi.is_finite() && lr_lo > 0.0 && lr_lo <= lr_hi) {
            return Err(format!("invalid learning_rate range [{lr_lo}, {lr_hi}]"));
        }
        let (n_lo, n_hi) = self.n_estimators;
        if n_lo == 0 || n_lo > n_hi {
            return Err(format!("invalid n_estimators range [{n_lo}, {n_hi}]"));
        }
        Ok(())
    }

    pub fn contains(&self, params: &HyperparameterSet) -> bool {
        (self.max_depth.0..=self.max_depth.1).contains(&params.max_depth)
            && (self.learning_rate.0..=self.learning_rate.1).contains(&params.learning_rate)
            && (self.n_estimators.0..=self.n_estimators.1).contains(&params.n_estimators)
    }

    /// Map a point of the unit cube onto the space.
    ///
    /// Integer dimensions split `[0, 1]` into equal-width buckets, one per value.
    pub fn denormalize(&self, point: &[f64; SPACE_DIMS]) -> HyperparameterSet {
        let (lr_lo, lr_hi) = self.learning_rate;
        let learning_rate = (lr_lo + point[1].clamp(0.0, 1.0) * (lr_hi - lr_lo)).clamp(lr_lo, lr_hi);
        HyperparameterSet {
            max_depth: int_from_unit(point[0], self.max_depth),
            learning_rate,
            n_estimators: int_from_unit(point[2], self.n_estimators),
        }
    }

    /// Inverse of [`denormalize`](Self::denormalize); integers map to bucket centers.
    pub fn normalize(&self, params: &HyperparameterSet) -> [f64; SPACE_DIMS] {
        let (lr_lo, lr_hi) = self.learning_rate;
        let lr = if lr_hi > lr_lo {
            (params.learning_rate - lr_lo) / (lr_hi - lr_lo)
        } else {
            0.5
        };
        [
            unit_from_int(params.max_depth, self.max_depth),
            lr.clamp(0.0, 1.0),
            unit_from_int(params.n_estimators, self.n_estimators),
        ]
    }

    /// Uniform random point of the unit cube.
    pub fn sample_unit<R: Rng>(rng: &mut R) -> [f64; SPACE_DIMS] {
        [rng.random(), rng.random(), rng.random()]
    }
}

fn int_from_unit(u: f64, (low, high): (u32, u32)) -> u32 {
    let span = f64::from(high - low + 1);
    let offset = (u.clamp(0.0, 1.0) * span).floor() as u32;
    (low + offset).min(high)
}

fn unit_from_int(value: u32, (low, high): (u32, u32)) -> f64 {
    let span = f64::from(high - low + 1);
    let offset = f64::from(value.clamp(low, high) - low);
    ((offset + 0.5) / span).clamp(0.0, 1.0)
}

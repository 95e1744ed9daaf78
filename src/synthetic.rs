//! Deterministic synthetic applicant data with a known labeling rule.
//!
//! Every field is drawn independently from the distribution declared by
//! [`Feature::sampling`], and the label is [`SYNTHETIC_LABEL_RULE`] applied to the drawn
//! features. The output is a pure function of `(n, seed)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::schema::{FEATURE_COUNT, Feature, FeatureVector, SYNTHETIC_LABEL_RULE, Sampling};

/// Rows generated when no count is given.
pub const DEFAULT_ROWS: usize = 1_000;
/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 42;

/// Feature vector with its binary creditworthiness label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledExample {
    pub features: FeatureVector,
    /// `1` when creditworthy.
    pub label: u8,
}

/// Generate `n` labeled examples from `seed`.
pub fn generate(n: usize, seed: u64) -> Vec<LabeledExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let mut values = [0.0; FEATURE_COUNT];
        for feature in Feature::ALL {
            values[feature.index()] = draw(feature.sampling(), &mut rng);
        }
        let features = FeatureVector::new_unchecked(values);
        let label = SYNTHETIC_LABEL_RULE.label(&features);
        out.push(LabeledExample { features, label });
    }
    out
}

fn draw(sampling: Sampling, rng: &mut StdRng) -> f64 {
    match sampling {
        Sampling::IntRange { low, high } => rng.random_range(low..high) as f64,
        Sampling::Choice(choices) => choices[rng.random_range(0..choices.len())] as f64,
        Sampling::RoundedUniform {
            low,
            high,
            decimals,
        } => {
            let scale = 10f64.powi(decimals);
            (rng.random_range(low..high) * scale).round() / scale
        }
    }
}

/// Fraction of positive labels, or `0.0` for an empty slice.
pub fn positive_rate(examples: &[LabeledExample]) -> f64 {
    if examples.is_empty() {
        return 0.0;
    }
    let positives = examples.iter().filter(|ex| ex.label == 1).count();
    positives as f64 / examples.len() as f64
}

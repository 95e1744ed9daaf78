use thiserror::Error;

use super::model::{GbdtModel, Tree, TreeNode, sigmoid};
use super::params::{BoosterOptions, HyperparameterSet};
use crate::schema::FEATURE_COUNT;
use crate::synthetic::LabeledExample;

const MIN_HESSIAN: f64 = 1e-16;
const PRIOR_CLAMP: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainError {
    /// No training rows were supplied.
    #[error("training set is empty")]
    EmptyDataset,
    /// Hyperparameters failed validation.
    #[error("invalid hyperparameters: {0}")]
    InvalidHyperparameters(String),
    /// Booster options failed validation.
    #[error("invalid booster options: {0}")]
    InvalidOptions(String),
    /// Boosting produced a non-finite margin.
    #[error("training diverged: {0}")]
    Diverged(String),
}

/// Train a binary gradient-boosted tree ensemble with logistic loss.
///
/// Trees are grown depth-first on histogram bins; leaf weights are Newton steps
/// `-G / (H + lambda)` scaled by the learning rate. Training is fully deterministic.
pub fn train_gbdt(
    examples: &[LabeledExample],
    params: &HyperparameterSet,
    options: &BoosterOptions,
) -> Result<GbdtModel, TrainError> {
    params
        .validate()
        .map_err(TrainError::InvalidHyperparameters)?;
    options.validate().map_err(TrainError::InvalidOptions)?;
    if examples.is_empty() {
        return Err(TrainError::EmptyDataset);
    }

    let rows: Vec<&[f64]> = examples.iter().map(|ex| ex.features.as_slice()).collect();
    let targets: Vec<f64> = examples.iter().map(|ex| f64::from(ex.label)).collect();
    let bins = FeatureBins::fit(&rows, options.max_bins);

    let base_margin = prior_log_odds(&targets);
    let mut margins = vec![base_margin; rows.len()];
    let mut grad = vec![0.0f64; rows.len()];
    let mut hess = vec![0.0f64; rows.len()];

    let builder = TreeBuilder {
        bins: &bins,
        params,
        options,
    };
    let mut trees = Vec::with_capacity(params.n_estimators as usize);
    for round in 0..params.n_estimators {
        for i in 0..rows.len() {
            let p = sigmoid(margins[i]);
            grad[i] = p - targets[i];
            hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
        }
        let all: Vec<usize> = (0..rows.len()).collect();
        let root = builder.grow(all, &grad, &hess, 0);
        let tree = Tree { root };
        for (margin, row) in margins.iter_mut().zip(&rows) {
            *margin += tree.predict(row);
        }
        if margins.iter().any(|m| !m.is_finite()) {
            return Err(TrainError::Diverged(format!(
                "non-finite margin after round {round}"
            )));
        }
        trees.push(tree);
    }

    Ok(GbdtModel {
        feature_count: FEATURE_COUNT,
        hyperparameters: *params,
        options: *options,
        base_margin,
        trees,
    })
}

fn prior_log_odds(targets: &[f64]) -> f64 {
    let mean = targets.iter().sum::<f64>() / targets.len().max(1) as f64;
    let p = mean.clamp(PRIOR_CLAMP, 1.0 - PRIOR_CLAMP);
    (p / (1.0 - p)).ln()
}

/// Per-feature candidate thresholds and the bin code of every training row.
struct FeatureBins {
    /// `thresholds[f]` is sorted ascending; bin `b` holds values `<= thresholds[f][b]`.
    thresholds: Vec<Vec<f64>>,
    /// `codes[f][row]` is the bin of `row` for feature `f`.
    codes: Vec<Vec<u16>>,
}

impl FeatureBins {
    fn fit(rows: &[&[f64]], max_bins: usize) -> Self {
        let mut thresholds = Vec::with_capacity(FEATURE_COUNT);
        let mut codes = Vec::with_capacity(FEATURE_COUNT);
        for feature in 0..FEATURE_COUNT {
            let column: Vec<f64> = rows.iter().map(|row| row[feature]).collect();
            let cuts = candidate_thresholds(&column, max_bins);
            let feature_codes = column
                .iter()
                .map(|&v| cuts.partition_point(|&t| t < v) as u16)
                .collect();
            thresholds.push(cuts);
            codes.push(feature_codes);
        }
        Self { thresholds, codes }
    }

    fn bin_count(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }
}

/// Midpoints between adjacent distinct values, thinned to quantiles when there are more
/// distinct values than bins.
fn candidate_thresholds(column: &[f64], max_bins: usize) -> Vec<f64> {
    let mut sorted = column.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }
    let mut cuts: Vec<f64> = Vec::with_capacity(max_bins - 1);
    for k in 1..max_bins {
        let value = sorted[k * sorted.len() / max_bins];
        let pos = distinct.partition_point(|&d| d < value);
        if pos == 0 {
            continue;
        }
        let cut = (distinct[pos - 1] + distinct[pos]) / 2.0;
        if cuts.last().is_none_or(|&last| cut > last) {
            cuts.push(cut);
        }
    }
    cuts
}

#[derive(Debug, Clone, Copy, Default)]
struct GradStats {
    count: usize,
    grad: f64,
    hess: f64,
}

impl GradStats {
    fn add(&mut self, g: f64, h: f64) {
        self.count += 1;
        self.grad += g;
        self.hess += h;
    }

    fn minus(&self, other: &GradStats) -> GradStats {
        GradStats {
            count: self.count - other.count,
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
        }
    }

    fn score(&self, lambda: f64) -> f64 {
        self.grad * self.grad / (self.hess + lambda)
    }
}

#[derive(Debug, Clone)]
struct BestSplit {
    gain: f64,
    feature: usize,
    bin: usize,
}

struct TreeBuilder<'a> {
    bins: &'a FeatureBins,
    params: &'a HyperparameterSet,
    options: &'a BoosterOptions,
}

impl TreeBuilder<'_> {
    fn grow(&self, rows: Vec<usize>, grad: &[f64], hess: &[f64], depth: u32) -> TreeNode {
        let mut total = GradStats::default();
        for &i in &rows {
            total.add(grad[i], hess[i]);
        }
        let cover = rows.len() as f64;
        let can_split = depth < self.params.max_depth
            && rows.len() >= 2 * self.options.min_samples_leaf;
        let best = if can_split {
            self.best_split(&rows, grad, hess, &total)
        } else {
            None
        };
        let Some(best) = best else {
            return TreeNode::Leaf {
                value: self.leaf_value(&total),
                cover,
            };
        };

        let codes = &self.bins.codes[best.feature];
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| codes[i] as usize <= best.bin);
        TreeNode::Split {
            feature: best.feature,
            threshold: self.bins.thresholds[best.feature][best.bin],
            cover,
            left: Box::new(self.grow(left_rows, grad, hess, depth + 1)),
            right: Box::new(self.grow(right_rows, grad, hess, depth + 1)),
        }
    }

    fn leaf_value(&self, stats: &GradStats) -> f64 {
        -stats.grad / (stats.hess + self.options.lambda) * self.params.learning_rate
    }

    fn best_split(
        &self,
        rows: &[usize],
        grad: &[f64],
        hess: &[f64],
        total: &GradStats,
    ) -> Option<BestSplit> {
        let lambda = self.options.lambda;
        let parent_score = total.score(lambda);
        let min_leaf = self.options.min_samples_leaf;
        let mut best: Option<BestSplit> = None;

        for feature in 0..FEATURE_COUNT {
            let n_bins = self.bins.bin_count(feature);
            if n_bins < 2 {
                continue;
            }
            let codes = &self.bins.codes[feature];
            let mut histogram = vec![GradStats::default(); n_bins];
            for &i in rows {
                histogram[codes[i] as usize].add(grad[i], hess[i]);
            }

            let mut left = GradStats::default();
            for (bin, stats) in histogram.iter().enumerate().take(n_bins - 1) {
                left.count += stats.count;
                left.grad += stats.grad;
                left.hess += stats.hess;
                let right = total.minus(&left);
                if left.count < min_leaf || right.count < min_leaf {
                    continue;
                }
                let gain =
                    0.5 * (left.score(lambda) + right.score(lambda) - parent_score);
                if gain <= self.options.min_split_gain || !gain.is_finite() {
                    continue;
                }
                if best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(BestSplit { gain, feature, bin });
                }
            }
        }
        best
    }
}

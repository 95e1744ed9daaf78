//! Exact Shapley attribution for the boosted ensemble.
//!
//! Attributions live in margin (log-odds) space, where the ensemble is additive:
//! `baseline + sum(contributions) == margin`. The baseline is the ensemble's expected
//! margin over its training rows, taken from node covers.

mod tree_shap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::ml::gbdt::{GbdtModel, Tree, TreeNode, sigmoid};
use crate::schema::{FEATURE_COUNT, Feature, FeatureVector};

/// Largest tolerated `|baseline + sum - margin|`.
pub const ADDITIVITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributionError {
    /// A contribution overflowed or became NaN.
    #[error("attribution for `{feature}` is not finite")]
    NonFinite { feature: &'static str },
    /// Baseline plus contributions missed the margin by more than [`ADDITIVITY_TOLERANCE`].
    #[error("attributions do not add up to the margin (residual {residual:e})")]
    AdditivityViolation { residual: f64 },
    /// A split has no training cover, so expectations are undefined.
    #[error("tree {tree} has a split with zero cover")]
    DegenerateCover { tree: usize },
    /// Global importance was requested for zero rows.
    #[error("cannot summarize an empty batch")]
    EmptyBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: Feature,
    pub value: f64,
}

/// Additive decomposition of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    /// Expected margin of the ensemble.
    pub baseline: f64,
    /// Margin of the explained instance.
    pub margin: f64,
    /// One entry per feature, in schema order.
    pub contributions: Vec<FeatureContribution>,
}

impl Attribution {
    pub fn contribution(&self, feature: Feature) -> f64 {
        self.contributions
            .iter()
            .find(|c| c.feature == feature)
            .map_or(0.0, |c| c.value)
    }

    pub fn sum(&self) -> f64 {
        self.contributions.iter().map(|c| c.value).sum()
    }

    /// `baseline + sum - margin`.
    pub fn residual(&self) -> f64 {
        self.baseline + self.sum() - self.margin
    }

    /// Creditworthy probability implied by the margin.
    pub fn probability(&self) -> f64 {
        sigmoid(self.margin)
    }

    /// Contributions by descending magnitude; ties keep schema order.
    pub fn ranked(&self) -> Vec<FeatureContribution> {
        let mut ranked = self.contributions.clone();
        ranked.sort_by(|a, b| b.value.abs().total_cmp(&a.value.abs()));
        ranked
    }
}

/// Attribution of a single tree at `x`, indexed by feature position.
pub fn explain_tree(tree: &Tree, x: &FeatureVector) -> [f64; FEATURE_COUNT] {
    let mut phi = [0.0; FEATURE_COUNT];
    tree_shap::accumulate(&tree.root, x.as_slice(), &mut phi);
    phi
}

/// Exact local attribution of `model` at `x`.
///
/// Pure function of its inputs; nothing is cached between calls.
pub fn explain_local(model: &GbdtModel, x: &FeatureVector) -> Result<Attribution, AttributionError> {
    let mut phi = [0.0; FEATURE_COUNT];
    let mut baseline = model.base_margin;
    for (idx, tree) in model.trees.iter().enumerate() {
        if has_zero_cover_split(&tree.root) {
            return Err(AttributionError::DegenerateCover { tree: idx });
        }
        tree_shap::accumulate(&tree.root, x.as_slice(), &mut phi);
        baseline += tree.root.expected_value();
    }

    let contributions: Vec<FeatureContribution> = Feature::ALL
        .iter()
        .map(|&feature| FeatureContribution {
            feature,
            value: phi[feature.index()],
        })
        .collect();
    if let Some(bad) = contributions.iter().find(|c| !c.value.is_finite()) {
        return Err(AttributionError::NonFinite {
            feature: bad.feature.name(),
        });
    }

    let attribution = Attribution {
        baseline,
        margin: model.predict_margin(x.as_slice()),
        contributions,
    };
    let residual = attribution.residual();
    if !(residual.abs() <= ADDITIVITY_TOLERANCE) {
        return Err(AttributionError::AdditivityViolation { residual });
    }
    Ok(attribution)
}

fn has_zero_cover_split(node: &TreeNode) -> bool {
    match node {
        TreeNode::Leaf { .. } => false,
        TreeNode::Split {
            cover, left, right, ..
        } => !(*cover > 0.0) || has_zero_cover_split(left) || has_zero_cover_split(right),
    }
}

/// Importance of one feature over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: Feature,
    /// Mean absolute contribution, the ranking key.
    pub mean_abs: f64,
    /// Mean signed contribution.
    pub mean: f64,
    /// 1-based rank, 1 = most important.
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    pub rows: usize,
    pub baseline: f64,
    /// Ordered by rank.
    pub features: Vec<FeatureImportance>,
}

impl GlobalImportance {
    pub fn render(&self) -> String {
        let mut lines = vec![format!(
            "global importance over {} rows (baseline margin {:.4})",
            self.rows, self.baseline
        )];
        for item in &self.features {
            lines.push(format!(
                "{:>2}. {:<24} mean|phi|={:.4}  mean phi={:+.4}",
                item.rank,
                item.feature.name(),
                item.mean_abs,
                item.mean
            ));
        }
        lines.join("\n")
    }
}

/// Mean absolute attribution per feature over `batch`, ranked descending.
pub fn explain_global(
    model: &GbdtModel,
    batch: &[FeatureVector],
) -> Result<GlobalImportance, AttributionError> {
    if batch.is_empty() {
        return Err(AttributionError::EmptyBatch);
    }
    let mut abs_sum = [0.0; FEATURE_COUNT];
    let mut sum = [0.0; FEATURE_COUNT];
    let mut baseline = 0.0;
    for x in batch {
        let attribution = explain_local(model, x)?;
        baseline = attribution.baseline;
        for contribution in &attribution.contributions {
            let idx = contribution.feature.index();
            abs_sum[idx] += contribution.value.abs();
            sum[idx] += contribution.value;
        }
    }

    let n = batch.len() as f64;
    let mut features: Vec<FeatureImportance> = Feature::ALL
        .iter()
        .map(|&feature| FeatureImportance {
            feature,
            mean_abs: abs_sum[feature.index()] / n,
            mean: sum[feature.index()] / n,
            rank: 0,
        })
        .collect();
    features.sort_by(|a, b| b.mean_abs.total_cmp(&a.mean_abs));
    for (idx, item) in features.iter_mut().enumerate() {
        item.rank = idx + 1;
    }
    debug!(
        "Global importance over {} rows, top feature {}",
        batch.len(),
        features[0].feature.name()
    );
    Ok(GlobalImportance {
        rows: batch.len(),
        baseline,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gbdt::{BoosterOptions, HyperparameterSet, train_gbdt};
    use crate::synthetic::generate;

    fn small_model() -> GbdtModel {
        let data = generate(300, 11);
        let params = HyperparameterSet {
            max_depth: 4,
            learning_rate: 0.2,
            n_estimators: 15,
        };
        train_gbdt(&data, &params, &BoosterOptions::default()).unwrap()
    }

    /// Expected tree output when only features in `mask` are known.
    fn conditional(node: &TreeNode, x: &[f64], mask: u32) -> f64 {
        match node {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split {
                feature,
                threshold,
                cover,
                left,
                right,
            } => {
                if mask & (1u32 << *feature) != 0 {
                    let next = if x[*feature] <= *threshold { left } else { right };
                    conditional(next, x, mask)
                } else {
                    (left.cover() * conditional(left, x, mask)
                        + right.cover() * conditional(right, x, mask))
                        / cover
                }
            }
        }
    }

    fn factorial(n: usize) -> f64 {
        (1..=n).map(|k| k as f64).product()
    }

    /// Shapley values by enumerating every subset.
    fn brute_force(model: &GbdtModel, x: &[f64]) -> [f64; FEATURE_COUNT] {
        let value = |mask: u32| -> f64 {
            model
                .trees
                .iter()
                .map(|tree| conditional(&tree.root, x, mask))
                .sum()
        };
        let n = FEATURE_COUNT;
        let mut phi = [0.0; FEATURE_COUNT];
        for (i, slot) in phi.iter_mut().enumerate() {
            for mask in 0u32..(1 << n) {
                if mask & (1 << i) != 0 {
                    continue;
                }
                let size = mask.count_ones() as usize;
                let weight = factorial(size) * factorial(n - size - 1) / factorial(n);
                *slot += weight * (value(mask | (1 << i)) - value(mask));
            }
        }
        phi
    }

    #[test]
    fn matches_brute_force_shapley() {
        let model = small_model();
        for example in generate(5, 99) {
            let attribution = explain_local(&model, &example.features).unwrap();
            let exact = brute_force(&model, example.features.as_slice());
            for feature in Feature::ALL {
                let got = attribution.contribution(feature);
                let want = exact[feature.index()];
                assert!((got - want).abs() < 1e-9, "{feature:?}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn contributions_add_up_to_margin() {
        let model = small_model();
        for example in generate(50, 3) {
            let attribution = explain_local(&model, &example.features).unwrap();
            assert!(attribution.residual().abs() < ADDITIVITY_TOLERANCE);
            let margin = model.predict_margin(example.features.as_slice());
            assert_eq!(attribution.margin, margin);
            assert_eq!(attribution.probability(), model.predict_proba(example.features.as_slice()));
        }
    }

    #[test]
    fn ensemble_attribution_is_sum_of_trees() {
        let model = small_model();
        let x = generate(1, 8)[0].features;
        let attribution = explain_local(&model, &x).unwrap();
        let mut summed = [0.0; FEATURE_COUNT];
        for tree in &model.trees {
            for (slot, phi) in summed.iter_mut().zip(explain_tree(tree, &x)) {
                *slot += phi;
            }
        }
        for feature in Feature::ALL {
            assert!((attribution.contribution(feature) - summed[feature.index()]).abs() < 1e-12);
        }
    }

    #[test]
    fn unused_feature_gets_exactly_zero() {
        let model = small_model();
        let unused: Vec<Feature> = Feature::ALL
            .into_iter()
            .filter(|f| !model.trees.iter().any(|t| t.root.uses_feature(f.index())))
            .collect();
        let mut handmade = model.clone();
        handmade.trees = vec![Tree {
            root: TreeNode::Split {
                feature: Feature::MonthlyIncome.index(),
                threshold: 30_000.0,
                cover: 10.0,
                left: Box::new(TreeNode::Leaf { value: -1.0, cover: 4.0 }),
                right: Box::new(TreeNode::Leaf { value: 1.0, cover: 6.0 }),
            },
        }];
        for example in generate(20, 4) {
            let attribution = explain_local(&model, &example.features).unwrap();
            for feature in &unused {
                assert_eq!(attribution.contribution(*feature), 0.0);
            }
            let only_income = explain_local(&handmade, &example.features).unwrap();
            for feature in Feature::ALL.into_iter().skip(1) {
                assert_eq!(only_income.contribution(feature), 0.0);
            }
        }
    }

    #[test]
    fn zero_cover_split_is_reported() {
        let mut model = small_model();
        model.trees.push(Tree {
            root: TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                cover: 0.0,
                left: Box::new(TreeNode::Leaf { value: 0.0, cover: 0.0 }),
                right: Box::new(TreeNode::Leaf { value: 0.0, cover: 0.0 }),
            },
        });
        let x = generate(1, 1)[0].features;
        assert_eq!(
            explain_local(&model, &x),
            Err(AttributionError::DegenerateCover {
                tree: model.trees.len() - 1
            })
        );
    }

    fn handmade(trees: Vec<TreeNode>) -> GbdtModel {
        GbdtModel {
            feature_count: FEATURE_COUNT,
            hyperparameters: HyperparameterSet::default(),
            options: BoosterOptions::default(),
            base_margin: 0.0,
            trees: trees.into_iter().map(|root| Tree { root }).collect(),
        }
    }

    fn income_stump(right: f64) -> TreeNode {
        TreeNode::Split {
            feature: Feature::MonthlyIncome.index(),
            threshold: 30_000.0,
            cover: 10.0,
            left: Box::new(TreeNode::Leaf { value: 0.0, cover: 5.0 }),
            right: Box::new(TreeNode::Leaf { value: right, cover: 5.0 }),
        }
    }

    #[test]
    fn overflowing_contribution_is_reported() {
        let model = handmade((0..4).map(|_| income_stump(f64::MAX)).collect());
        let x = FeatureVector::from_values([80_000.0, 1.0, 300.0, 100.0, 2.0, 20.0, 5.0, 1.0])
            .unwrap();
        assert_eq!(
            explain_local(&model, &x),
            Err(AttributionError::NonFinite {
                feature: Feature::MonthlyIncome.name()
            })
        );
    }

    #[test]
    fn overflowing_baseline_breaks_additivity() {
        let model = handmade(vec![
            TreeNode::Leaf { value: f64::MAX, cover: 10.0 },
            TreeNode::Leaf { value: f64::MAX, cover: 10.0 },
        ]);
        let x = generate(1, 1)[0].features;
        assert!(matches!(
            explain_local(&model, &x),
            Err(AttributionError::AdditivityViolation { .. })
        ));
    }

    #[test]
    fn global_ranking_is_sorted_and_complete() {
        let model = small_model();
        let batch: Vec<FeatureVector> = generate(40, 5).into_iter().map(|e| e.features).collect();
        let global = explain_global(&model, &batch).unwrap();
        assert_eq!(global.rows, 40);
        assert_eq!(global.features.len(), FEATURE_COUNT);
        for pair in global.features.windows(2) {
            assert!(pair[0].mean_abs >= pair[1].mean_abs);
        }
        let ranks: Vec<usize> = global.features.iter().map(|f| f.rank).collect();
        assert_eq!(ranks, (1..=FEATURE_COUNT).collect::<Vec<_>>());
        assert_eq!(explain_global(&model, &[]), Err(AttributionError::EmptyBatch));
    }
}

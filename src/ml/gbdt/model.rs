use serde::{Deserialize, Serialize};

use super::params::{BoosterOptions, HyperparameterSet};
use crate::schema::FEATURE_COUNT;
use crate::synthetic::LabeledExample;

/// Probability at or below which a prediction is labeled `0`.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Relative slack allowed between a split's cover and the sum of its children's.
const COVER_TOLERANCE: f64 = 1e-9;

/// Node of a regression tree over the feature schema.
///
/// `cover` is the number of training rows that reached the node; attribution uses it
/// to weight the branches that an instance does not follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        /// Feature index used for the split.
        feature: usize,
        /// Rows with `value <= threshold` go left.
        threshold: f64,
        cover: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        /// Margin contribution, learning rate already applied.
        value: f64,
        cover: f64,
    },
}

impl TreeNode {
    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }

    /// Leaf value reached by `features`.
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let value = features.get(*feature).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    /// Cover-weighted mean leaf value, i.e. the tree's expected output over training rows.
    pub fn expected_value(&self) -> f64 {
        match self {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split {
                cover, left, right, ..
            } => {
                (left.cover() * left.expected_value() + right.cover() * right.expected_value())
                    / cover
            }
        }
    }

    /// Depth of the subtree; a single leaf has depth 0.
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Whether any split in the subtree tests `feature`.
    pub fn uses_feature(&self, feature: usize) -> bool {
        match self {
            TreeNode::Leaf { .. } => false,
            TreeNode::Split {
                feature: split,
                left,
                right,
                ..
            } => *split == feature || left.uses_feature(feature) || right.uses_feature(feature),
        }
    }

    fn validate(&self, feature_count: usize) -> Result<(), String> {
        match self {
            TreeNode::Leaf { value, cover } => {
                if !value.is_finite() {
                    return Err("leaf value is not finite".to_string());
                }
                if !(cover.is_finite() && *cover >= 0.0) {
                    return Err("leaf cover must be non-negative".to_string());
                }
                Ok(())
            }
            TreeNode::Split {
                feature,
                threshold,
                cover,
                left,
                right,
            } => {
                if *feature >= feature_count {
                    return Err(format!(
                        "split feature {feature} out of range (feature count {feature_count})"
                    ));
                }
                if !threshold.is_finite() {
                    return Err(format!("split on feature {feature} has non-finite threshold"));
                }
                if !(cover.is_finite() && *cover > 0.0) {
                    return Err(format!("split on feature {feature} has non-positive cover"));
                }
                let children = left.cover() + right.cover();
                if (cover - children).abs() > COVER_TOLERANCE * cover {
                    return Err(format!(
                        "split on feature {feature} has cover {cover} but its children cover {children}"
                    ));
                }
                left.validate(feature_count)?;
                right.validate(feature_count)
            }
        }
    }
}

/// One boosted regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tree {
    pub root: TreeNode,
}

impl Tree {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.root.predict(features)
    }
}

/// Fitted gradient-boosted tree ensemble for binary classification.
///
/// Output is `sigmoid(base_margin + sum(tree outputs))`. Instances are never mutated
/// after training; refitting produces a new model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Number of features each input must supply.
    pub feature_count: usize,
    /// Hyperparameters the ensemble was trained with.
    pub hyperparameters: HyperparameterSet,
    /// Booster settings the ensemble was trained with.
    pub options: BoosterOptions,
    /// Prior log-odds before any tree is applied.
    pub base_margin: f64,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    /// Validate structural invariants of the model.
    pub fn validate(&self) -> Result<(), String> {
        if self.feature_count != FEATURE_COUNT {
            return Err(format!(
                "model expects {} features but schema has {FEATURE_COUNT}",
                self.feature_count
            ));
        }
        if !self.base_margin.is_finite() {
            return Err("base_margin is not finite".to_string());
        }
        self.hyperparameters.validate()?;
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.root
                .validate(self.feature_count)
                .map_err(|err| format!("tree {idx}: {err}"))?;
        }
        Ok(())
    }

    /// Raw additive output (log-odds).
    pub fn predict_margin(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.predict(features))
    }

    /// Probability of the creditworthy class.
    pub fn predict_proba(&self, features: &[f64]) -> f64 {
        sigmoid(self.predict_margin(features))
    }

    pub fn predict_label(&self, features: &[f64]) -> u8 {
        u8::from(self.predict_proba(features) > DECISION_THRESHOLD)
    }

    /// Expected margin over the training distribution.
    pub fn expected_margin(&self) -> f64 {
        self.trees
            .iter()
            .fold(self.base_margin, |acc, tree| acc + tree.root.expected_value())
    }

    /// Fraction of `examples` labeled correctly, `0.0` when empty.
    pub fn accuracy(&self, examples: &[LabeledExample]) -> f64 {
        if examples.is_empty() {
            return 0.0;
        }
        let correct = examples
            .iter()
            .filter(|ex| self.predict_label(ex.features.as_slice()) == ex.label)
            .count();
        correct as f64 / examples.len() as f64
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

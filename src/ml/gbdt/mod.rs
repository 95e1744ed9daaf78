//! Deterministic gradient-boosted decision-tree classifier.
//!
//! Binary logistic boosting over depth-limited regression trees:
//! - Histogram split search on quantile bins derived from the training rows.
//! - Tagged-variant tree nodes that carry per-node training cover for attribution.
//! - Plain serde structures so the artifact layer can version and persist them.

mod model;
mod params;
mod train;

pub use model::{DECISION_THRESHOLD, GbdtModel, Tree, TreeNode, sigmoid};
pub use params::{BoosterOptions, HyperparameterSet};
pub use train::{TrainError, train_gbdt};

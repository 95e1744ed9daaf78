//! Machine learning building blocks: the tree ensemble and its evaluation metrics.

pub mod gbdt;
pub mod metrics;

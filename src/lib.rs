//! Credit scoring core: synthetic data, tuned gradient-boosted trees, exact
//! TreeSHAP explanations, and a scoring surface over a persisted model artifact.

/// Application directory resolution.
pub mod app_dirs;
/// Versioned model artifact persistence.
pub mod artifact;
/// Crash-safe file replacement.
pub mod atomic_file;
/// TOML pipeline configuration.
pub mod config;
/// CSV dataset files and deterministic splits.
pub mod dataset;
/// Exact Shapley attribution.
pub mod explain;
/// Applicant-facing tiers, points, and tips.
pub mod insights;
/// Global tracing setup.
pub mod logging;
/// Tree ensemble and evaluation metrics.
pub mod ml;
/// End-to-end training run.
pub mod pipeline;
/// Feature schema and validation.
pub mod schema;
/// Scoring service surface.
pub mod scoring;
/// Hyperparameter search.
pub mod search;
/// Deterministic synthetic data generator.
pub mod synthetic;

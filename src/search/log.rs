use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::ml::gbdt::HyperparameterSet;

/// Outcome of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    /// The fit errored or panicked; accuracy is recorded as `0`.
    Failed { reason: String },
}

/// One sampled hyperparameter set and the held-out accuracy it achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Zero-based position in the sampling sequence.
    pub index: usize,
    pub params: HyperparameterSet,
    /// Held-out accuracy in `[0, 1]`.
    pub accuracy: f64,
    pub status: TrialStatus,
    pub elapsed_ms: u64,
}

impl TrialResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, TrialStatus::Completed)
    }

    /// Accuracy descending, then earliest trial first.
    pub fn rank_cmp(&self, other: &TrialResult) -> Ordering {
        OrderedFloat(other.accuracy)
            .cmp(&OrderedFloat(self.accuracy))
            .then(self.index.cmp(&other.index))
    }
}

/// Append-only record of every trial in a search.
///
/// Entries are kept ordered by trial index no matter which order concurrent workers
/// append them in, so every derived view is independent of scheduling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialLog {
    trials: Vec<TrialResult>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: TrialResult) {
        let pos = self.trials.partition_point(|t| t.index < result.index);
        self.trials.insert(pos, result);
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    /// Trials in index order.
    pub fn trials(&self) -> &[TrialResult] {
        &self.trials
    }

    pub fn completed(&self) -> impl Iterator<Item = &TrialResult> {
        self.trials.iter().filter(|t| t.is_completed())
    }

    pub fn failed_count(&self) -> usize {
        self.trials.len() - self.completed().count()
    }

    /// Best completed trial: highest accuracy, earliest index on ties.
    pub fn best(&self) -> Option<&TrialResult> {
        self.completed().min_by(|a, b| a.rank_cmp(b))
    }

    /// Completed trials ordered best first.
    pub fn ranked(&self) -> Vec<&TrialResult> {
        let mut ranked: Vec<&TrialResult> = self.completed().collect();
        ranked.sort_by(|a, b| a.rank_cmp(b));
        ranked
    }

    /// Best accuracy among the first `k + 1` trials, for every `k`.
    ///
    /// Failed trials never raise the curve; before any success the value is `0`.
    pub fn best_so_far(&self) -> Vec<f64> {
        let mut best = 0.0f64;
        self.trials
            .iter()
            .map(|trial| {
                if trial.is_completed() {
                    best = best.max(trial.accuracy);
                }
                best
            })
            .collect()
    }
}

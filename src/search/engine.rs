use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::log::{TrialLog, TrialResult, TrialStatus};
use super::space::SearchSpace;
use super::tpe::{TpeConfig, TpeSampler};
use crate::ml::gbdt::{BoosterOptions, HyperparameterSet, TrainError, train_gbdt};
use crate::synthetic::LabeledExample;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    /// The trial budget was zero.
    #[error("trial budget must be at least 1")]
    EmptyBudget,
    /// The named train or eval split has no rows.
    #[error("{0} split is empty")]
    EmptySplit(&'static str),
    /// A search-space bound is empty or out of range.
    #[error("invalid search space: {0}")]
    InvalidSpace(String),
    /// Every trial failed, so there is no best set.
    #[error("none of the {attempted} trials completed successfully")]
    NoSuccessfulTrial { attempted: usize },
}

/// Scores one hyperparameter set. Implementations must be safe to call from several
/// threads at once and must not mutate shared state.
pub trait Objective: Sync {
    fn evaluate(&self, params: &HyperparameterSet) -> Result<f64, TrainError>;
}

/// Train on a fixed split and report accuracy on a fixed held-out split.
#[derive(Debug, Clone, Copy)]
pub struct HoldoutObjective<'a> {
    pub train: &'a [LabeledExample],
    pub eval: &'a [LabeledExample],
    pub options: BoosterOptions,
}

impl Objective for HoldoutObjective<'_> {
    fn evaluate(&self, params: &HyperparameterSet) -> Result<f64, TrainError> {
        let model = train_gbdt(self.train, params, &self.options)?;
        Ok(model.accuracy(self.eval))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub trial_budget: usize,
    /// Sampler seed.
    pub seed: u64,
    /// Trials evaluated concurrently per batch.
    pub parallelism: usize,
    /// Wall-clock bound checked between batches.
    pub deadline: Option<Duration>,
    pub space: SearchSpace,
    pub tpe: TpeConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            trial_budget: 20,
            seed: 42,
            parallelism: 1,
            deadline: None,
            space: SearchSpace::default(),
            tpe: TpeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: TrialResult,
    /// Every trial run, in index order.
    pub log: TrialLog,
    /// The deadline expired before the budget was spent.
    pub deadline_hit: bool,
}

/// Search hyperparameters for the tree ensemble on a fixed train/eval split.
pub fn search(
    train: &[LabeledExample],
    eval: &[LabeledExample],
    options: &BoosterOptions,
    config: &SearchConfig,
) -> Result<SearchOutcome, SearchError> {
    if train.is_empty() {
        return Err(SearchError::EmptySplit("train"));
    }
    if eval.is_empty() {
        return Err(SearchError::EmptySplit("eval"));
    }
    let objective = HoldoutObjective {
        train,
        eval,
        options: *options,
    };
    run_search(&objective, config)
}

/// Run `config.trial_budget` trials of `objective`, guided by the TPE sampler.
///
/// Trials are scheduled in batches of `parallelism`. Every batch is sampled from the
/// log as it stood when the batch started, so results depend only on the seed.
pub fn run_search<O: Objective>(
    objective: &O,
    config: &SearchConfig,
) -> Result<SearchOutcome, SearchError> {
    if config.trial_budget == 0 {
        return Err(SearchError::EmptyBudget);
    }
    config.space.validate().map_err(SearchError::InvalidSpace)?;

    let started = Instant::now();
    let parallelism = config.parallelism.max(1);
    let mut sampler = TpeSampler::new(config.space, config.tpe, config.seed);
    let log = Mutex::new(TrialLog::new());
    let mut next_index = 0usize;
    let mut deadline_hit = false;

    info!(
        "Starting hyperparameter search: budget={} parallelism={} seed={}",
        config.trial_budget, parallelism, config.seed
    );

    while next_index < config.trial_budget {
        let expired = config
            .deadline
            .filter(|deadline| next_index > 0 && started.elapsed() >= *deadline);
        if let Some(deadline) = expired {
            warn!(
                "Search deadline of {:?} reached after {next_index} trials; returning best so far",
                deadline
            );
            deadline_hit = true;
            break;
        }

        let batch_len = parallelism.min(config.trial_budget - next_index);
        let batch: Vec<(usize, HyperparameterSet)> = {
            let snapshot = lock_log(&log);
            (next_index..next_index + batch_len)
                .map(|index| (index, sampler.suggest(&snapshot)))
                .collect()
        };
        next_index += batch_len;

        if batch.len() == 1 {
            let (index, params) = batch[0];
            lock_log(&log).record(run_trial(objective, index, params));
        } else {
            std::thread::scope(|scope| {
                for &(index, params) in &batch {
                    let log = &log;
                    scope.spawn(move || {
                        let result = run_trial(objective, index, params);
                        lock_log(log).record(result);
                    });
                }
            });
        }

        if let Some(best) = lock_log(&log).best() {
            debug!(
                "Best so far after {next_index} trials: #{} accuracy={:.4}",
                best.index, best.accuracy
            );
        }
    }

    let log = log.into_inner().unwrap_or_else(|err| err.into_inner());
    let best = log
        .best()
        .cloned()
        .ok_or(SearchError::NoSuccessfulTrial {
            attempted: log.len(),
        })?;
    info!(
        "Search finished: {} trials ({} failed), best #{} accuracy={:.4} params={:?}",
        log.len(),
        log.failed_count(),
        best.index,
        best.accuracy,
        best.params
    );
    Ok(SearchOutcome {
        best,
        log,
        deadline_hit,
    })
}

fn lock_log(log: &Mutex<TrialLog>) -> std::sync::MutexGuard<'_, TrialLog> {
    log.lock().unwrap_or_else(|err| err.into_inner())
}

/// Evaluate one trial, converting errors and panics into a failed record.
fn run_trial<O: Objective>(objective: &O, index: usize, params: HyperparameterSet) -> TrialResult {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| objective.evaluate(&params)));
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (accuracy, status) = match outcome {
        Ok(Ok(accuracy)) if accuracy.is_finite() && (0.0..=1.0).contains(&accuracy) => {
            (accuracy, TrialStatus::Completed)
        }
        Ok(Ok(accuracy)) => (
            0.0,
            TrialStatus::Failed {
                reason: format!("objective returned invalid accuracy {accuracy}"),
            },
        ),
        Ok(Err(err)) => (
            0.0,
            TrialStatus::Failed {
                reason: err.to_string(),
            },
        ),
        Err(payload) => (
            0.0,
            TrialStatus::Failed {
                reason: panic_message(payload.as_ref()),
            },
        ),
    };
    match &status {
        TrialStatus::Completed => debug!(
            "Trial #{index} {:?}: accuracy={accuracy:.4} in {elapsed_ms} ms",
            params
        ),
        TrialStatus::Failed { reason } => {
            warn!("Trial #{index} {:?} failed: {reason}", params)
        }
    }
    TrialResult {
        index,
        params,
        accuracy,
        status,
        elapsed_ms,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("trial panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("trial panicked: {message}")
    } else {
        "trial panicked".to_string()
    }
}

//! Hyperparameter search over the gradient-boosted ensemble.

mod engine;
mod log;
mod space;
mod tpe;

pub use engine::{HoldoutObjective, Objective, SearchConfig, SearchError, SearchOutcome, run_search, search};
pub use log::{TrialLog, TrialResult, TrialStatus};
pub use space::{SPACE_DIMS, SearchSpace};
pub use tpe::{TpeConfig, TpeSampler};

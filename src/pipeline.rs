//! End-to-end training run.
//!
//! 1. Reserve a holdout split that neither search nor the final fit ever sees.
//! 2. Split the rest into search-train and search-eval and run the search.
//! 3. Refit the best hyperparameters on search-train plus search-eval.
//! 4. Evaluate on the holdout and package the result as an artifact.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::app_dirs::{self, AppDirError};
use crate::artifact::{self, ArtifactError, ArtifactMetadata, ModelArtifact};
use crate::config::PipelineConfig;
use crate::dataset::{self, DatasetError};
use crate::ml::gbdt::{BoosterOptions, GbdtModel, HyperparameterSet, TrainError, train_gbdt};
use crate::ml::metrics::{ClassificationReport, evaluate};
use crate::search::{SearchError, SearchOutcome, search};
use crate::synthetic::{LabeledExample, generate};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("final fit failed: {0}")]
    Train(#[from] TrainError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    AppDir(#[from] AppDirError),
}

#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub search: SearchOutcome,
    pub model: GbdtModel,
    /// Rows the final model was fit on.
    pub training_rows: usize,
    pub holdout: ClassificationReport,
}

impl TrainingRun {
    pub fn best_params(&self) -> HyperparameterSet {
        self.search.best.params
    }

    pub fn to_artifact(&self) -> Result<ModelArtifact, ArtifactError> {
        ModelArtifact::new(
            self.model.clone(),
            ArtifactMetadata {
                training_rows: self.training_rows,
                holdout_report: Some(self.holdout.clone()),
                search_trials: self.search.log.len(),
                best_search_accuracy: Some(self.search.best.accuracy),
            },
        )
    }
}

/// The configured dataset file, or freshly generated synthetic rows.
pub fn load_examples(config: &PipelineConfig) -> Result<Vec<LabeledExample>, PipelineError> {
    match &config.data.dataset_path {
        Some(path) => {
            let examples = dataset::read_csv(path)?;
            info!("Read {} rows from {}", examples.len(), path.display());
            Ok(examples)
        }
        None => {
            info!(
                "Generating {} synthetic rows with seed {}",
                config.data.rows, config.data.seed
            );
            Ok(generate(config.data.rows, config.data.seed))
        }
    }
}

/// Fit the final model on every row used during search.
pub fn fit(
    examples: &[LabeledExample],
    params: &HyperparameterSet,
    options: &BoosterOptions,
) -> Result<GbdtModel, TrainError> {
    train_gbdt(examples, params, options)
}

/// Run search, refit, and holdout evaluation on `examples`.
pub fn train(examples: &[LabeledExample], config: &PipelineConfig) -> Result<TrainingRun, PipelineError> {
    let split = &config.split;
    let (rest, holdout) = dataset::split(examples, split.holdout_fraction, split.seed)?;
    let (search_train, search_eval) =
        dataset::split(&rest, split.eval_fraction, split.seed.wrapping_add(1))?;
    info!(
        "Split {} rows: {} search-train, {} search-eval, {} holdout",
        examples.len(),
        search_train.len(),
        search_eval.len(),
        holdout.len()
    );

    let outcome = search(
        &search_train,
        &search_eval,
        &config.booster,
        &config.search.to_search_config(),
    )?;

    let model = fit(&rest, &outcome.best.params, &config.booster)?;
    let report = evaluate(&model, &holdout);
    info!("Holdout evaluation:\n{}", report.render());

    Ok(TrainingRun {
        search: outcome,
        model,
        training_rows: rest.len(),
        holdout: report,
    })
}

/// Configured artifact location, defaulting to `<app root>/models/model.json`.
pub fn artifact_path(config: &PipelineConfig) -> Result<PathBuf, PipelineError> {
    match &config.artifact.path {
        Some(path) => Ok(path.clone()),
        None => Ok(app_dirs::models_dir()?.join("model.json")),
    }
}

/// Load data, train, and persist. Returns the run and where the artifact was written.
pub fn run(config: &PipelineConfig) -> Result<(TrainingRun, PathBuf), PipelineError> {
    let examples = load_examples(config)?;
    let run = train(&examples, config)?;
    let path = artifact_path(config)?;
    artifact::persist(&run.to_artifact()?, &path)?;
    Ok((run, path))
}

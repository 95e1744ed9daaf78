//! TOML configuration for training runs.
//!
//! Every section and field has a default, so a missing file, an empty file, and a
//! file that sets only a few keys all load.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::Error as SerdeDeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atomic_file::atomic_write;
use crate::ml::gbdt::BoosterOptions;
use crate::search::{SearchConfig, SearchSpace, TpeConfig};
use crate::synthetic::{DEFAULT_ROWS, DEFAULT_SEED};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub booster: BoosterOptions,
    #[serde(default)]
    pub artifact: ArtifactSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Rows generated when no dataset file is given.
    pub rows: usize,
    pub seed: u64,
    /// CSV dataset to train on instead of generating one.
    pub dataset_path: Option<PathBuf>,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            seed: DEFAULT_SEED,
            dataset_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// Share of all rows reserved for the final evaluation.
    pub holdout_fraction: f64,
    /// Share of the remaining rows used to score search trials.
    pub eval_fraction: f64,
    pub seed: u64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            eval_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub trial_budget: usize,
    pub seed: u64,
    pub parallelism: usize,
    pub deadline_secs: Option<u64>,
    pub tpe: TpeConfig,
    pub space: SearchSpace,
}

impl Default for SearchSettings {
    fn default() -> Self {
        let defaults = SearchConfig::default();
        Self {
            trial_budget: defaults.trial_budget,
            seed: defaults.seed,
            parallelism: defaults.parallelism,
            deadline_secs: None,
            tpe: defaults.tpe,
            space: defaults.space,
        }
    }
}

impl SearchSettings {
    pub fn to_search_config(&self) -> SearchConfig {
        SearchConfig {
            trial_budget: self.trial_budget,
            seed: self.seed,
            parallelism: self.parallelism,
            deadline: self.deadline_secs.map(Duration::from_secs),
            space: self.space,
            tpe: self.tpe,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    /// Where the trained artifact is written; defaults to `<app root>/models/model.json`.
    pub path: Option<PathBuf>,
}

impl PipelineConfig {
    /// Replace out-of-range values with their defaults.
    pub fn normalized(mut self) -> Self {
        let split = SplitSettings::default();
        if !valid_fraction(self.split.holdout_fraction) {
            self.split.holdout_fraction = split.holdout_fraction;
        }
        if !valid_fraction(self.split.eval_fraction) {
            self.split.eval_fraction = split.eval_fraction;
        }
        self.search.parallelism = self.search.parallelism.max(1);
        if self.data.rows == 0 {
            self.data.rows = DEFAULT_ROWS;
        }
        self
    }
}

fn valid_fraction(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value < 1.0
}

/// Load `path`, returning defaults if it does not exist.
pub fn load_or_default(path: &Path) -> Result<PipelineConfig, ConfigError> {
    if !path.exists() {
        return Ok(PipelineConfig::default());
    }
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source: SerdeDeError::custom(source),
    })?;
    toml::from_str::<PipelineConfig>(&text)
        .map(PipelineConfig::normalized)
        .map_err(|source| ConfigError::ParseToml {
            path: path.to_path_buf(),
            source,
        })
}

/// Atomically write `config` to `path` as TOML.
pub fn save(path: &Path, config: &PipelineConfig) -> Result<(), ConfigError> {
    let text = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    atomic_write(path, text.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.search.trial_budget, 20);
        assert_eq!(config.split.holdout_fraction, 0.2);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credscore.toml");
        std::fs::write(
            &path,
            "[search]\ntrial_budget = 7\ndeadline_secs = 30\n\n[booster]\nlambda = 2.5\n",
        )
        .unwrap();
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.search.trial_budget, 7);
        assert_eq!(config.booster.lambda, 2.5);
        assert_eq!(config.booster.max_bins, BoosterOptions::default().max_bins);
        assert_eq!(config.data, DataSettings::default());
        let search = config.search.to_search_config();
        assert_eq!(search.deadline, Some(Duration::from_secs(30)));
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("credscore.toml");
        let mut config = PipelineConfig::default();
        config.search.parallelism = 4;
        config.artifact.path = Some(PathBuf::from("out/model.json"));
        save(&path, &config).unwrap();
        assert_eq!(load_or_default(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credscore.toml");
        std::fs::write(&path, "[split]\nholdout_fraction = 1.5\n[search]\nparallelism = 0\n").unwrap();
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.split.holdout_fraction, 0.2);
        assert_eq!(config.search.parallelism, 1);
    }

    #[test]
    fn malformed_toml_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credscore.toml");
        std::fs::write(&path, "[search\n").unwrap();
        let err = load_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseToml { .. }));
        assert!(err.to_string().contains("credscore.toml"));
    }
}

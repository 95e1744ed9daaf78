//! Versioned, self-describing model artifact.
//!
//! The artifact is a single JSON document holding the ensemble, its hyperparameters,
//! the feature order it was trained on, and a SHA-256 of the serialized ensemble.
//! `persist` replaces the file atomically; `load` either returns a fully validated
//! artifact or an error, never a partially usable model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::atomic_file::atomic_write;
use crate::ml::gbdt::GbdtModel;
use crate::ml::metrics::ClassificationReport;
use crate::schema::feature_names;

/// Value of the `format` field.
pub const ARTIFACT_FORMAT: &str = "credscore-gbdt";
/// Format version written by this build. Readers accept any version with the same major.
pub const ARTIFACT_VERSION: &str = "1.0.0";

/// One lock per artifact path so concurrent writers in this process take turns.
/// Entries are removed once no writer holds them.
static WRITE_LOCKS: LazyLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Failed to read or write the artifact file.
    #[error("artifact I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The artifact is not well-formed JSON of the expected shape.
    #[error("artifact JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    /// The `format` field names a different kind of artifact.
    #[error("unknown artifact format `{0}`")]
    UnknownFormat(String),
    /// The format version is unparsable or has a different major.
    #[error("unsupported artifact version `{found}` (this build reads {supported}.x)")]
    UnsupportedVersion { found: String, supported: u64 },
    /// Feature names or their order differ from the schema.
    #[error("artifact features {found:?} do not match the schema {expected:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    /// The ensemble violates a structural invariant.
    #[error("artifact model is invalid: {0}")]
    InvalidModel(String),
    /// The stored model checksum does not match the model.
    #[error("artifact checksum mismatch (recorded {recorded}, computed {computed})")]
    HashMismatch { recorded: String, computed: String },
}

/// Training provenance stored next to the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub training_rows: usize,
    /// Evaluation on rows never used for search or fitting.
    pub holdout_report: Option<ClassificationReport>,
    pub search_trials: usize,
    pub best_search_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format: String,
    pub format_version: String,
    /// Feature names in model order.
    pub features: Vec<String>,
    /// RFC 3339 creation time (UTC).
    pub created_at: String,
    pub metadata: ArtifactMetadata,
    pub model: GbdtModel,
    /// Hex SHA-256 of the JSON-serialized `model`.
    pub model_sha256: String,
}

impl ModelArtifact {
    /// Wrap a freshly fitted model.
    pub fn new(model: GbdtModel, metadata: ArtifactMetadata) -> Result<Self, ArtifactError> {
        model.validate().map_err(ArtifactError::InvalidModel)?;
        let model_sha256 = model_digest(&model)?;
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            format: ARTIFACT_FORMAT.to_string(),
            format_version: ARTIFACT_VERSION.to_string(),
            features: feature_names(),
            created_at,
            metadata,
            model,
            model_sha256,
        })
    }

    /// Check every invariant `load` relies on.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        if self.format != ARTIFACT_FORMAT {
            return Err(ArtifactError::UnknownFormat(self.format.clone()));
        }
        check_version(&self.format_version)?;
        let expected = feature_names();
        if self.features != expected {
            return Err(ArtifactError::SchemaMismatch {
                expected,
                found: self.features.clone(),
            });
        }
        self.model.validate().map_err(ArtifactError::InvalidModel)?;
        let computed = model_digest(&self.model)?;
        if computed != self.model_sha256 {
            return Err(ArtifactError::HashMismatch {
                recorded: self.model_sha256.clone(),
                computed,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ArtifactError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ArtifactError> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)?;
        artifact.validate()?;
        Ok(artifact)
    }
}

/// Atomically write `artifact` to `path`.
pub fn persist(artifact: &ModelArtifact, path: &Path) -> Result<(), ArtifactError> {
    artifact.validate()?;
    let bytes = artifact.to_json()?;
    let (key, lock) = writer_lock(path);
    let written = {
        let _guard = lock.lock().unwrap_or_else(|err| err.into_inner());
        atomic_write(path, &bytes)
    };
    release_writer_lock(&key, lock);
    written.map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "Persisted model artifact to {} ({} trees, sha256 {})",
        path.display(),
        artifact.model.trees.len(),
        &artifact.model_sha256[..12]
    );
    Ok(())
}

/// Read and fully validate the artifact at `path`.
pub fn load(path: &Path) -> Result<ModelArtifact, ArtifactError> {
    let bytes = std::fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let artifact = ModelArtifact::from_json(&bytes)?;
    info!(
        "Loaded model artifact {} (format {}, {} trees)",
        path.display(),
        artifact.format_version,
        artifact.model.trees.len()
    );
    Ok(artifact)
}

fn writer_lock(path: &Path) -> (PathBuf, Arc<Mutex<()>>) {
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut locks = WRITE_LOCKS.lock().unwrap_or_else(|err| err.into_inner());
    let lock = locks.entry(key.clone()).or_default().clone();
    (key, lock)
}

fn release_writer_lock(key: &Path, lock: Arc<Mutex<()>>) {
    let mut locks = WRITE_LOCKS.lock().unwrap_or_else(|err| err.into_inner());
    drop(lock);
    // Clones are only handed out under the map lock, so the count cannot grow here.
    if locks
        .get(key)
        .is_some_and(|entry| Arc::strong_count(entry) == 1)
    {
        locks.remove(key);
    }
}

fn check_version(text: &str) -> Result<(), ArtifactError> {
    let supported = Version::parse(ARTIFACT_VERSION).map(|v| v.major).unwrap_or(1);
    let found = Version::parse(text).map_err(|_| ArtifactError::UnsupportedVersion {
        found: text.to_string(),
        supported,
    })?;
    if found.major != supported {
        return Err(ArtifactError::UnsupportedVersion {
            found: text.to_string(),
            supported,
        });
    }
    Ok(())
}

fn model_digest(model: &GbdtModel) -> Result<String, ArtifactError> {
    let bytes = serde_json::to_vec(model)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gbdt::{BoosterOptions, HyperparameterSet, train_gbdt};
    use crate::synthetic::generate;

    fn artifact() -> ModelArtifact {
        let data = generate(200, 2);
        let params = HyperparameterSet {
            max_depth: 3,
            learning_rate: 0.3,
            n_estimators: 10,
        };
        let model = train_gbdt(&data, &params, &BoosterOptions::default()).unwrap();
        ModelArtifact::new(
            model,
            ArtifactMetadata {
                training_rows: data.len(),
                ..ArtifactMetadata::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn persist_then_load_scores_identically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");
        let original = artifact();
        persist(&original, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, original);
        for example in generate(50, 77) {
            let x = example.features.as_slice();
            assert_eq!(
                loaded.model.predict_margin(x).to_bits(),
                original.model.predict_margin(x).to_bits()
            );
        }
    }

    #[test]
    fn persist_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        persist(&artifact(), &path).unwrap();
        persist(&artifact(), &path).unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("model.json")]);
    }

    #[test]
    fn writer_locks_are_released_after_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        persist(&artifact(), &path).unwrap();
        let key = std::path::absolute(&path).unwrap();
        let locks = WRITE_LOCKS.lock().unwrap();
        assert!(!locks.contains_key(&key));
    }

    #[test]
    fn concurrent_writers_never_expose_a_partial_file() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let base = artifact();
        let variants: Vec<ModelArtifact> = (0..4)
            .map(|idx| {
                let mut art = base.clone();
                art.metadata.training_rows = 1_000 + idx;
                art
            })
            .collect();
        persist(&variants[0], &path).unwrap();

        let writing = AtomicBool::new(true);
        let loads = std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                let mut loads = 0usize;
                while writing.load(Ordering::Acquire) || loads == 0 {
                    let loaded = load(&path).unwrap();
                    assert!(variants.contains(&loaded));
                    loads += 1;
                }
                loads
            });
            let writers: Vec<_> = variants
                .iter()
                .map(|art| {
                    let path = &path;
                    scope.spawn(move || {
                        for _ in 0..5 {
                            persist(art, path).unwrap();
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
            writing.store(false, Ordering::Release);
            reader.join().unwrap()
        });
        assert!(loads > 0);
        assert!(variants.contains(&load(&path).unwrap()));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("model.json")]);
    }

    #[test]
    fn tampered_model_fails_checksum() {
        let mut art = artifact();
        art.model.base_margin += 1.0;
        assert!(matches!(art.validate(), Err(ArtifactError::HashMismatch { .. })));
    }

    #[test]
    fn newer_major_version_is_rejected() {
        let mut art = artifact();
        art.format_version = "2.0.0".into();
        assert!(matches!(
            art.validate(),
            Err(ArtifactError::UnsupportedVersion { .. })
        ));
        art.format_version = "1.4.2".into();
        assert!(art.validate().is_ok());
    }

    #[test]
    fn reordered_features_are_rejected() {
        let mut art = artifact();
        art.features.swap(0, 1);
        assert!(matches!(art.validate(), Err(ArtifactError::SchemaMismatch { .. })));
    }

    #[test]
    fn truncated_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        let bytes = artifact().to_json().unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(load(&path), Err(ArtifactError::Json(_))));
        assert!(matches!(
            load(&dir.path().join("missing.json")),
            Err(ArtifactError::Io { .. })
        ));
    }
}

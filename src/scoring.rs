//! Scoring service surface: predict and explain against one loaded artifact.
//!
//! A [`Scorer`] can only be built from a fully validated artifact, so a corrupt or
//! incompatible model file stops the service at startup instead of producing decisions.
//! The model is shared read-only; calls take `&self` and need no locking.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

use crate::artifact::{self, ArtifactError, ModelArtifact};
use crate::explain::{Attribution, AttributionError, explain_local};
use crate::insights::Insights;
use crate::ml::gbdt::{DECISION_THRESHOLD, sigmoid};
use crate::schema::{FeatureVector, SchemaError};

#[derive(Debug, Error)]
pub enum ScoringError {
    /// The artifact could not be loaded or failed validation.
    #[error("refusing to serve: {0}")]
    Artifact(#[from] ArtifactError),
    /// The request does not satisfy the feature schema.
    #[error("invalid features: {0}")]
    Schema(#[from] SchemaError),
    /// The request body is not a JSON object.
    #[error("request must be a JSON object of feature values")]
    NotAnObject,
    /// The decision record could not be serialized.
    #[error("failed to encode decision record: {0}")]
    Encode(#[from] serde_json::Error),
    /// The decision record carries an unparsable issue time.
    #[error("decision record timestamp is not RFC 3339: {0}")]
    Timestamp(#[from] time::error::Parse),
}

/// Label and score for one applicant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// `1` when `score > 0.5`.
    pub label: u8,
    /// Creditworthy probability.
    pub score: f64,
    /// Raw ensemble output (log-odds).
    pub margin: f64,
}

/// Full response for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDecision {
    pub prediction: Prediction,
    /// `None` when attribution failed; see `warnings`.
    pub attribution: Option<Attribution>,
    pub warnings: Vec<String>,
    pub insights: Insights,
}

#[derive(Debug, Clone)]
pub struct Scorer {
    artifact: Arc<ModelArtifact>,
}

impl Scorer {
    /// Load and validate the artifact at `path`. Any failure is fatal.
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let artifact = artifact::load(path)?;
        Ok(Self {
            artifact: Arc::new(artifact),
        })
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ScoringError> {
        artifact.validate()?;
        Ok(Self {
            artifact: Arc::new(artifact),
        })
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn predict(&self, x: &FeatureVector) -> Prediction {
        let model = &self.artifact.model;
        let margin = model.predict_margin(x.as_slice());
        let score = sigmoid(margin);
        Prediction {
            label: u8::from(score > DECISION_THRESHOLD),
            score,
            margin,
        }
    }

    /// Validate a JSON object of named features, then predict.
    pub fn predict_json(&self, request: &Value) -> Result<Prediction, ScoringError> {
        let x = parse_request(request)?;
        Ok(self.predict(&x))
    }

    pub fn explain(&self, x: &FeatureVector) -> Result<Attribution, AttributionError> {
        explain_local(&self.artifact.model, x)
    }

    /// Predict, explain, and summarize. Attribution problems are reported as
    /// warnings; label and score are still returned.
    pub fn score(&self, x: &FeatureVector) -> ScoredDecision {
        let prediction = self.predict(x);
        let mut warnings = Vec::new();
        let attribution = match self.explain(x) {
            Ok(attribution) => Some(attribution),
            Err(err) => {
                warn!("Attribution unavailable: {err}");
                warnings.push(format!("attribution unavailable: {err}"));
                None
            }
        };
        ScoredDecision {
            prediction,
            attribution,
            warnings,
            insights: Insights::compute(x, prediction.label),
        }
    }

    /// Record of one decision, suitable for hashing and anchoring.
    pub fn decision_record(&self, x: &FeatureVector, prediction: &Prediction) -> DecisionRecord {
        DecisionRecord {
            features: *x,
            label: prediction.label,
            score: prediction.score,
            margin: prediction.margin,
            model_sha256: self.artifact.model_sha256.clone(),
            issued_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Parse a request body into a schema-valid vector.
pub fn parse_request(request: &Value) -> Result<FeatureVector, ScoringError> {
    let map: &Map<String, Value> = request.as_object().ok_or(ScoringError::NotAnObject)?;
    Ok(FeatureVector::from_json_map(map)?)
}

/// Everything that supports one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub features: FeatureVector,
    pub label: u8,
    pub score: f64,
    pub margin: f64,
    pub model_sha256: String,
    pub issued_at: String,
}

impl DecisionRecord {
    /// Canonical encoding: compact JSON with fields and features in fixed order.
    pub fn canonical_json(&self) -> Result<Vec<u8>, ScoringError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Hex SHA-256 of [`canonical_json`](Self::canonical_json).
    pub fn content_hash(&self) -> Result<String, ScoringError> {
        let digest = Sha256::digest(self.canonical_json()?);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// `{hash, score, timestamp}` entry handed to an external ledger.
    pub fn anchor_payload(&self) -> Result<AnchorPayload, ScoringError> {
        let timestamp = OffsetDateTime::parse(&self.issued_at, &Rfc3339)?.unix_timestamp();
        Ok(AnchorPayload {
            content_hash: self.content_hash()?,
            score_bps: (self.score * 10_000.0).round().clamp(0.0, 10_000.0) as u16,
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorPayload {
    pub content_hash: String,
    /// Probability in basis points.
    pub score_bps: u16,
    /// Unix seconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMetadata;
    use crate::ml::gbdt::{BoosterOptions, HyperparameterSet, Tree, TreeNode, train_gbdt};
    use crate::schema::Feature;
    use crate::synthetic::generate;
    use serde_json::json;

    fn scorer() -> Scorer {
        let data = generate(400, 21);
        let params = HyperparameterSet {
            max_depth: 4,
            learning_rate: 0.3,
            n_estimators: 30,
        };
        let model = train_gbdt(&data, &params, &BoosterOptions::default()).unwrap();
        Scorer::from_artifact(ModelArtifact::new(model, ArtifactMetadata::default()).unwrap())
            .unwrap()
    }

    fn request() -> Value {
        json!({
            "monthly_income": 80000,
            "phone_bill_paid_on_time": 1,
            "electricity_usage": 300,
            "num_apps_installed": 100,
            "social_media_hours": 2.0,
            "upi_txn_count": 20,
            "sms_notifs": 5,
            "location_cluster": 1
        })
    }

    #[test]
    fn label_agrees_with_score_threshold() {
        let scorer = scorer();
        for example in generate(100, 5) {
            let p = scorer.predict(&example.features);
            assert_eq!(p.label, u8::from(p.score > 0.5));
            assert!((0.0..=1.0).contains(&p.score));
        }
    }

    #[test]
    fn json_requests_are_validated() {
        let scorer = scorer();
        assert!(scorer.predict_json(&request()).is_ok());

        let mut missing = request();
        missing.as_object_mut().unwrap().remove("sms_notifs");
        assert!(matches!(
            scorer.predict_json(&missing),
            Err(ScoringError::Schema(SchemaError::Missing("sms_notifs")))
        ));

        let mut extra = request();
        extra.as_object_mut().unwrap().insert("age".into(), json!(30));
        assert!(matches!(
            scorer.predict_json(&extra),
            Err(ScoringError::Schema(SchemaError::Unknown(_)))
        ));

        assert!(matches!(
            scorer.predict_json(&json!([1, 2, 3])),
            Err(ScoringError::NotAnObject)
        ));
    }

    #[test]
    fn score_bundles_attribution_and_insights() {
        let scorer = scorer();
        let x = parse_request(&request()).unwrap();
        let decision = scorer.score(&x);
        assert!(decision.warnings.is_empty());
        let attribution = decision.attribution.unwrap();
        assert!(attribution.residual().abs() < 1e-6);
        assert_eq!(attribution.margin, decision.prediction.margin);
        assert_eq!(decision.insights.credit_points, 70);
    }

    #[test]
    fn degenerate_model_still_returns_a_score() {
        let mut artifact = scorer().artifact().clone();
        artifact.model.trees.push(Tree {
            root: TreeNode::Split {
                feature: 0,
                threshold: 1.0,
                cover: 0.0,
                left: Box::new(TreeNode::Leaf { value: 0.0, cover: 0.0 }),
                right: Box::new(TreeNode::Leaf { value: 0.0, cover: 0.0 }),
            },
        });
        // Bypass validation to exercise the warning path.
        let scorer = Scorer {
            artifact: Arc::new(artifact),
        };
        let x = parse_request(&request()).unwrap();
        let decision = scorer.score(&x);
        assert!(decision.attribution.is_none());
        assert_eq!(decision.warnings.len(), 1);
        assert!((0.0..=1.0).contains(&decision.prediction.score));
    }

    #[test]
    fn decision_hash_covers_every_field() {
        let scorer = scorer();
        let x = parse_request(&request()).unwrap();
        let prediction = scorer.predict(&x);
        let record = scorer.decision_record(&x, &prediction);
        let hash = record.content_hash().unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, record.content_hash().unwrap());

        let mut changed = record.clone();
        changed.label ^= 1;
        assert_ne!(changed.content_hash().unwrap(), hash);

        let payload = record.anchor_payload().unwrap();
        assert_eq!(payload.content_hash, hash);
        assert_eq!(
            payload.score_bps,
            (prediction.score * 10_000.0).round() as u16
        );
        assert!(payload.timestamp > 0);

        let mut unparsable = record.clone();
        unparsable.issued_at = "unknown".into();
        assert!(matches!(
            unparsable.anchor_payload(),
            Err(ScoringError::Timestamp(_))
        ));
    }

    fn scorer_with_trees(trees: Vec<TreeNode>) -> Scorer {
        let mut model = scorer().artifact().model.clone();
        model.trees = trees.into_iter().map(|root| Tree { root }).collect();
        Scorer::from_artifact(ModelArtifact::new(model, ArtifactMetadata::default()).unwrap())
            .unwrap()
    }

    #[test]
    fn non_finite_attribution_becomes_a_warning() {
        let stump = TreeNode::Split {
            feature: Feature::MonthlyIncome.index(),
            threshold: 30_000.0,
            cover: 10.0,
            left: Box::new(TreeNode::Leaf { value: 0.0, cover: 5.0 }),
            right: Box::new(TreeNode::Leaf { value: f64::MAX, cover: 5.0 }),
        };
        let scorer = scorer_with_trees(vec![stump; 4]);
        let x = parse_request(&request()).unwrap();
        assert!(matches!(
            scorer.explain(&x),
            Err(AttributionError::NonFinite { .. })
        ));
        let decision = scorer.score(&x);
        assert!(decision.attribution.is_none());
        assert_eq!(decision.warnings.len(), 1);
        assert_eq!(decision.prediction.label, 1);
        assert_eq!(decision.prediction.score, 1.0);
    }

    #[test]
    fn additivity_failure_becomes_a_warning() {
        let leaf = TreeNode::Leaf {
            value: f64::MAX,
            cover: 10.0,
        };
        let scorer = scorer_with_trees(vec![leaf.clone(), leaf]);
        let x = parse_request(&request()).unwrap();
        assert!(matches!(
            scorer.explain(&x),
            Err(AttributionError::AdditivityViolation { .. })
        ));
        let decision = scorer.score(&x);
        assert!(decision.attribution.is_none());
        assert_eq!(decision.warnings.len(), 1);
        assert!(decision.warnings[0].contains("do not add up"));
        assert_eq!(decision.prediction.label, 1);
    }

    #[test]
    fn corrupt_artifact_refuses_to_serve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"{\"format\": \"credscore-gbdt\"").unwrap();
        assert!(matches!(
            Scorer::load(&path),
            Err(ScoringError::Artifact(_))
        ));
    }
}

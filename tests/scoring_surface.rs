use std::sync::OnceLock;

use credscore::artifact::{self, ArtifactError, ArtifactMetadata, ModelArtifact};
use credscore::explain::{ADDITIVITY_TOLERANCE, explain_local};
use credscore::ml::gbdt::{BoosterOptions, GbdtModel, HyperparameterSet, Tree, TreeNode, train_gbdt};
use credscore::schema::{CreditProfile, Feature};
use credscore::scoring::{Scorer, ScoringError};
use credscore::synthetic::generate;
use tempfile::tempdir;

fn model() -> &'static GbdtModel {
    static MODEL: OnceLock<GbdtModel> = OnceLock::new();
    MODEL.get_or_init(|| {
        let params = HyperparameterSet {
            max_depth: 4,
            learning_rate: 0.1,
            n_estimators: 120,
        };
        train_gbdt(&generate(1000, 42), &params, &BoosterOptions::default()).unwrap()
    })
}

fn scorer() -> Scorer {
    Scorer::from_artifact(ModelArtifact::new(model().clone(), ArtifactMetadata::default()).unwrap())
        .unwrap()
}

fn scenario() -> CreditProfile {
    CreditProfile {
        monthly_income: 80_000,
        phone_bill_paid_on_time: true,
        electricity_usage: 300,
        num_apps_installed: 100,
        social_media_hours: 2.0,
        upi_txn_count: 20,
        sms_notifs: 5,
        location_cluster: 1,
    }
}

#[test]
fn concrete_applicant_is_creditworthy() {
    let x = scenario().to_vector().unwrap();
    let prediction = scorer().predict(&x);
    assert_eq!(prediction.label, 1);
    assert!(prediction.score > 0.5, "score {}", prediction.score);
}

#[test]
fn persisted_model_scores_bit_identically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let original = scorer();
    artifact::persist(original.artifact(), &path).unwrap();
    let loaded = Scorer::load(&path).unwrap();
    for example in generate(200, 9) {
        let a = original.predict(&example.features);
        let b = loaded.predict(&example.features);
        assert_eq!(a.margin.to_bits(), b.margin.to_bits());
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.label, b.label);
    }
}

#[test]
fn attribution_is_additive_for_every_input() {
    let scorer = scorer();
    for example in generate(200, 17) {
        let prediction = scorer.predict(&example.features);
        let attribution = scorer.explain(&example.features).unwrap();
        let total = attribution.baseline + attribution.sum();
        assert!(
            (total - prediction.margin).abs() <= ADDITIVITY_TOLERANCE,
            "{total} vs {}",
            prediction.margin
        );
    }
}

#[test]
fn feature_absent_from_every_tree_gets_zero() {
    let stump = |feature: Feature, threshold: f64| Tree {
        root: TreeNode::Split {
            feature: feature.index(),
            threshold,
            cover: 100.0,
            left: Box::new(TreeNode::Leaf { value: -0.5, cover: 40.0 }),
            right: Box::new(TreeNode::Leaf { value: 0.5, cover: 60.0 }),
        },
    };
    let mut degenerate = model().clone();
    degenerate.trees = vec![
        stump(Feature::MonthlyIncome, 30_000.0),
        stump(Feature::UpiTxnCount, 5.0),
        stump(Feature::MonthlyIncome, 60_000.0),
    ];
    degenerate.validate().unwrap();
    for example in generate(100, 23) {
        let attribution = explain_local(&degenerate, &example.features).unwrap();
        for feature in Feature::ALL {
            if feature != Feature::MonthlyIncome && feature != Feature::UpiTxnCount {
                assert_eq!(attribution.contribution(feature), 0.0, "{feature:?}");
            }
        }
    }
}

#[test]
fn corrupt_or_incompatible_artifacts_refuse_to_serve() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    assert!(matches!(
        Scorer::load(&path),
        Err(ScoringError::Artifact(ArtifactError::Io { .. }))
    ));

    let mut json: serde_json::Value =
        serde_json::from_slice(&scorer().artifact().to_json().unwrap()).unwrap();
    json["format_version"] = "2.0.0".into();
    std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
    assert!(matches!(
        Scorer::load(&path),
        Err(ScoringError::Artifact(ArtifactError::UnsupportedVersion { .. }))
    ));

    json["format_version"] = "1.0.0".into();
    json["model"]["trees"][0]["kind"] = "bogus".into();
    std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
    assert!(matches!(
        Scorer::load(&path),
        Err(ScoringError::Artifact(ArtifactError::Json(_)))
    ));
}

#[test]
fn concurrent_callers_share_one_scorer() {
    let scorer = scorer();
    let inputs: Vec<_> = generate(64, 31).into_iter().map(|e| e.features).collect();
    let expected: Vec<_> = inputs.iter().map(|x| scorer.predict(x)).collect();
    std::thread::scope(|scope| {
        for chunk in inputs.chunks(16).zip(expected.chunks(16)) {
            let scorer = &scorer;
            scope.spawn(move || {
                for (x, want) in chunk.0.iter().zip(chunk.1) {
                    assert_eq!(&scorer.predict(x), want);
                    assert!(scorer.explain(x).is_ok());
                }
            });
        }
    });
}

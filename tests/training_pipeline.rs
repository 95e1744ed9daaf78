use std::sync::OnceLock;

use credscore::config::PipelineConfig;
use credscore::dataset::to_csv;
use credscore::ml::gbdt::BoosterOptions;
use credscore::pipeline::{self, TrainingRun};
use credscore::search::{SearchConfig, SearchSpace, run_search, HoldoutObjective};
use credscore::synthetic::{LabeledExample, generate};

fn quick_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.search.trial_budget = 6;
    config.search.parallelism = 3;
    config.search.space = SearchSpace {
        max_depth: (3, 6),
        learning_rate: (0.05, 0.3),
        n_estimators: (50, 120),
    };
    config
}

fn trained() -> &'static (Vec<LabeledExample>, TrainingRun) {
    static RUN: OnceLock<(Vec<LabeledExample>, TrainingRun)> = OnceLock::new();
    RUN.get_or_init(|| {
        let config = quick_config();
        let examples = pipeline::load_examples(&config).unwrap();
        let run = pipeline::train(&examples, &config).unwrap();
        (examples, run)
    })
}

#[test]
fn generator_is_deterministic() {
    let a = generate(1000, 42);
    let b = generate(1000, 42);
    assert_eq!(a, b);
    assert_eq!(to_csv(&a), to_csv(&b));
    assert_ne!(a, generate(1000, 43));
}

#[test]
fn fitted_model_recovers_label_rule_on_holdout() {
    let (examples, run) = trained();
    assert_eq!(examples.len(), 1000);
    assert_eq!(run.holdout.rows, 200);
    assert!(
        run.holdout.accuracy >= 0.95,
        "holdout accuracy {}",
        run.holdout.accuracy
    );
}

#[test]
fn search_respects_budget_and_ranges() {
    let (_, run) = trained();
    let space = quick_config().search.space;
    assert_eq!(run.search.log.len(), 6);
    assert!(run.search.log.trials().iter().all(|t| space.contains(&t.params)));
    assert_eq!(run.model.hyperparameters, run.search.best.params);
}

#[test]
fn best_so_far_never_decreases_with_more_trials() {
    let data = generate(300, 42);
    let (train, eval) = data.split_at(240);
    let objective = HoldoutObjective {
        train,
        eval,
        options: BoosterOptions::default(),
    };
    let space = SearchSpace {
        max_depth: (3, 5),
        learning_rate: (0.05, 0.3),
        n_estimators: (10, 30),
    };
    let mut previous = 0.0;
    for budget in [2, 5, 9] {
        let config = SearchConfig {
            trial_budget: budget,
            space,
            ..SearchConfig::default()
        };
        let outcome = run_search(&objective, &config).unwrap();
        let curve = outcome.log.best_so_far();
        assert!(curve.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*curve.last().unwrap(), outcome.best.accuracy);
        assert!(outcome.best.accuracy >= previous);
        previous = outcome.best.accuracy;
    }
}

//! Developer utility to search hyperparameters, fit, evaluate, and persist a model.

use std::path::PathBuf;

use credscore::app_dirs;
use credscore::config::{self, PipelineConfig};
use credscore::pipeline;

fn main() {
    credscore::logging::init_or_stderr();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let config_path = match &options.config {
        Some(path) => path.clone(),
        None => app_dirs::default_config_path().map_err(|err| err.to_string())?,
    };
    let mut config = config::load_or_default(&config_path).map_err(|err| err.to_string())?;
    options.apply(&mut config);
    let config = config.normalized();
    if let Some(path) = &options.write_config {
        config::save(path, &config).map_err(|err| err.to_string())?;
        println!("wrote effective config to {}", path.display());
    }

    let (run, path) = pipeline::run(&config).map_err(|err| err.to_string())?;
    let best = &run.search.best;
    println!(
        "search: {} trials ({} failed){}",
        run.search.log.len(),
        run.search.log.failed_count(),
        if run.search.deadline_hit {
            ", stopped at deadline"
        } else {
            ""
        }
    );
    println!(
        "best trial #{}: accuracy={:.4} max_depth={} learning_rate={:.4} n_estimators={}",
        best.index,
        best.accuracy,
        best.params.max_depth,
        best.params.learning_rate,
        best.params.n_estimators
    );
    println!("holdout evaluation:\n{}", run.holdout.render());
    println!("model written to {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct CliOptions {
    config: Option<PathBuf>,
    write_config: Option<PathBuf>,
    dataset: Option<PathBuf>,
    rows: Option<usize>,
    seed: Option<u64>,
    trials: Option<usize>,
    parallelism: Option<usize>,
    deadline_secs: Option<u64>,
    out: Option<PathBuf>,
}

impl CliOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.dataset {
            config.data.dataset_path = Some(path.clone());
        }
        if let Some(rows) = self.rows {
            config.data.rows = rows;
        }
        if let Some(seed) = self.seed {
            config.data.seed = seed;
        }
        if let Some(trials) = self.trials {
            config.search.trial_budget = trials;
        }
        if let Some(parallelism) = self.parallelism {
            config.search.parallelism = parallelism;
        }
        if let Some(secs) = self.deadline_secs {
            config.search.deadline_secs = Some(secs);
        }
        if let Some(out) = &self.out {
            config.artifact.path = Some(out.clone());
        }
    }
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        let flag = args[idx].as_str();
        if flag == "-h" || flag == "--help" {
            return Err(help_text());
        }
        idx += 1;
        let value = || {
            args.get(idx)
                .cloned()
                .ok_or_else(|| format!("{flag} requires a value"))
        };
        match flag {
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--write-config" => options.write_config = Some(PathBuf::from(value()?)),
            "--dataset" => options.dataset = Some(PathBuf::from(value()?)),
            "--out" => options.out = Some(PathBuf::from(value()?)),
            "--rows" => options.rows = Some(parse_number(flag, &value()?)?),
            "--seed" => options.seed = Some(parse_number(flag, &value()?)?),
            "--trials" => options.trials = Some(parse_number(flag, &value()?)?),
            "--parallelism" => options.parallelism = Some(parse_number(flag, &value()?)?),
            "--deadline-secs" => options.deadline_secs = Some(parse_number(flag, &value()?)?),
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

fn help_text() -> String {
    [
        "credscore-train",
        "",
        "Search hyperparameters, refit on all search rows, evaluate on a holdout",
        "split, and write a model artifact. Flags override the config file.",
        "",
        "Usage:",
        "  credscore-train [--config credscore.toml] [--dataset data.csv | --rows 1000 --seed 42]",
        "                  [--trials 20] [--parallelism 1] [--deadline-secs N]",
        "                  [--out model.json] [--write-config effective.toml]",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let options = parse_args(
            ["--trials", "5", "--parallelism", "3", "--out", "m.json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        let mut config = PipelineConfig::default();
        options.apply(&mut config);
        assert_eq!(config.search.trial_budget, 5);
        assert_eq!(config.search.parallelism, 3);
        assert_eq!(config.artifact.path, Some(PathBuf::from("m.json")));
        assert_eq!(config.data.rows, 1000);
    }

    #[test]
    fn missing_value_is_reported() {
        let err = parse_args(vec!["--trials".into()]).unwrap_err();
        assert_eq!(err, "--trials requires a value");
    }
}

//! Developer utility to rank features by mean absolute attribution over a dataset.

use std::path::PathBuf;

use credscore::app_dirs;
use credscore::artifact;
use credscore::dataset::read_csv;
use credscore::explain::explain_global;
use credscore::schema::FeatureVector;
use credscore::synthetic::{DEFAULT_ROWS, DEFAULT_SEED, generate};

fn main() {
    credscore::logging::init_or_stderr();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let model_path = match &options.model {
        Some(path) => path.clone(),
        None => app_dirs::models_dir()
            .map_err(|err| err.to_string())?
            .join("model.json"),
    };
    let artifact = artifact::load(&model_path).map_err(|err| err.to_string())?;

    let examples = match &options.dataset {
        Some(path) => read_csv(path).map_err(|err| err.to_string())?,
        None => generate(options.rows, options.seed),
    };
    let batch: Vec<FeatureVector> = examples.iter().map(|example| example.features).collect();
    let importance = explain_global(&artifact.model, &batch).map_err(|err| err.to_string())?;

    if options.json {
        let out = serde_json::to_string_pretty(&importance).map_err(|err| err.to_string())?;
        println!("{out}");
    } else {
        println!("{}", importance.render());
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct CliOptions {
    model: Option<PathBuf>,
    dataset: Option<PathBuf>,
    rows: usize,
    seed: u64,
    json: bool,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        model: None,
        dataset: None,
        rows: DEFAULT_ROWS,
        seed: DEFAULT_SEED,
        json: false,
    };
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--model" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--model requires a value".to_string())?;
                options.model = Some(PathBuf::from(value));
            }
            "--dataset" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--dataset requires a value".to_string())?;
                options.dataset = Some(PathBuf::from(value));
            }
            "--rows" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--rows requires a value".to_string())?;
                options.rows = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --rows value: {value}"))?;
            }
            "--seed" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--seed requires a value".to_string())?;
                options.seed = value
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid --seed value: {value}"))?;
            }
            "--json" => options.json = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "credscore-explain-global",
        "",
        "Rank features by mean absolute TreeSHAP contribution over a dataset",
        "(a CSV file, or freshly generated synthetic rows).",
        "",
        "Usage:",
        "  credscore-explain-global [--model model.json] [--dataset data.csv | --rows 1000 --seed 42] [--json]",
    ]
    .join("\n")
}

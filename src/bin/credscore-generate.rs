//! Developer utility to write a deterministic synthetic dataset as CSV.

use std::path::PathBuf;

use credscore::dataset::write_csv;
use credscore::synthetic::{DEFAULT_ROWS, DEFAULT_SEED, generate, positive_rate};

fn main() {
    credscore::logging::init_or_stderr();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if options.rows == 0 {
        return Err("--rows must be at least 1".to_string());
    }
    let examples = generate(options.rows, options.seed);
    write_csv(&options.out, &examples).map_err(|err| err.to_string())?;
    println!(
        "wrote {} rows to {} (seed {}, {:.1}% creditworthy)",
        examples.len(),
        options.out.display(),
        options.seed,
        positive_rate(&examples) * 100.0
    );
    Ok(())
}

#[derive(Debug, Clone)]
struct CliOptions {
    rows: usize,
    seed: u64,
    out: PathBuf,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut rows = DEFAULT_ROWS;
    let mut seed = DEFAULT_SEED;
    let mut out = PathBuf::from("credit_data.csv");

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--rows" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--rows requires a value".to_string())?;
                rows = value
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid --rows value: {value}"))?;
            }
            "--seed" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--seed requires a value".to_string())?;
                seed = value
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid --seed value: {value}"))?;
            }
            "--out" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--out requires a value".to_string())?;
                out = PathBuf::from(value);
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(CliOptions { rows, seed, out })
}

fn help_text() -> String {
    [
        "credscore-generate",
        "",
        "Write a synthetic labeled credit dataset. The same rows and seed always",
        "produce the same file.",
        "",
        "Usage:",
        "  credscore-generate [--rows 1000] [--seed 42] [--out credit_data.csv]",
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_args_defaults() {
        let options = parse_args(Vec::new()).unwrap();
        assert_eq!(options.rows, 1000);
        assert_eq!(options.seed, 42);
        assert_eq!(options.out, PathBuf::from("credit_data.csv"));
    }

    #[test]
    fn parse_args_rejects_bad_numbers() {
        let err = parse_args(vec!["--rows".into(), "many".into()]).unwrap_err();
        assert!(err.contains("Invalid --rows"));
    }
}

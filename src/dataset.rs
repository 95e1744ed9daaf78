//! Flat-table dataset files and deterministic splits.
//!
//! The on-disk layout is a CSV with the eight schema columns in model order followed by
//! the `creditworthy` label column.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::atomic_file::atomic_write;
use crate::schema::{FEATURE_COUNT, Feature, FeatureKind, FeatureVector, LABEL_COLUMN, SchemaError};
use crate::synthetic::LabeledExample;

#[derive(Debug, Error)]
pub enum DatasetError {
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
    #[error("dataset is empty")]
    Empty,
    #[error("unexpected header: {found}")]
    Header { found: String },
    #[error("line {line}: {message}")]
    Row { line: usize, message: String },
    #[error("line {line}: {source}")]
    Schema { line: usize, source: SchemaError },
    #[error("invalid split fraction {fraction} for {rows} rows")]
    InvalidSplit { fraction: f64, rows: usize },
}

/// Expected CSV header line.
pub fn header() -> String {
    let mut columns: Vec<&str> = Feature::ALL.iter().map(|f| f.name()).collect();
    columns.push(LABEL_COLUMN);
    columns.join(",")
}

/// Render examples as CSV text (header included).
pub fn to_csv(examples: &[LabeledExample]) -> String {
    let mut out = header();
    out.push('\n');
    for example in examples {
        for feature in Feature::ALL {
            let value = example.features.get(feature);
            match feature.kind() {
                FeatureKind::NonNegativeReal => {
                    let _ = write!(out, "{value}");
                }
                _ => {
                    let _ = write!(out, "{}", value as i64);
                }
            }
            out.push(',');
        }
        let _ = writeln!(out, "{}", example.label);
    }
    out
}

/// Parse CSV text produced by [`to_csv`], validating every row against the schema.
pub fn parse_csv(text: &str) -> Result<Vec<LabeledExample>, DatasetError> {
    let mut lines = text.lines().enumerate();
    let (_, first) = lines.next().ok_or(DatasetError::Empty)?;
    if first.trim() != header() {
        return Err(DatasetError::Header {
            found: first.trim().to_string(),
        });
    }

    let mut examples = Vec::new();
    for (idx, raw) in lines {
        let line = idx + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let cells: Vec<&str> = raw.split(',').map(str::trim).collect();
        if cells.len() != FEATURE_COUNT + 1 {
            return Err(DatasetError::Row {
                line,
                message: format!("expected {} columns, got {}", FEATURE_COUNT + 1, cells.len()),
            });
        }
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, cell) in values.iter_mut().zip(&cells) {
            *slot = cell.parse::<f64>().map_err(|_| DatasetError::Row {
                line,
                message: format!("invalid number `{cell}`"),
            })?;
        }
        let features = FeatureVector::from_values(values)
            .map_err(|source| DatasetError::Schema { line, source })?;
        let label = match cells[FEATURE_COUNT] {
            "0" => 0,
            "1" => 1,
            other => {
                return Err(DatasetError::Row {
                    line,
                    message: format!("label must be 0 or 1, got `{other}`"),
                });
            }
        };
        examples.push(LabeledExample { features, label });
    }
    Ok(examples)
}

pub fn write_csv(path: &Path, examples: &[LabeledExample]) -> Result<(), DatasetError> {
    atomic_write(path, to_csv(examples).as_bytes()).map_err(|source| DatasetError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_csv(path: &Path) -> Result<Vec<LabeledExample>, DatasetError> {
    let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_csv(&text)
}

/// Shuffle with `seed` and hold out `ceil(len * fraction)` rows.
///
/// Returns `(kept, held_out)`. Both sides are guaranteed non-empty.
pub fn split(
    examples: &[LabeledExample],
    fraction: f64,
    seed: u64,
) -> Result<(Vec<LabeledExample>, Vec<LabeledExample>), DatasetError> {
    let rows = examples.len();
    let invalid = || DatasetError::InvalidSplit { fraction, rows };
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(invalid());
    }
    let held = ((rows as f64) * fraction).ceil() as usize;
    if held == 0 || held >= rows {
        return Err(invalid());
    }
    let mut indices: Vec<usize> = (0..rows).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let held_out = indices[..held].iter().map(|&i| examples[i]).collect();
    let kept = indices[held..].iter().map(|&i| examples[i]).collect();
    Ok((kept, held_out))
}

//! Evaluation metrics for the binary creditworthiness classifier.

use serde::{Deserialize, Serialize};

use crate::ml::gbdt::GbdtModel;
use crate::synthetic::LabeledExample;

/// Display names for class indices `0` and `1`.
pub const CLASS_NAMES: [&str; 2] = ["not_creditworthy", "creditworthy"];

#[derive(Debug, Clone, PartialEq)]
/// Confusion matrix for a `K`-class classifier.
pub struct ConfusionMatrix {
    /// Number of classes.
    pub n_classes: usize,
    /// Row-major `KxK` counts (`truth * K + predicted`).
    pub counts: Vec<u32>,
}

impl ConfusionMatrix {
    /// Create an empty `KxK` confusion matrix.
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            counts: vec![0; n_classes * n_classes],
        }
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        if truth >= self.n_classes || predicted >= self.n_classes {
            return;
        }
        let idx = truth * self.n_classes + predicted;
        self.counts[idx] = self.counts[idx].saturating_add(1);
    }

    pub fn get(&self, truth: usize, predicted: usize) -> u32 {
        self.counts[truth * self.n_classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Precision/recall statistics for a single class.
pub struct PerClassStats {
    /// `TP / (TP + FP)`.
    pub precision: f32,
    /// `TP / (TP + FN)`.
    pub recall: f32,
    /// Total number of true examples for the class.
    pub support: u32,
}

impl PerClassStats {
    /// Harmonic mean of precision and recall.
    pub fn f1(&self) -> f32 {
        if self.precision + self.recall == 0.0 {
            0.0
        } else {
            2.0 * self.precision * self.recall / (self.precision + self.recall)
        }
    }
}

/// Serializable evaluation summary, embedded in model artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f32,
    pub rows: u64,
    pub per_class: Vec<PerClassMetric>,
    /// Row-major `2x2` confusion counts (`truth * 2 + predicted`).
    pub confusion: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassMetric {
    pub class_id: String,
    pub support: u32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let per_class = precision_recall_by_class(cm)
            .into_iter()
            .enumerate()
            .map(|(idx, stats)| PerClassMetric {
                class_id: CLASS_NAMES
                    .get(idx)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|| idx.to_string()),
                support: stats.support,
                precision: stats.precision,
                recall: stats.recall,
                f1: stats.f1(),
            })
            .collect();
        Self {
            accuracy: accuracy(cm),
            rows: cm.total(),
            per_class,
            confusion: cm.counts.clone(),
        }
    }

    /// Multi-line text rendering for CLI output.
    pub fn render(&self) -> String {
        let mut lines = vec![format!("accuracy: {:.4} ({} rows)", self.accuracy, self.rows)];
        for metric in &self.per_class {
            lines.push(format!(
                "{:<18} precision={:.3}  recall={:.3}  f1={:.3}  support={}",
                metric.class_id, metric.precision, metric.recall, metric.f1, metric.support
            ));
        }
        lines.join("\n")
    }
}

/// Compute per-class precision and recall from a confusion matrix.
pub fn precision_recall_by_class(cm: &ConfusionMatrix) -> Vec<PerClassStats> {
    let k = cm.n_classes;
    let mut stats = Vec::with_capacity(k);
    for class_idx in 0..k {
        let tp = cm.get(class_idx, class_idx) as f32;
        let mut fp = 0f32;
        let mut fn_ = 0f32;
        let mut support = 0u32;
        for j in 0..k {
            let v = cm.get(class_idx, j);
            support = support.saturating_add(v);
            if j != class_idx {
                fn_ += v as f32;
            }
        }
        for i in 0..k {
            if i != class_idx {
                fp += cm.get(i, class_idx) as f32;
            }
        }
        let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
        let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
        stats.push(PerClassStats {
            precision,
            recall,
            support,
        });
    }
    stats
}

/// Compute overall accuracy from a confusion matrix.
pub fn accuracy(cm: &ConfusionMatrix) -> f32 {
    let mut correct = 0u64;
    let mut total = 0u64;
    for truth in 0..cm.n_classes {
        for predicted in 0..cm.n_classes {
            let v = cm.get(truth, predicted) as u64;
            total += v;
            if truth == predicted {
                correct += v;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        (correct as f32) / (total as f32)
    }
}

/// Score `model` on `examples` and summarize.
pub fn evaluate(model: &GbdtModel, examples: &[LabeledExample]) -> ClassificationReport {
    let mut cm = ConfusionMatrix::new(CLASS_NAMES.len());
    for example in examples {
        let predicted = model.predict_label(example.features.as_slice());
        cm.add(usize::from(example.label), usize::from(predicted));
    }
    ClassificationReport::from_confusion(&cm)
}

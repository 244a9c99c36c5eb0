//! Narrow scoring interface: a feature row goes in, a [`Prediction`] comes
//! out. The only bundled model is a centered linear model whose per-feature
//! contributions are exact, which keeps "top contributing feature"
//! meaningful without a tree-explainer runtime.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::features::{FEATURE_COLUMNS, FeatureRow, LABEL_COLUMN, strongest_contribution};
use crate::metrics::Prediction;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Column order of batch scoring output.
pub const SCORED_OUTPUT_COLUMNS: [&str; 4] = [
    "command_hash",
    "predicted_productivity",
    "top_contribution_feature",
    "top_contribution_value",
];

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("failed to read model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model file {path}: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("model expects features {expected:?}, found {found:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{LABEL_COLUMN} is required for training (row {row})")]
    MissingLabel { row: usize },
    #[error("dataset is empty")]
    EmptyDataset,
}

/// Anything that can turn a feature row into a prediction.
pub trait Scorer {
    fn score(&self, row: &FeatureRow) -> Result<Prediction, ScoringError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TrainingOptions {
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            epochs: 400,
            learning_rate: 0.05,
        }
    }
}

/// Persisted linear model: `bias + Σ weight·(x − mean)`, clamped to
/// `[MIN_SCORE, MAX_SCORE]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub model_type: String,
    pub feature_columns: Vec<String>,
    pub bias: f64,
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub training_rows: usize,
    pub train_mae: f64,
    #[serde(skip)]
    model_ref: String,
}

impl LinearModel {
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ScoringError::Io {
            path: display.clone(),
            source,
        })?;
        let mut model: LinearModel =
            serde_json::from_str(&raw).map_err(|source| ScoringError::Format {
                path: display.clone(),
                source,
            })?;

        let expected: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        if model.feature_columns != expected
            || model.weights.len() != expected.len()
            || model.means.len() != expected.len()
        {
            return Err(ScoringError::FeatureMismatch {
                expected,
                found: model.feature_columns,
            });
        }
        model.model_ref = display;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScoringError> {
        let display = path.display().to_string();
        let data = serde_json::to_string_pretty(self).map_err(|source| ScoringError::Format {
            path: display.clone(),
            source,
        })?;
        std::fs::write(path, data).map_err(|source| ScoringError::Io {
            path: display,
            source,
        })
    }

    pub fn model_ref(&self) -> &str {
        &self.model_ref
    }

    /// Fit weights by batch gradient descent on standardized features.
    pub fn train(rows: &[FeatureRow], options: TrainingOptions) -> Result<Self, ScoringError> {
        if rows.is_empty() {
            return Err(ScoringError::EmptyDataset);
        }
        let mut labels = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            labels.push(row.label.ok_or(ScoringError::MissingLabel { row: i + 1 })?);
        }

        let vectors: Vec<[f64; 7]> = rows.iter().map(FeatureRow::to_vector).collect();
        let n = vectors.len() as f64;

        let mut means = [0.0; 7];
        for v in &vectors {
            for (m, x) in means.iter_mut().zip(v) {
                *m += x / n;
            }
        }
        let mut scales = [0.0; 7];
        for v in &vectors {
            for ((s, x), m) in scales.iter_mut().zip(v).zip(&means) {
                *s += (x - m).powi(2) / n;
            }
        }
        for s in scales.iter_mut() {
            *s = if *s > 0.0 { s.sqrt() } else { 1.0 };
        }

        let standardized: Vec<[f64; 7]> = vectors
            .iter()
            .map(|v| {
                let mut z = [0.0; 7];
                for i in 0..7 {
                    z[i] = (v[i] - means[i]) / scales[i];
                }
                z
            })
            .collect();

        let bias = labels.iter().sum::<f64>() / n;
        let mut weights = [0.0; 7];
        for _ in 0..options.epochs {
            let mut gradient = [0.0; 7];
            for (z, y) in standardized.iter().zip(&labels) {
                let predicted: f64 = bias + z.iter().zip(&weights).map(|(a, b)| a * b).sum::<f64>();
                let error = predicted - y;
                for i in 0..7 {
                    gradient[i] += error * z[i] / n;
                }
            }
            for i in 0..7 {
                weights[i] -= options.learning_rate * gradient[i];
            }
        }

        let mut model = LinearModel {
            model_type: "linear".to_string(),
            feature_columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            bias,
            weights: weights.iter().zip(&scales).map(|(w, s)| w / s).collect(),
            means: means.to_vec(),
            training_rows: rows.len(),
            train_mae: 0.0,
            model_ref: "in-memory".to_string(),
        };

        let mut total_error = 0.0;
        for (row, y) in rows.iter().zip(&labels) {
            total_error += (model.predict(row).0 - y).abs();
        }
        model.train_mae = (total_error / n * 10_000.0).round() / 10_000.0;
        Ok(model)
    }

    fn predict(&self, row: &FeatureRow) -> (f64, [f64; 7]) {
        let x = row.to_vector();
        let mut contributions = [0.0; 7];
        for i in 0..7 {
            contributions[i] = self.weights[i] * (x[i] - self.means[i]);
        }
        let raw = self.bias + contributions.iter().sum::<f64>();
        (raw.clamp(MIN_SCORE, MAX_SCORE), contributions)
    }
}

impl Scorer for LinearModel {
    fn score(&self, row: &FeatureRow) -> Result<Prediction, ScoringError> {
        let (predicted, contributions) = self.predict(row);
        let (feature, value) = strongest_contribution(&contributions);
        Ok(Prediction {
            predicted_productivity: predicted,
            top_contribution_feature: feature.to_string(),
            top_contribution_value: value,
            model_ref: self.model_ref.clone(),
        })
    }
}

/// Render scored rows as CSV in [`SCORED_OUTPUT_COLUMNS`] order.
pub fn scored_csv(rows: &[(String, Prediction)]) -> String {
    let mut out = SCORED_OUTPUT_COLUMNS.join(",");
    out.push('\n');
    for (hash, p) in rows {
        out.push_str(&format!(
            "{},{:.4},{},{:.4}\n",
            hash, p.predicted_productivity, p.top_contribution_feature, p.top_contribution_value
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::generate_rows;

    fn row(lines_added: f64, exit_code: f64, label: Option<f64>) -> FeatureRow {
        FeatureRow {
            command_hash: "abc123".to_string(),
            duration_ms: 250.0,
            exit_code,
            timed_out: false,
            files_touched_count: 2.0,
            lines_added,
            lines_deleted: 1.0,
            label,
        }
    }

    #[test]
    fn training_requires_labels() {
        let err = LinearModel::train(&[row(1.0, 0.0, None)], TrainingOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("productivity_label is required for training"));
    }

    #[test]
    fn training_on_empty_dataset_fails() {
        assert!(matches!(
            LinearModel::train(&[], TrainingOptions::default()),
            Err(ScoringError::EmptyDataset)
        ));
    }

    #[test]
    fn trained_model_scores_within_bounds_and_names_a_feature() {
        let rows = generate_rows(300, 13);
        let model = LinearModel::train(&rows, TrainingOptions::default()).unwrap();
        assert_eq!(model.training_rows, 300);
        assert!(model.train_mae.is_finite());

        let prediction = model.score(&row(18.0, 0.0, None)).unwrap();
        assert!((MIN_SCORE..=MAX_SCORE).contains(&prediction.predicted_productivity));
        assert!(FEATURE_COLUMNS.contains(&prediction.top_contribution_feature.as_str()));
    }

    #[test]
    fn save_and_load_keep_weights_and_set_model_ref() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = LinearModel::train(&generate_rows(50, 1), TrainingOptions::default()).unwrap();
        model.save(&path).unwrap();
        let loaded = LinearModel::load(&path).unwrap();
        assert_eq!(loaded.weights, model.weights);
        assert_eq!(loaded.model_ref(), path.display().to_string());
    }

    #[test]
    fn scored_csv_uses_four_decimals() {
        let csv = scored_csv(&[(
            "abc".to_string(),
            Prediction {
                predicted_productivity: 71.123456,
                top_contribution_feature: "exit_code".to_string(),
                top_contribution_value: -3.5,
                model_ref: "m".to_string(),
            },
        )]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], SCORED_OUTPUT_COLUMNS.join(","));
        assert_eq!(lines[1], "abc,71.1235,exit_code,-3.5000");
    }
}

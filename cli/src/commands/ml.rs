use std::path::{Path, PathBuf};

use clap::Subcommand;
use devtrace_core::features::{FeatureRow, parse_dataset};
use devtrace_core::scoring::{LinearModel, Scorer, TrainingOptions, scored_csv};
use devtrace_core::synthetic::{dataset_csv, generate_rows};
use serde_json::json;

use crate::util::{exit_error, print_json};

#[derive(Subcommand)]
pub enum MlCommands {
    /// Generate a labelled synthetic training dataset
    Synth {
        /// Number of rows
        #[arg(long, default_value_t = 2000)]
        rows: usize,
        /// RNG seed; the same seed yields the same dataset
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Output CSV path
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
    /// Train a model from a labelled CSV dataset
    Train {
        /// Dataset CSV with a productivity_label column
        #[arg(long, short = 'd')]
        dataset: PathBuf,
        /// Where to write the model JSON
        #[arg(long, short = 'o')]
        out: PathBuf,
        #[arg(long, default_value_t = TrainingOptions::default().epochs)]
        epochs: usize,
        #[arg(long, default_value_t = TrainingOptions::default().learning_rate)]
        learning_rate: f64,
    },
    /// Score every row of an exported CSV
    Score {
        /// Model JSON produced by `devtrace ml train`
        #[arg(long, short = 'm', env = "DEVTRACE_MODEL")]
        model: PathBuf,
        /// Exported events CSV
        #[arg(long, short = 'd')]
        dataset: PathBuf,
        /// Output CSV path (stdout when omitted)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
}

pub async fn run(command: MlCommands) -> i32 {
    match command {
        MlCommands::Synth { rows, seed, out } => synth(rows, seed, &out),
        MlCommands::Train {
            dataset,
            out,
            epochs,
            learning_rate,
        } => train(
            &dataset,
            &out,
            TrainingOptions {
                epochs,
                learning_rate,
            },
        ),
        MlCommands::Score {
            model,
            dataset,
            out,
        } => score(&model, &dataset, out.as_deref()),
    }
}

fn synth(rows: usize, seed: u64, out: &Path) -> i32 {
    let dataset = generate_rows(rows, seed);
    write_file(out, &dataset_csv(&dataset));
    print_json(&json!({
        "rows": dataset.len(),
        "seed": seed,
        "path": out.display().to_string(),
    }));
    0
}

fn train(data: &Path, out: &Path, options: TrainingOptions) -> i32 {
    let rows = read_dataset(data);
    let model = match LinearModel::train(&rows, options) {
        Ok(model) => model,
        Err(e) => exit_error(&e.to_string(), Some("Generate a labelled dataset with 'devtrace ml synth'.")),
    };
    if let Err(e) = model.save(out) {
        exit_error(&e.to_string(), None);
    }
    print_json(&json!({
        "model": out.display().to_string(),
        "training_rows": model.training_rows,
        "train_mae": model.train_mae,
    }));
    0
}

fn score(model_path: &Path, data: &Path, out: Option<&Path>) -> i32 {
    let model = match LinearModel::load(model_path) {
        Ok(model) => model,
        Err(e) => exit_error(&e.to_string(), Some("Train one with 'devtrace ml train'.")),
    };
    let rows = read_dataset(data);
    let mut scored = Vec::with_capacity(rows.len());
    for row in &rows {
        match model.score(row) {
            Ok(prediction) => scored.push((row.command_hash.clone(), prediction)),
            Err(e) => exit_error(&e.to_string(), None),
        }
    }

    let csv = scored_csv(&scored);
    match out {
        Some(path) => {
            write_file(path, &csv);
            print_json(&json!({
                "rows": scored.len(),
                "path": path.display().to_string(),
                "model_ref": model.model_ref(),
            }));
        }
        None => print!("{csv}"),
    }
    0
}

fn read_dataset(path: &Path) -> Vec<FeatureRow> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => exit_error(&format!("failed to read {}: {e}", path.display()), None),
    };
    match parse_dataset(&content) {
        Ok(rows) => rows,
        Err(e) => exit_error(&format!("invalid dataset {}: {e}", path.display()), None),
    }
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            exit_error(&format!("failed to create {}: {e}", parent.display()), None);
        }
    }
    if let Err(e) = std::fs::write(path, content) {
        exit_error(&format!("failed to write {}: {e}", path.display()), None);
    }
}

//! Seeded synthetic telemetry for bootstrapping a model before real
//! labelled data exists.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::features::{FeatureRow, LABEL_COLUMN};
use crate::metrics::EXPORT_COLUMNS;

fn sample_profile(rng: &mut StdRng) -> FeatureRow {
    let draw: f64 = rng.r#gen();
    let command_hash = format!("{:016x}", rng.r#gen::<u64>());

    let (duration, exit_code, timed_out, files, added, deleted): (i32, i32, bool, i32, i32, i32) = if draw < 0.50 {
        // focused edit
        (
            rng.gen_range(120..=3_500),
            0,
            false,
            rng.gen_range(1..=8),
            rng.gen_range(2..=120),
            rng.gen_range(0..=60),
        )
    } else if draw < 0.72 {
        // large refactor
        (
            rng.gen_range(2_500..=26_000),
            0,
            false,
            rng.gen_range(6..=45),
            rng.gen_range(80..=900),
            rng.gen_range(30..=650),
        )
    } else if draw < 0.90 {
        // failed command
        (
            rng.gen_range(200..=10_000),
            1,
            false,
            rng.gen_range(1..=14),
            rng.gen_range(1..=200),
            rng.gen_range(0..=220),
        )
    } else {
        // timeout; 137 only shows up here, the executor itself reports 124
        let exit_code = if rng.gen_bool(0.5) { 124 } else { 137 };
        (
            rng.gen_range(10_000..=120_000),
            exit_code,
            true,
            rng.gen_range(0..=6),
            rng.gen_range(0..=40),
            rng.gen_range(0..=50),
        )
    };

    FeatureRow {
        command_hash,
        duration_ms: f64::from(duration),
        exit_code: f64::from(exit_code),
        timed_out,
        files_touched_count: f64::from(files),
        lines_added: f64::from(added),
        lines_deleted: f64::from(deleted),
        label: None,
    }
}

fn synthetic_label(row: &FeatureRow, rng: &mut StdRng) -> f64 {
    let churn = row.lines_added + row.lines_deleted;
    let mut score = 65.0;
    score += if row.exit_code == 0.0 { 20.0 } else { -20.0 };
    if row.timed_out {
        score -= 28.0;
    }
    score += row.files_touched_count.min(20.0) * 0.75;
    score += (churn / 120.0).min(17.0);
    score -= (row.duration_ms / 24_000.0).min(18.0);
    if row.exit_code != 0.0 && churn > 240.0 {
        score -= 8.0;
    }
    score += rng.gen_range(-6.0..=6.0);
    score.clamp(0.0, 100.0)
}

/// Generate `count` labelled rows. The same seed always yields the same rows.
pub fn generate_rows(count: usize, seed: u64) -> Vec<FeatureRow> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut row = sample_profile(&mut rng);
            row.label = Some(synthetic_label(&row, &mut rng));
            row
        })
        .collect()
}

/// Render labelled rows as a training dataset CSV.
pub fn dataset_csv(rows: &[FeatureRow]) -> String {
    let mut out = EXPORT_COLUMNS.join(",");
    out.push(',');
    out.push_str(LABEL_COLUMN);
    out.push('\n');
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            row.command_hash,
            row.duration_ms as i64,
            row.exit_code as i64,
            u8::from(row.timed_out),
            row.files_touched_count as i64,
            row.lines_added as i64,
            row.lines_deleted as i64,
            row.label.map(|l| format!("{l:.4}")).unwrap_or_default(),
        ));
    }
    out
}

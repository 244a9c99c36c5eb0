use std::collections::HashMap;

use crate::metrics::{CommandMetrics, EXPORT_COLUMNS};

/// Model input columns, in feature-vector order.
pub const FEATURE_COLUMNS: [&str; 7] = [
    "command_hash_bucket",
    "duration_ms",
    "exit_code",
    "timed_out",
    "files_touched_count",
    "lines_added",
    "lines_deleted",
];

/// Name of the supervised target column in training datasets.
pub const LABEL_COLUMN: &str = "productivity_label";

const HASH_BUCKETS: u64 = 1024;

/// Map a command hash into a fixed numeric bucket using its first 16 hex
/// digits. Non-hex characters are skipped; a hash without any maps to 0.
pub fn command_hash_bucket(command_hash: &str) -> u64 {
    let hex: String = command_hash
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_hexdigit())
        .take(16)
        .collect();
    if hex.is_empty() {
        return 0;
    }
    u64::from_str_radix(&hex, 16).map_or(0, |v| v % HASH_BUCKETS)
}

/// A normalized telemetry row as consumed by training and scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub command_hash: String,
    pub duration_ms: f64,
    pub exit_code: f64,
    pub timed_out: bool,
    pub files_touched_count: f64,
    pub lines_added: f64,
    pub lines_deleted: f64,
    pub label: Option<f64>,
}

impl FeatureRow {
    pub fn from_metrics(metrics: &CommandMetrics) -> Self {
        Self {
            command_hash: metrics.command_hash.clone(),
            duration_ms: metrics.duration_ms as f64,
            exit_code: f64::from(metrics.exit_code),
            timed_out: metrics.timed_out,
            files_touched_count: metrics.files_touched_count as f64,
            lines_added: metrics.lines_added as f64,
            lines_deleted: metrics.lines_deleted as f64,
            label: None,
        }
    }

    /// Feature vector in [`FEATURE_COLUMNS`] order.
    pub fn to_vector(&self) -> [f64; 7] {
        [
            command_hash_bucket(&self.command_hash) as f64,
            self.duration_ms,
            self.exit_code,
            if self.timed_out { 1.0 } else { 0.0 },
            self.files_touched_count,
            self.lines_added,
            self.lines_deleted,
        ]
    }

    /// Build a row from a header-keyed record. Empty or missing numeric
    /// cells read as zero, a missing label stays `None`.
    pub fn from_record(record: &HashMap<&str, &str>) -> Result<Self, String> {
        let number = |key: &str| -> Result<f64, String> {
            match record.get(key).map(|v| v.trim()) {
                None | Some("") => Ok(0.0),
                Some(raw) => raw
                    .parse::<f64>()
                    .map_err(|e| format!("invalid {key} value '{raw}': {e}")),
            }
        };

        let label = match record.get(LABEL_COLUMN).map(|v| v.trim()) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<f64>()
                    .map_err(|e| format!("invalid {LABEL_COLUMN} value '{raw}': {e}"))?,
            ),
        };

        Ok(Self {
            command_hash: record
                .get("command_hash")
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            duration_ms: number("duration_ms")?,
            exit_code: number("exit_code")?.trunc(),
            timed_out: parse_flag(record.get("timed_out").copied().unwrap_or("")),
            files_touched_count: number("files_touched_count")?,
            lines_added: number("lines_added")?,
            lines_deleted: number("lines_deleted")?,
            label,
        })
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "y"
    )
}

/// Split one CSV line into fields. Double-quoted fields may contain
/// commas, and `""` inside quotes is a literal quote.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => quoted = false,
            ('"', false) if field.trim().is_empty() => {
                field.clear();
                quoted = true;
            }
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Parse a comma-separated dataset with a header line into rows.
pub fn parse_dataset(content: &str) -> Result<Vec<FeatureRow>, String> {
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let header = split_record(header);
    let columns: Vec<&str> = header.iter().map(|c| c.trim()).collect();
    if !columns.contains(&EXPORT_COLUMNS[0]) {
        return Err(format!("dataset header is missing '{}'", EXPORT_COLUMNS[0]));
    }

    lines
        .enumerate()
        .map(|(i, line)| {
            let fields = split_record(line);
            let record: HashMap<&str, &str> = columns
                .iter()
                .copied()
                .zip(fields.iter().map(String::as_str))
                .collect();
            FeatureRow::from_record(&record).map_err(|e| format!("row {}: {e}", i + 1))
        })
        .collect()
}

/// Pick the feature with the largest absolute contribution.
pub fn strongest_contribution(contributions: &[f64; 7]) -> (&'static str, f64) {
    let mut best = (FEATURE_COLUMNS[0], contributions[0]);
    for (name, value) in FEATURE_COLUMNS.iter().zip(contributions.iter()).skip(1) {
        if value.abs() > best.1.abs() {
            best = (name, *value);
        }
    }
    best
}

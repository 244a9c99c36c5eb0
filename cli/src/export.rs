use std::fmt;
use std::path::Path;
use std::str::FromStr;

use devtrace_core::metrics::{CommandMetrics, EXPORT_COLUMNS};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Jsonl => "jsonl",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format '{0}' (supported: csv, jsonl)")]
    UnsupportedFormat(String),
    #[error("failed to write export {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode export row: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSONL row. Field order matches [`EXPORT_COLUMNS`].
#[derive(Serialize)]
struct ExportRow<'a> {
    command_hash: &'a str,
    duration_ms: i64,
    exit_code: i32,
    timed_out: u8,
    files_touched_count: i64,
    lines_added: i64,
    lines_deleted: i64,
}

impl<'a> From<&'a CommandMetrics> for ExportRow<'a> {
    fn from(m: &'a CommandMetrics) -> Self {
        Self {
            command_hash: &m.command_hash,
            duration_ms: m.duration_ms,
            exit_code: m.exit_code,
            timed_out: u8::from(m.timed_out),
            files_touched_count: m.files_touched_count,
            lines_added: m.lines_added,
            lines_deleted: m.lines_deleted,
        }
    }
}

pub fn render(rows: &[CommandMetrics], format: ExportFormat) -> Result<String, ExportError> {
    let mut out = String::new();
    match format {
        ExportFormat::Csv => {
            out.push_str(&EXPORT_COLUMNS.join(","));
            out.push('\n');
            for row in rows {
                let fields: Vec<String> = row.export_values().iter().map(|v| csv_field(v)).collect();
                out.push_str(&fields.join(","));
                out.push('\n');
            }
        }
        ExportFormat::Jsonl => {
            for row in rows {
                out.push_str(&serde_json::to_string(&ExportRow::from(row))?);
                out.push('\n');
            }
        }
    }
    Ok(out)
}

/// Write `rows` to `path`, creating parent directories. Returns the row count.
pub fn write_export(path: &Path, rows: &[CommandMetrics], format: ExportFormat) -> Result<usize, ExportError> {
    let io_error = |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    };
    let content = render(rows, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(path, content).map_err(io_error)?;
    Ok(rows.len())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use devtrace_core::metrics::ChangeFootprint;
    use serde_json::Value;

    use super::*;

    fn rows() -> Vec<CommandMetrics> {
        vec![
            CommandMetrics::new(
                "aa",
                120,
                0,
                false,
                ChangeFootprint {
                    files_touched: 1,
                    lines_added: 10,
                    lines_deleted: 2,
                },
            ),
            CommandMetrics::new(
                "bb",
                30_000,
                124,
                true,
                ChangeFootprint {
                    files_touched: 3,
                    lines_added: 0,
                    lines_deleted: 4,
                },
            ),
        ]
    }

    #[test]
    fn parses_supported_formats_and_rejects_parquet() {
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("JSONL".parse::<ExportFormat>().unwrap(), ExportFormat::Jsonl);
        let err = "parquet".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedFormat(ref f) if f == "parquet"));
    }

    #[test]
    fn csv_and_jsonl_carry_the_same_rows() {
        let rows = rows();
        let csv = render(&rows, ExportFormat::Csv).unwrap();
        let jsonl = render(&rows, ExportFormat::Jsonl).unwrap();

        let mut csv_lines = csv.lines();
        assert_eq!(csv_lines.next(), Some(EXPORT_COLUMNS.join(",").as_str()));
        let csv_rows: Vec<Vec<String>> = csv_lines
            .map(|l| l.split(',').map(str::to_string).collect())
            .collect();

        let json_rows: Vec<Vec<String>> = jsonl
            .lines()
            .map(|l| {
                let v: Value = serde_json::from_str(l).unwrap();
                EXPORT_COLUMNS
                    .iter()
                    .map(|c| match &v[*c] {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect();

        assert_eq!(csv_rows.len(), 2);
        assert_eq!(csv_rows, json_rows);
        assert_eq!(csv_rows[1][3], "1");
    }

    #[test]
    fn jsonl_keys_follow_column_order() {
        let jsonl = render(&rows()[..1], ExportFormat::Jsonl).unwrap();
        assert!(jsonl.starts_with("{\"command_hash\":\"aa\",\"duration_ms\":120,"));
        assert!(jsonl.trim_end().ends_with("\"lines_deleted\":2}"));
    }

    #[test]
    fn empty_export_still_has_csv_header() {
        assert_eq!(
            render(&[], ExportFormat::Csv).unwrap(),
            format!("{}\n", EXPORT_COLUMNS.join(","))
        );
        assert_eq!(render(&[], ExportFormat::Jsonl).unwrap(), "");
    }

    #[test]
    fn writes_file_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        assert_eq!(write_export(&path, &rows(), ExportFormat::Csv).unwrap(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Exit code reported for a command that was killed after its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Column order shared by every export format and the scoring dataset.
pub const EXPORT_COLUMNS: [&str; 7] = [
    "command_hash",
    "duration_ms",
    "exit_code",
    "timed_out",
    "files_touched_count",
    "lines_added",
    "lines_deleted",
];

/// Outstanding uncommitted changes observed in a repository right after a
/// command finished. A snapshot of repository state, not a causal diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFootprint {
    pub files_touched: i64,
    pub lines_added: i64,
    pub lines_deleted: i64,
}

impl ChangeFootprint {
    pub fn is_empty(&self) -> bool {
        self.files_touched == 0 && self.lines_added == 0 && self.lines_deleted == 0
    }
}

/// Metrics captured for a single command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CommandMetrics {
    pub command_hash: String,
    pub duration_ms: i64,
    pub exit_code: i32,
    pub timed_out: bool,
    pub files_touched_count: i64,
    pub lines_added: i64,
    pub lines_deleted: i64,
}

impl CommandMetrics {
    pub fn new(
        command_hash: impl Into<String>,
        duration_ms: i64,
        exit_code: i32,
        timed_out: bool,
        footprint: ChangeFootprint,
    ) -> Self {
        Self {
            command_hash: command_hash.into(),
            duration_ms: duration_ms.max(0),
            exit_code,
            timed_out,
            files_touched_count: footprint.files_touched,
            lines_added: footprint.lines_added,
            lines_deleted: footprint.lines_deleted,
        }
    }

    /// A command that left no file changes behind carries no signal and is
    /// never persisted.
    pub fn is_noop(&self) -> bool {
        self.files_touched_count == 0 && self.lines_added == 0 && self.lines_deleted == 0
    }

    /// Export row in [`EXPORT_COLUMNS`] order, `timed_out` encoded as 0/1.
    pub fn export_values(&self) -> [String; 7] {
        [
            self.command_hash.clone(),
            self.duration_ms.to_string(),
            self.exit_code.to_string(),
            u8::from(self.timed_out).to_string(),
            self.files_touched_count.to_string(),
            self.lines_added.to_string(),
            self.lines_deleted.to_string(),
        ]
    }
}

/// Scoring output stored alongside an event at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Prediction {
    pub predicted_productivity: f64,
    pub top_contribution_feature: String,
    pub top_contribution_value: f64,
    /// Opaque reference to the model that produced this prediction
    pub model_ref: String,
}

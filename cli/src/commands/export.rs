use std::path::Path;

use serde_json::json;

use crate::export::ExportFormat;
use crate::util::{exit_error, open_store_or_exit, print_json};

pub async fn run(home: &Path, out: &Path, format: &str) -> i32 {
    // reject before touching the store or the output path
    let format: ExportFormat = match format.parse() {
        Ok(format) => format,
        Err(e) => exit_error(&e.to_string(), Some("Use --format csv or --format jsonl.")),
    };

    let store = open_store_or_exit(home).await;
    let rows = match store.export(out, format).await {
        Ok(rows) => rows,
        Err(e) => exit_error(&e.to_string(), None),
    };
    print_json(&json!({
        "rows": rows,
        "format": format.as_str(),
        "path": out.display().to_string(),
    }));
    store.close().await;
    0
}

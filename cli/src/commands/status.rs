use std::path::Path;

use serde_json::json;

use crate::state;
use crate::util::{exit_error, open_store_or_exit, print_json};

pub async fn run(home: &Path, entries: bool) -> i32 {
    let store = open_store_or_exit(home).await;
    let status = match store.sync_status().await {
        Ok(status) => status,
        Err(e) => exit_error(&e.to_string(), None),
    };
    let mut out = json!({
        "database": store.db_path().display().to_string(),
        "current_agent": state::load(home).current_agent,
        "sync": status,
    });
    if entries {
        match store.queue_entries().await {
            Ok(queue) => out["queue"] = json!(queue),
            Err(e) => exit_error(&e.to_string(), None),
        }
    }
    print_json(&out);
    store.close().await;
    0
}

use std::path::Path;

use serde_json::json;

use crate::util::{exit_error, open_store_or_exit, print_json};

pub async fn run(home: &Path, limit: Option<u32>) -> i32 {
    let store = open_store_or_exit(home).await;
    let events = match store.list(limit).await {
        Ok(events) => events,
        Err(e) => exit_error(&e.to_string(), None),
    };
    print_json(&json!({
        "count": events.len(),
        "events": events,
    }));
    store.close().await;
    0
}

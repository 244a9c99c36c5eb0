use std::path::Path;

use serde_json::json;

use crate::migrations::CURRENT_SCHEMA_VERSION;
use crate::util::{open_store_or_exit, print_json};

pub async fn run(home: &Path) -> i32 {
    let store = open_store_or_exit(home).await;
    print_json(&json!({
        "status": "ok",
        "database": store.db_path().display().to_string(),
        "schema_version": CURRENT_SCHEMA_VERSION,
    }));
    store.close().await;
    0
}

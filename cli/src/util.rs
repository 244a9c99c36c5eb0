use std::path::Path;

use serde::Serialize;
use serde_json::json;

use crate::store::{LocalStore, StoreError};

/// Exit code for usage and storage failures of devtrace itself.
pub const EXIT_FAILURE: i32 = 1;

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", render(&err));
    std::process::exit(EXIT_FAILURE);
}

/// Print a structured error without exiting. Used where the caller's exit
/// code must stay the wrapped command's.
pub fn report_error(error: &str, message: &str) {
    let err = json!({
        "error": error,
        "message": message
    });
    eprintln!("{}", render(&err));
}

pub fn print_json<T: Serialize>(value: &T) {
    println!("{}", render(value));
}

pub fn eprint_json<T: Serialize>(value: &T) {
    eprintln!("{}", render(value));
}

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
}

/// Open the local store and make sure its schema is current.
pub async fn open_store(home: &Path) -> Result<LocalStore, StoreError> {
    let store = LocalStore::open(home).await?;
    store.ensure_storage().await?;
    Ok(store)
}

/// Open the store or exit with a structured error.
pub async fn open_store_or_exit(home: &Path) -> LocalStore {
    match open_store(home).await {
        Ok(store) => store,
        Err(e) => exit_error(
            &e.to_string(),
            Some("Check --path / DEVTRACE_HOME points to a writable directory."),
        ),
    }
}

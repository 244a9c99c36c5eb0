use std::path::Path;
use std::time::Duration;

use crate::sync::SyncClient;
use crate::util::{exit_error, open_store_or_exit, print_json};

/// Sync one batch. Delivery failures are reported in the output and still
/// exit 0; the entries stay queued for the next run.
pub async fn run(home: &Path, api_url: &str, batch_size: u32, timeout: Duration) -> i32 {
    let client = match SyncClient::new(api_url, batch_size, timeout) {
        Ok(client) => client,
        Err(e) => exit_error(&e.to_string(), Some("Set --api-url or DEVTRACE_API_URL.")),
    };
    let store = open_store_or_exit(home).await;
    let report = match client.sync_pending(&store).await {
        Ok(report) => report,
        Err(e) => exit_error(&e.to_string(), None),
    };
    print_json(&report);
    store.close().await;
    0
}

use std::time::Duration;

use serde_json::json;

use crate::sync::SyncClient;
use crate::util::{exit_error, print_json};

pub async fn run(api_url: &str, timeout: Duration) -> i32 {
    let client = match SyncClient::new(api_url, 1, timeout) {
        Ok(client) => client,
        Err(e) => exit_error(&e.to_string(), Some("Set --api-url or DEVTRACE_API_URL.")),
    };
    match client.health().await {
        Ok(health) => {
            print_json(&health);
            0
        }
        Err(e) => {
            print_json(&json!({
                "status": "unreachable",
                "api_url": api_url,
                "message": e.to_string(),
            }));
            1
        }
    }
}

use std::path::Path;

use clap::Subcommand;
use serde_json::json;

use crate::state;
use crate::util::{exit_error, print_json};

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Set the default agent attached to new events
    Set {
        /// Agent identifier
        agent_id: String,
    },
    /// Clear the default agent
    Clear,
    /// Show the default agent
    Show,
}

pub async fn run(home: &Path, command: AgentCommands) -> i32 {
    let next = match command {
        AgentCommands::Show => {
            print_json(&json!({ "current_agent": state::load(home).current_agent }));
            return 0;
        }
        AgentCommands::Set { agent_id } => {
            let agent_id = agent_id.trim();
            if agent_id.is_empty() {
                exit_error("agent id must not be empty", Some("Use 'devtrace agent clear' to unset."));
            }
            Some(agent_id.to_string())
        }
        AgentCommands::Clear => None,
    };

    let mut current = state::load(home);
    current.current_agent = next;
    if let Err(e) = state::save(home, &current) {
        exit_error(
            &format!("failed to write {}: {e}", state::state_path(home).display()),
            None,
        );
    }
    print_json(&current);
    0
}

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const STATE_FILE: &str = "state.json";

/// Session state shared by every invocation against one storage directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub current_agent: Option<String>,
}

pub fn state_path(home: &Path) -> PathBuf {
    home.join(STATE_FILE)
}

/// Read the state file. Missing or unreadable state is treated as empty.
pub fn load(home: &Path) -> SessionState {
    let path = state_path(home);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return SessionState::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read state file");
            return SessionState::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "ignoring malformed state file");
        SessionState::default()
    })
}

/// Replace the state file atomically (write to a sibling, then rename).
pub fn save(home: &Path, state: &SessionState) -> io::Result<()> {
    std::fs::create_dir_all(home)?;
    let path = state_path(home);
    let tmp = home.join(format!(".{STATE_FILE}.{}.tmp", std::process::id()));
    let data = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, &path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}

/// Agent for a new event: an explicit value wins over the session default.
pub fn resolve_agent(explicit: Option<&str>, home: &Path) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .or_else(|| load(home).current_agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(dir.path()), SessionState::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let state = SessionState {
            current_agent: Some("reviewer".to_string()),
        };
        save(dir.path(), &state).unwrap();
        assert_eq!(load(dir.path()), state);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn malformed_state_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(state_path(dir.path()), "{not json").unwrap();
        assert_eq!(load(dir.path()).current_agent, None);
    }

    #[test]
    fn explicit_agent_overrides_session() {
        let dir = tempfile::tempdir().unwrap();
        save(
            dir.path(),
            &SessionState {
                current_agent: Some("session".to_string()),
            },
        )
        .unwrap();
        assert_eq!(resolve_agent(Some("cli"), dir.path()).as_deref(), Some("cli"));
        assert_eq!(resolve_agent(Some("  "), dir.path()).as_deref(), Some("session"));
        assert_eq!(resolve_agent(None, dir.path()).as_deref(), Some("session"));
    }
}

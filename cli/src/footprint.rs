//! Working-tree change footprint from `git diff --numstat`.
//!
//! The footprint is the repository's outstanding uncommitted state right
//! after a command finishes, staged and unstaged combined. Any git failure
//! degrades to an empty footprint and never fails the run.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use devtrace_core::metrics::ChangeFootprint;
use tokio::process::Command;

/// Per-path (added, deleted) line counts.
pub type NumstatMap = BTreeMap<String, (i64, i64)>;

/// Source of the change footprint for a repository path.
pub trait FootprintSource {
    fn collect(&self, repo: &Path) -> impl Future<Output = ChangeFootprint> + Send;
}

/// Reads the footprint by invoking the `git` binary.
#[derive(Debug, Clone)]
pub struct GitFootprint {
    program: PathBuf,
}

impl Default for GitFootprint {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitFootprint {
    #[cfg(test)]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn numstat(&self, repo: &Path, staged: bool) -> Option<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-C").arg(repo).arg("diff");
        if staged {
            cmd.arg("--cached");
        }
        cmd.arg("--numstat")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                tracing::debug!(repo = %repo.display(), error = %e, "git unavailable, empty footprint");
                return None;
            }
        };
        if !output.status.success() {
            tracing::debug!(
                repo = %repo.display(),
                staged,
                status = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git diff failed, empty footprint"
            );
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl FootprintSource for GitFootprint {
    async fn collect(&self, repo: &Path) -> ChangeFootprint {
        let Some(unstaged) = self.numstat(repo, false).await else {
            return ChangeFootprint::default();
        };
        let staged = self.numstat(repo, true).await.unwrap_or_default();
        summarize(&merge(parse_numstat(&unstaged), parse_numstat(&staged)))
    }
}

/// Parse `git diff --numstat` output. Binary files (`-` counts) contribute
/// zero lines but still count as touched. Malformed lines are skipped.
pub fn parse_numstat(output: &str) -> NumstatMap {
    let mut map = NumstatMap::new();
    for line in output.lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(added), Some(deleted), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if path.is_empty() {
            continue;
        }
        let entry = map.entry(path.to_string()).or_insert((0, 0));
        entry.0 += parse_count(added);
        entry.1 += parse_count(deleted);
    }
    map
}

fn parse_count(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or(0).max(0)
}

/// Union of two numstat maps, summing counts for paths present in both.
pub fn merge(mut unstaged: NumstatMap, staged: NumstatMap) -> NumstatMap {
    for (path, (added, deleted)) in staged {
        let entry = unstaged.entry(path).or_insert((0, 0));
        entry.0 += added;
        entry.1 += deleted;
    }
    unstaged
}

pub fn summarize(map: &NumstatMap) -> ChangeFootprint {
    ChangeFootprint {
        files_touched: map.len() as i64,
        lines_added: map.values().map(|(a, _)| a).sum(),
        lines_deleted: map.values().map(|(_, d)| d).sum(),
    }
}

/// Fixed footprint, for exercising callers without a repository.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFootprint(pub ChangeFootprint);

#[cfg(test)]
impl FootprintSource for StaticFootprint {
    async fn collect(&self, _repo: &Path) -> ChangeFootprint {
        self.0
    }
}

#[cfg(test)]
pub(crate) mod test_git {
    use std::path::Path;
    use std::process::Command;

    pub fn available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn git(repo: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args([
                "-c",
                "user.name=devtrace",
                "-c",
                "user.email=devtrace@example.invalid",
                "-c",
                "commit.gpgsign=false",
            ])
            .args(args)
            .output()
            .unwrap();
        assert!(status.status.success(), "git {args:?} failed: {status:?}");
    }

    /// Repository with one committed two-line file, `tracked.txt`.
    pub fn repo_with_commit(repo: &Path) {
        git(repo, &["init", "-q"]);
        std::fs::write(repo.join("tracked.txt"), "a\nb\n").unwrap();
        git(repo, &["add", "tracked.txt"]);
        git(repo, &["commit", "-q", "-m", "init"]);
    }
}

use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use devtrace_core::hashing::hash_command;
use devtrace_core::metrics::TIMEOUT_EXIT_CODE;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// How long to keep draining output after the child is gone. A background
/// grandchild can hold the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Shell-convention exit code for a command that never ran.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionError::Spawn { source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                127
            }
            _ => 126,
        }
    }
}

/// Outcome of one wrapped command, with its output buffered for replay.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub command_hash: String,
    pub duration_ms: i64,
    pub exit_code: i32,
    pub timed_out: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecutionOutcome {
    /// Replay the captured output on this process's own streams.
    pub fn forward_output(&self) -> std::io::Result<()> {
        let mut out = std::io::stdout().lock();
        out.write_all(&self.stdout)?;
        out.flush()?;
        let mut err = std::io::stderr().lock();
        err.write_all(&self.stderr)?;
        err.flush()
    }
}

/// Run `argv` in `cwd`, killing it once `timeout` elapses.
///
/// A timeout is a normal outcome (`timed_out = true`, exit code 124) and
/// whatever the process printed before being killed is kept. Only a failure
/// to start the process is an error.
pub async fn execute(
    argv: &[String],
    cwd: &Path,
    timeout: Option<Duration>,
) -> Result<ExecutionOutcome, ExecutionError> {
    let (program, args) = argv.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let command_hash = hash_command(argv);

    let started = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutionError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let readers: Vec<JoinHandle<()>> = [
        child
            .stdout
            .take()
            .map(|pipe| tokio::spawn(drain(pipe, Arc::clone(&stdout_buf)))),
        child
            .stderr
            .take()
            .map(|pipe| tokio::spawn(drain(pipe, Arc::clone(&stderr_buf)))),
    ]
    .into_iter()
    .flatten()
    .collect();

    let wait_error = |source| ExecutionError::Wait {
        program: program.clone(),
        source,
    };

    let status = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => Some(status.map_err(wait_error)?),
            Err(_) => {
                tracing::debug!(program = %program, timeout_ms = limit.as_millis() as u64, "command timed out, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(program = %program, error = %e, "failed to kill timed out command");
                }
                None
            }
        },
        None => Some(child.wait().await.map_err(wait_error)?),
    };
    let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
            tracing::debug!(program = %program, "output pipe still open after exit, truncating capture");
            reader.abort();
        }
    }

    let (exit_code, timed_out) = match status {
        Some(status) => (exit_code_of(status), false),
        None => (TIMEOUT_EXIT_CODE, true),
    };

    Ok(ExecutionOutcome {
        command_hash,
        duration_ms: duration_ms.max(0),
        exit_code,
        timed_out,
        stdout: take_buffer(&stdout_buf),
        stderr: take_buffer(&stderr_buf),
    })
}

async fn drain<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => match sink.lock() {
                Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
            },
        }
    }
}

fn take_buffer(buf: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
    match buf.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

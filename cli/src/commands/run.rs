use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use devtrace_core::metrics::{CommandMetrics, Prediction};
use devtrace_core::scoring::{LinearModel, Scorer};
use serde_json::json;

use crate::assemble::{assemble_metrics, predict};
use crate::footprint::{FootprintSource, GitFootprint};
use crate::runner::{self, ExecutionError, ExecutionOutcome};
use crate::state;
use crate::util::{eprint_json, open_store, report_error};

#[derive(Args)]
pub struct RunArgs {
    /// Agent to attribute the event to (defaults to `devtrace agent set`)
    #[arg(long, short = 'a')]
    pub agent: Option<String>,

    /// Kill the command after this many seconds (exit code 124)
    #[arg(long, short = 't', value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Repository to run in and measure
    #[arg(long, short = 'r', default_value = ".")]
    pub repo: PathBuf,

    /// Model file used to score the event
    #[arg(long, env = "DEVTRACE_MODEL")]
    pub model: Option<PathBuf>,

    /// Skip the JSON summary printed to stderr after the command
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Command to run, after `--`
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if secs <= 0.0 {
        return Err("timeout must be positive".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

struct Invocation<'a> {
    argv: &'a [String],
    repo: &'a Path,
    timeout: Option<Duration>,
    agent: Option<&'a str>,
}

struct RunRecord {
    outcome: ExecutionOutcome,
    metrics: CommandMetrics,
    prediction: Option<Prediction>,
    event_id: Option<String>,
    storage_error: Option<String>,
}

/// Execute, measure, score and persist one command. Storage failures are
/// carried in the record; only a failure to start the command is an error.
async fn capture_and_store<F, S>(
    home: &Path,
    invocation: &Invocation<'_>,
    source: &F,
    scorer: Option<&S>,
    forward: bool,
) -> Result<RunRecord, ExecutionError>
where
    F: FootprintSource,
    S: Scorer,
{
    let outcome = runner::execute(invocation.argv, invocation.repo, invocation.timeout).await?;
    if forward {
        if let Err(e) = outcome.forward_output() {
            tracing::debug!(error = %e, "failed to forward command output");
        }
    }

    let metrics = assemble_metrics(source, &outcome, invocation.repo).await;
    let prediction = if metrics.is_noop() {
        None
    } else {
        predict(scorer, &metrics)
    };

    let stored = match open_store(home).await {
        Ok(store) => {
            let result = store.insert(invocation.agent, &metrics, prediction.as_ref()).await;
            store.close().await;
            result
        }
        Err(e) => Err(e),
    };
    let (event_id, storage_error) = match stored {
        Ok(id) => (id, None),
        Err(e) => (None, Some(e.to_string())),
    };

    Ok(RunRecord {
        outcome,
        metrics,
        prediction,
        event_id,
        storage_error,
    })
}

/// Returns the wrapped command's exit code, whatever happens to telemetry.
pub async fn run(home: &Path, args: RunArgs) -> i32 {
    let scorer = args.model.as_deref().and_then(|path| match LinearModel::load(path) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::warn!(error = %e, "model unavailable, events will not be scored");
            None
        }
    });
    let agent = state::resolve_agent(args.agent.as_deref(), home);

    let invocation = Invocation {
        argv: &args.command,
        repo: &args.repo,
        timeout: args.timeout,
        agent: agent.as_deref(),
    };
    let record = match capture_and_store(
        home,
        &invocation,
        &GitFootprint::default(),
        scorer.as_ref(),
        true,
    )
    .await
    {
        Ok(record) => record,
        Err(e) => {
            report_error("execution_error", &e.to_string());
            return e.exit_code();
        }
    };

    if let Some(message) = &record.storage_error {
        report_error("storage_error", message);
    }
    if !args.quiet {
        eprint_json(&json!({
            "event_id": record.event_id,
            "agent_id": agent,
            "stored": record.event_id.is_some(),
            "metrics": record.metrics,
            "prediction": record.prediction,
        }));
    }
    record.outcome.exit_code
}

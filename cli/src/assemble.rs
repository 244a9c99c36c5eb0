use std::path::Path;

use devtrace_core::features::FeatureRow;
use devtrace_core::metrics::{CommandMetrics, Prediction};
use devtrace_core::scoring::Scorer;

use crate::footprint::FootprintSource;
use crate::runner::ExecutionOutcome;

/// Combine an execution outcome with the repository footprint observed
/// after it finished.
pub async fn assemble_metrics<F>(source: &F, outcome: &ExecutionOutcome, repo: &Path) -> CommandMetrics
where
    F: FootprintSource,
{
    let footprint = source.collect(repo).await;
    CommandMetrics::new(
        outcome.command_hash.clone(),
        outcome.duration_ms,
        outcome.exit_code,
        outcome.timed_out,
        footprint,
    )
}

/// Score metrics if a model is configured. A scoring failure is logged and
/// the event is kept without a prediction.
pub fn predict<S: Scorer>(scorer: Option<&S>, metrics: &CommandMetrics) -> Option<Prediction> {
    let scorer = scorer?;
    match scorer.score(&FeatureRow::from_metrics(metrics)) {
        Ok(prediction) => Some(prediction),
        Err(e) => {
            tracing::warn!(error = %e, "scoring failed, storing event without prediction");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use devtrace_core::metrics::ChangeFootprint;
    use devtrace_core::scoring::ScoringError;

    use super::*;
    use crate::footprint::StaticFootprint;

    fn outcome(exit_code: i32, timed_out: bool) -> ExecutionOutcome {
        ExecutionOutcome {
            command_hash: "ab".repeat(32),
            duration_ms: 42,
            exit_code,
            timed_out,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    struct Failing;

    impl Scorer for Failing {
        fn score(&self, _row: &FeatureRow) -> Result<Prediction, ScoringError> {
            Err(ScoringError::EmptyDataset)
        }
    }

    struct Fixed;

    impl Scorer for Fixed {
        fn score(&self, _row: &FeatureRow) -> Result<Prediction, ScoringError> {
            Ok(Prediction {
                predicted_productivity: 50.0,
                top_contribution_feature: "lines_added".to_string(),
                top_contribution_value: 1.5,
                model_ref: "fixed".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn carries_outcome_and_footprint() {
        let source = StaticFootprint(ChangeFootprint {
            files_touched: 2,
            lines_added: 7,
            lines_deleted: 3,
        });
        let metrics = assemble_metrics(&source, &outcome(124, true), Path::new(".")).await;
        assert_eq!(metrics.exit_code, 124);
        assert!(metrics.timed_out);
        assert_eq!(metrics.duration_ms, 42);
        assert_eq!(metrics.files_touched_count, 2);
        assert_eq!(metrics.lines_added, 7);
        assert_eq!(metrics.lines_deleted, 3);
        assert!(!metrics.is_noop());
    }

    #[tokio::test]
    async fn empty_footprint_is_noop() {
        let metrics =
            assemble_metrics(&StaticFootprint::default(), &outcome(0, false), Path::new(".")).await;
        assert!(metrics.is_noop());
    }

    #[test]
    fn scoring_failure_yields_no_prediction() {
        let metrics = CommandMetrics::new("h", 1, 0, false, ChangeFootprint::default());
        assert!(predict(Some(&Failing), &metrics).is_none());
        assert!(predict::<Failing>(None, &metrics).is_none());
        assert_eq!(
            predict(Some(&Fixed), &metrics).map(|p| p.model_ref),
            Some("fixed".to_string())
        );
    }
}

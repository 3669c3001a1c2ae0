//! Evaluation and the bounded refinement loop.

use tracing::debug;

use super::state::{OrchestrationState, Phase};
use super::{EVALUATE_CALL, Orchestrator, REFINE_CALL};

impl Orchestrator {
    /// Replace the workflow's baseline quality with the evaluator's score.
    pub(super) async fn rescore(&self, state: &mut OrchestrationState) {
        let (answer, query) = (state.final_result.clone(), state.query.clone());
        let report = self
            .tracked(state, EVALUATE_CALL, self.evaluator.evaluate(&answer, &query))
            .await;

        match report {
            Ok(report) => {
                state.quality_score = report.score.clamp(0.0, 1.0);
                for issue in report.issues {
                    state.warn(format!("Quality: {issue}"));
                }
            }
            Err(e) => state.warn(format!("Quality evaluation failed, keeping baseline: {e}")),
        }
    }

    /// Evaluate and rewrite until the answer clears the quality threshold
    /// or `max_iterations` is spent. Any failure ends the loop with the
    /// best answer so far.
    pub(super) async fn refine(&self, state: &mut OrchestrationState) {
        let threshold = self.config.quality_threshold;
        let max = self.config.max_iterations;
        let query = state.query.clone();

        while state.quality_score < threshold && state.iterations < max {
            state.enter(Phase::Refining);
            state.iterations += 1;

            let answer = state.final_result.clone();
            let evaluation = self
                .tracked(state, EVALUATE_CALL, self.evaluator.evaluate(&answer, &query))
                .await;
            let report = match evaluation {
                Ok(report) => report,
                Err(e) => {
                    state.warn(format!("Evaluation failed, stopping refinement: {e}"));
                    break;
                }
            };

            debug!(
                iteration = state.iterations,
                score = report.score,
                issues = report.issues.len(),
                "Answer evaluated"
            );
            if report.score >= threshold {
                state.quality_score = report.score.min(1.0);
                break;
            }

            let rewrite = self
                .tracked(
                    state,
                    REFINE_CALL,
                    self.synthesizer.refine(&answer, &query, &report.issues),
                )
                .await;
            match rewrite {
                Ok(text) => {
                    let bumped = (report.score + self.config.refinement_increment).min(1.0);
                    state.answer(text, bumped);
                }
                Err(e) => {
                    state.warn(format!("Refinement failed, keeping current answer: {e}"));
                    break;
                }
            }
        }
    }
}

//! Structured lifecycle events for an evaluation run.
//!
//! Every event carries an `event` field so JSON log lines can be filtered
//! by name. [`run_span`] tags everything logged inside a run with its id.

use tracing::info;

use crate::runtime::RuntimeState;

/// Span tagging everything logged during one run with its id and source.
///
/// Not entered here: the pipeline instruments its future with it, since the
/// future may move between threads.
pub fn run_span(run_id: &str, source_file: &str) -> tracing::Span {
    tracing::info_span!("drvgrade.run", run_id = %run_id, source_file = %source_file)
}

pub fn emit_evaluation_started(run_id: &str, source_file: &str) {
    info!(event = "evaluation.started", run_id = %run_id, source_file = %source_file);
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

/// Stage finished with its outcome and wall-clock duration.
pub fn emit_stage_finished(stage: &str, success: bool, duration_ms: u64) {
    info!(
        event = "stage.finished",
        stage = %stage,
        success = success,
        duration_ms = duration_ms,
    );
}

pub fn emit_runtime_transition(from: RuntimeState, to: RuntimeState) {
    info!(event = "runtime.transition", from = from.name(), to = to.name());
}

pub fn emit_probe_finished(probe: &str, passed: bool, skipped: bool) {
    info!(event = "probe.finished", probe = %probe, passed = passed, skipped = skipped);
}

pub fn emit_score_computed(run_id: &str, final_score: f64) {
    info!(event = "score.computed", run_id = %run_id, final_score = final_score);
}

/// A fault caught at a stage boundary (warning level).
pub fn emit_stage_fault(stage: &str, fault: &dyn std::fmt::Display) {
    tracing::warn!(event = "stage.fault", stage = %stage, fault = %fault);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_and_events() {
        let span = run_span("run-1", "hello.c");
        span.in_scope(|| {
            emit_evaluation_started("run-1", "hello.c");
            emit_stage_started("compile");
            emit_stage_finished("compile", true, 12);
            emit_runtime_transition(RuntimeState::NotBuilt, RuntimeState::Built);
            emit_probe_finished("smoke", true, false);
            emit_score_computed("run-1", 42.5);
            emit_stage_fault("runtime", &"boom");
        });
    }
}

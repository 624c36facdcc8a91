//! Build -> load -> unload state machine value and the runtime report.

use serde::{Deserialize, Serialize};

use crate::probe::DynamicReport;

/// Lifecycle state of the artifact under test.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    NotBuilt,
    Built,
    Loaded,
    Unloaded,
    Failed,
}

/// Attempted transition that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal runtime transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: RuntimeState,
    pub to: RuntimeState,
}

impl RuntimeState {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeState::NotBuilt => "not_built",
            RuntimeState::Built => "built",
            RuntimeState::Loaded => "loaded",
            RuntimeState::Unloaded => "unloaded",
            RuntimeState::Failed => "failed",
        }
    }

    /// Forward steps are strictly adjacent; `Failed` is reachable from every
    /// state except itself and nothing leaves it.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        use RuntimeState::*;
        matches!(
            (self, next),
            (NotBuilt, Built)
                | (Built, Loaded)
                | (Loaded, Unloaded)
                | (NotBuilt | Built | Loaded | Unloaded, Failed)
        )
    }

    /// Transition function: the next state, or the rejected pair.
    pub fn transition(self, next: RuntimeState) -> Result<RuntimeState, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RuntimeState::Failed | RuntimeState::Unloaded)
    }
}

/// Every state a run passed through, starting at `NotBuilt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeTrace {
    history: Vec<RuntimeState>,
}

impl Default for RuntimeTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeTrace {
    pub fn new() -> Self {
        Self {
            history: vec![RuntimeState::NotBuilt],
        }
    }

    pub fn current(&self) -> RuntimeState {
        self.history
            .last()
            .copied()
            .unwrap_or(RuntimeState::NotBuilt)
    }

    /// Apply one transition; the history is unchanged on rejection.
    pub fn advance(&mut self, next: RuntimeState) -> Result<RuntimeState, IllegalTransition> {
        let state = self.current().transition(next)?;
        self.history.push(state);
        Ok(state)
    }

    pub fn reached(&self, state: RuntimeState) -> bool {
        self.history.contains(&state)
    }

    pub fn history(&self) -> &[RuntimeState] {
        &self.history
    }
}

/// Outcome of the runtime stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeReport {
    /// Module name derived from the source file stem.
    pub module_name: String,

    pub trace: RuntimeTrace,

    /// A kernel log snapshot was taken while the module was loaded.
    pub diagnostic_log_captured: bool,

    /// Recoverable events and best-effort failures, in order.
    pub notes: Vec<String>,

    /// Why the run ended in `Failed`, if it did.
    pub failure: Option<String>,

    /// Dynamic probe results, present once the module was loaded.
    pub dynamic: Option<DynamicReport>,
}

impl RuntimeReport {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            trace: RuntimeTrace::new(),
            diagnostic_log_captured: false,
            notes: Vec::new(),
            failure: None,
            dynamic: None,
        }
    }

    /// A runtime stage that never started.
    pub fn skipped(module_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut report = Self::new(module_name);
        report.notes.push(reason.into());
        report
    }

    pub fn final_state(&self) -> RuntimeState {
        self.trace.current()
    }

    pub fn built(&self) -> bool {
        self.trace.reached(RuntimeState::Built)
    }

    pub fn loaded(&self) -> bool {
        self.trace.reached(RuntimeState::Loaded)
    }

    pub fn unloaded(&self) -> bool {
        self.trace.reached(RuntimeState::Unloaded)
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RuntimeState::*;

    const ALL: [RuntimeState; 5] = [NotBuilt, Built, Loaded, Unloaded, Failed];

    #[test]
    fn test_forward_path() {
        let mut trace = RuntimeTrace::new();
        trace.advance(Built).unwrap();
        trace.advance(Loaded).unwrap();
        trace.advance(Unloaded).unwrap();
        assert_eq!(trace.history(), &[NotBuilt, Built, Loaded, Unloaded]);
    }

    #[test]
    fn test_cannot_skip_built() {
        let err = NotBuilt.transition(Loaded).unwrap_err();
        assert_eq!(err.from, NotBuilt);
        assert_eq!(err.to, Loaded);
        assert!(!NotBuilt.can_transition_to(Unloaded));
        assert!(!Built.can_transition_to(Unloaded));
    }

    #[test]
    fn test_no_backward_transitions() {
        assert!(!Loaded.can_transition_to(Built));
        assert!(!Unloaded.can_transition_to(Loaded));
        assert!(!Built.can_transition_to(NotBuilt));
    }

    #[test]
    fn test_failed_reachable_from_every_live_state() {
        for state in [NotBuilt, Built, Loaded, Unloaded] {
            assert_eq!(state.transition(Failed), Ok(Failed));
        }
    }

    #[test]
    fn test_failed_is_terminal() {
        for next in ALL {
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_trace_rejection_leaves_history() {
        let mut trace = RuntimeTrace::new();
        assert!(trace.advance(Unloaded).is_err());
        assert_eq!(trace.history(), &[NotBuilt]);
    }

    #[test]
    fn test_every_accepted_sequence_respects_order() {
        // Exhaustive over all 3-step sequences: Loaded never appears without
        // Built before it, Unloaded never without Loaded before it.
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let mut trace = RuntimeTrace::new();
                    for step in [a, b, c] {
                        let _ = trace.advance(step);
                    }
                    let h = trace.history();
                    let pos = |s| h.iter().position(|x| *x == s);
                    if let Some(l) = pos(Loaded) {
                        assert!(pos(Built).is_some_and(|b| b < l));
                    }
                    if let Some(u) = pos(Unloaded) {
                        assert!(pos(Loaded).is_some_and(|l| l < u));
                    }
                }
            }
        }
    }

    #[test]
    fn test_report_milestones() {
        let mut report = RuntimeReport::new("hello_driver");
        report.trace.advance(Built).unwrap();
        report.trace.advance(Loaded).unwrap();
        assert!(report.built());
        assert!(report.loaded());
        assert!(!report.unloaded());
        assert_eq!(report.final_state(), Loaded);
    }

    #[test]
    fn test_skipped_report() {
        let report = RuntimeReport::skipped("m", "runtime disabled");
        assert_eq!(report.final_state(), NotBuilt);
        assert_eq!(report.notes, vec!["runtime disabled".to_string()]);
        assert!(!report.built());
    }
}

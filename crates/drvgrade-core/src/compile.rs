//! Compile outcome record and the soft-pass verdict.

use serde::{Deserialize, Serialize};

use crate::diagnostics::DiagnosticSummary;

/// How the source was compiled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompileMethod {
    /// Syntax-only compile with the plain compiler.
    Fallback,
    /// Module build through the kernel build tree.
    Privileged,
}

impl CompileMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CompileMethod::Fallback => "fallback",
            CompileMethod::Privileged => "privileged",
        }
    }
}

/// Outcome of the compile stage.
///
/// `success` is true only when `error_count == 0`, or when every reported
/// error matched the missing-dependency signature (soft pass).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompileResult {
    pub success: bool,
    pub method: CompileMethod,
    pub error_count: usize,
    pub warning_count: usize,
    pub note: Option<String>,

    /// Combined stdout+stderr of the attempt that decided the outcome.
    pub diagnostic_text: String,

    /// Name of the artifact a privileged build produced, if any.
    pub artifact_ref: Option<String>,

    pub duration_ms: u64,
}

impl CompileResult {
    /// Verdict for a syntax-only compile that ran to completion.
    ///
    /// The fallback compiler reports every failure with an error marker, so
    /// the diagnostics alone decide the outcome.
    pub fn judge_fallback(summary: &DiagnosticSummary, diagnostic_text: String) -> Self {
        let soft = summary.is_soft_pass();
        Self {
            success: summary.is_clean() || soft,
            method: CompileMethod::Fallback,
            error_count: summary.error_count,
            warning_count: summary.warning_count,
            note: soft.then(|| {
                format!(
                    "Soft pass: {} error(s), all from missing build dependencies",
                    summary.error_count
                )
            }),
            diagnostic_text,
            artifact_ref: None,
            duration_ms: 0,
        }
    }

    /// Verdict for a privileged build that ran to completion.
    pub fn judge_privileged(
        exit_ok: bool,
        summary: &DiagnosticSummary,
        diagnostic_text: String,
        artifact_ref: Option<String>,
    ) -> Self {
        let success = exit_ok && summary.is_clean();
        Self {
            success,
            method: CompileMethod::Privileged,
            error_count: summary.error_count,
            warning_count: summary.warning_count,
            note: (!exit_ok && summary.is_clean())
                .then(|| "Privileged build failed without compiler errors".to_string()),
            diagnostic_text,
            artifact_ref: if success { artifact_ref } else { None },
            duration_ms: 0,
        }
    }

    /// An attempt that could not run to completion (timeout, spawn failure,
    /// permission denial). Counts come from whatever output was captured.
    pub fn aborted(
        method: CompileMethod,
        summary: &DiagnosticSummary,
        partial_output: String,
        note: String,
    ) -> Self {
        Self {
            success: false,
            method,
            error_count: summary.error_count,
            warning_count: summary.warning_count,
            note: Some(note),
            diagnostic_text: partial_output,
            artifact_ref: None,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Prepend context to the note (e.g. why the fallback ran).
    pub fn with_leading_note(mut self, note: &str) -> Self {
        self.note = Some(match self.note.take() {
            Some(existing) => format!("{note}; {existing}"),
            None => note.to_string(),
        });
        self
    }
}

//! Compiler diagnostic classification.
//!
//! Scans combined compiler output for error/warning markers and sorts every
//! error into "missing build dependency" or "unrelated". The markers and the
//! missing-dependency patterns come from [`SignatureConfig`], since they are
//! tied to one toolchain's diagnostic vocabulary.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::SignatureConfig;
use crate::error::{EvalError, Result};

/// Maximum number of diagnostic lines retained in a summary.
pub const MAX_RETAINED_DIAGNOSTICS: usize = 100;

/// Severity level for a diagnostic line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// A single diagnostic line from compiler output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// The output line, trimmed.
    pub message: String,

    /// Whether the line matches a missing-dependency pattern.
    pub missing_dependency: bool,
}

/// Counts derived from one block of diagnostic text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticSummary {
    pub error_count: usize,
    pub warning_count: usize,

    /// Errors on lines matching a missing-dependency pattern.
    pub missing_dependency_errors: usize,

    /// Errors on lines matching no missing-dependency pattern.
    pub unrelated_errors: usize,

    /// Lines matching a missing-dependency pattern, with or without an
    /// error marker (make reports absent targets without one).
    pub missing_dependency_lines: usize,

    /// First [`MAX_RETAINED_DIAGNOSTICS`] diagnostic lines.
    pub diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSummary {
    /// No error markers at all.
    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    /// Errors present, and every one of them is a missing dependency.
    pub fn is_soft_pass(&self) -> bool {
        self.error_count > 0 && self.unrelated_errors == 0
    }

    /// The output points at an absent dependency and at nothing else.
    pub fn solely_missing_dependency(&self) -> bool {
        self.unrelated_errors == 0
            && (self.missing_dependency_errors > 0 || self.missing_dependency_lines > 0)
    }
}

/// Compiled diagnostic vocabulary.
#[derive(Debug, Clone)]
pub struct DiagnosticSignature {
    error_marker: Regex,
    warning_marker: Regex,
    missing_dependency: Vec<Regex>,
    already_loaded: Regex,
}

impl DiagnosticSignature {
    /// Compile the patterns from configuration.
    pub fn from_config(config: &SignatureConfig) -> Result<Self> {
        Ok(Self {
            error_marker: compile(&config.error_marker)?,
            warning_marker: compile(&config.warning_marker)?,
            missing_dependency: config
                .missing_dependency
                .iter()
                .map(|p| compile(p))
                .collect::<Result<Vec<_>>>()?,
            already_loaded: compile(&config.already_loaded)?,
        })
    }

    /// Whether a single line is attributable to an absent dependency.
    pub fn is_missing_dependency(&self, line: &str) -> bool {
        self.missing_dependency.iter().any(|re| re.is_match(line))
    }

    /// Whether a load failure reports an already-resident instance.
    pub fn is_already_loaded(&self, text: &str) -> bool {
        self.already_loaded.is_match(text)
    }

    /// Classify combined stdout+stderr of a compile attempt.
    pub fn classify(&self, text: &str) -> DiagnosticSummary {
        let mut summary = DiagnosticSummary::default();

        for line in text.lines() {
            let errors = self.error_marker.find_iter(line).count();
            let warnings = self.warning_marker.find_iter(line).count();
            let missing = self.is_missing_dependency(line);

            if missing {
                summary.missing_dependency_lines += 1;
            }

            if errors > 0 {
                summary.error_count += errors;
                if missing {
                    summary.missing_dependency_errors += errors;
                } else {
                    summary.unrelated_errors += errors;
                }
            }
            summary.warning_count += warnings;

            if (errors > 0 || warnings > 0)
                && summary.diagnostics.len() < MAX_RETAINED_DIAGNOSTICS
            {
                summary.diagnostics.push(Diagnostic {
                    severity: if errors > 0 {
                        Severity::Error
                    } else {
                        Severity::Warning
                    },
                    message: line.trim().to_string(),
                    missing_dependency: missing,
                });
            }
        }

        summary
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| EvalError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

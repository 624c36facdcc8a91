//! Pattern-based source analyzers.
//!
//! Each analyzer is a pure `&str -> AnalyzerOutput` function. They are held
//! in an explicit, ordered [`AnalyzerRegistry`] so callers can add, remove,
//! or replace one without touching pipeline control flow.

pub mod capabilities;
pub mod performance;
pub mod security;
pub mod structure;
pub mod style;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::panic_message;

pub use capabilities::{detect_capabilities, CapabilitySignal};
pub use performance::PerformanceAnalyzer;
pub use security::SecurityAnalyzer;
pub use structure::StructureAnalyzer;
pub use style::StyleAnalyzer;

/// Which sub-score an analyzer provides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    Structure,
    Style,
    Security,
    Performance,
}

impl AnalyzerKind {
    pub fn name(&self) -> &'static str {
        match self {
            AnalyzerKind::Structure => "structure",
            AnalyzerKind::Style => "style",
            AnalyzerKind::Security => "security",
            AnalyzerKind::Performance => "performance",
        }
    }
}

/// Normalized analyzer result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalyzerOutput {
    /// Sub-score in `[0, 1]`.
    pub score: f64,

    /// Named component scores in `[0, 1]` (e.g. style's documentation score).
    pub components: BTreeMap<String, f64>,

    pub details: Vec<String>,
}

impl AnalyzerOutput {
    pub fn new(score: f64) -> Self {
        Self {
            score: clamp_unit(score),
            ..Self::default()
        }
    }

    pub fn with_component(mut self, name: &str, value: f64) -> Self {
        self.components.insert(name.to_string(), clamp_unit(value));
        self
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    pub fn component(&self, name: &str) -> Option<f64> {
        self.components.get(name).copied()
    }
}

/// A pure source analyzer.
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    fn analyze(&self, source: &str) -> AnalyzerOutput;
}

/// Results of every registered analyzer, keyed by kind.
pub type AnalysisSet = BTreeMap<AnalyzerKind, AnalyzerOutput>;

/// Ordered list of analyzers.
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// structure, style, security, performance.
    pub fn standard() -> Self {
        Self::new()
            .with(StructureAnalyzer)
            .with(StyleAnalyzer)
            .with(SecurityAnalyzer)
            .with(PerformanceAnalyzer)
    }

    /// Append an analyzer; a later analyzer of the same kind replaces the
    /// earlier one's output.
    pub fn with(mut self, analyzer: impl Analyzer + 'static) -> Self {
        self.analyzers.push(Box::new(analyzer));
        self
    }

    /// Drop every analyzer of the given kind.
    pub fn without(mut self, kind: AnalyzerKind) -> Self {
        self.analyzers.retain(|a| a.kind() != kind);
        self
    }

    pub fn kinds(&self) -> Vec<AnalyzerKind> {
        self.analyzers.iter().map(|a| a.kind()).collect()
    }

    pub fn run_all(&self, source: &str) -> AnalysisSet {
        self.analyzers
            .iter()
            .map(|a| (a.kind(), a.analyze(source)))
            .collect()
    }

    /// Like [`run_all`](Self::run_all), but an analyzer that panics is left
    /// out of the set and described in the returned faults.
    pub fn run_guarded(&self, source: &str) -> (AnalysisSet, Vec<String>) {
        let mut set = AnalysisSet::new();
        let mut faults = Vec::new();
        for analyzer in &self.analyzers {
            let kind = analyzer.kind();
            match catch_unwind(AssertUnwindSafe(|| analyzer.analyze(source))) {
                Ok(output) => {
                    set.insert(kind, output);
                }
                Err(panic) => faults.push(format!(
                    "{} analyzer fault: {}",
                    kind.name(),
                    panic_message(&*panic)
                )),
            }
        }
        (set, faults)
    }
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn function_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*[A-Za-z_][\w\s\*]+\s+([A-Za-z_]\w*)\s*\([^)]*\)\s*\{")
            .expect("function header pattern is valid")
    })
}

const CONTROL_KEYWORDS: [&str; 5] = ["if", "for", "while", "switch", "return"];

/// Byte offsets of every function header (first non-blank character).
pub(crate) fn function_starts(source: &str) -> Vec<usize> {
    function_header()
        .captures_iter(source)
        .filter(|caps| !CONTROL_KEYWORDS.contains(&&caps[1]))
        .filter_map(|caps| caps.get(0))
        .map(|m| {
            let header = m.as_str();
            m.start() + (header.len() - header.trim_start().len())
        })
        .collect()
}

/// Approximate line lengths of every function body, found by matching a
/// header and counting braces until they balance.
pub fn function_lengths(source: &str) -> Vec<usize> {
    function_starts(source)
        .into_iter()
        .map(|start| {
            let mut depth: i64 = 0;
            let mut opened = false;
            let mut lines = 0usize;
            for line in source[start..].lines() {
                lines += 1;
                let opens = line.matches('{').count() as i64;
                depth += opens;
                depth -= line.matches('}').count() as i64;
                opened |= opens > 0;
                if opened && depth <= 0 {
                    break;
                }
            }
            lines.max(1)
        })
        .collect()
}

/// Mean of [`function_lengths`], or 0 when there are no functions.
pub fn average_function_length(source: &str) -> f64 {
    let lengths = function_lengths(source);
    if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    }
}

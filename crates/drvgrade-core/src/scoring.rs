//! Score aggregation.
//!
//! Merges compile, runtime and dynamic outcomes with the analyzer sub-scores
//! into five independently clamped categories. The final score is the plain
//! sum of the clamped awards and is never renormalised.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analyzers::style::{DOCUMENTATION, MAINTAINABILITY, STYLE};
use crate::analyzers::{
    clamp_unit, AnalysisSet, AnalyzerKind, AnalyzerOutput, CapabilitySignal,
};
use crate::compile::CompileResult;
use crate::runtime::RuntimeReport;

pub const COMPILE_POINTS: f64 = 30.0;
pub const STRUCTURE_POINTS: f64 = 10.0;
pub const RUNTIME_POINTS_CAP: f64 = 10.0;

pub const RUNTIME_BUILT_POINTS: f64 = 2.0;
pub const RUNTIME_LOADED_POINTS: f64 = 4.0;
pub const RUNTIME_UNLOADED_POINTS: f64 = 2.0;
pub const RUNTIME_LOG_POINTS: f64 = 2.0;

/// Top-level scoring bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Correctness,
    Security,
    #[serde(rename = "Code Quality")]
    CodeQuality,
    Performance,
    Advanced,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Correctness,
        Category::Security,
        Category::CodeQuality,
        Category::Performance,
        Category::Advanced,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Correctness => "Correctness",
            Category::Security => "Security",
            Category::CodeQuality => "Code Quality",
            Category::Performance => "Performance",
            Category::Advanced => "Advanced",
        }
    }

    /// Points available in this category.
    pub fn max_points(&self) -> f64 {
        match self {
            Category::Correctness => 40.0,
            Category::Security => 25.0,
            Category::CodeQuality => 20.0,
            Category::Performance => 10.0,
            Category::Advanced => 5.0,
        }
    }
}

/// Award for one category. `0 <= awarded <= max` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub awarded: f64,
    pub max: f64,
    pub details: Vec<String>,
}

impl CategoryScore {
    fn new(category: Category, raw: f64, details: Vec<String>) -> Self {
        let max = category.max_points();
        let clamped = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, max) };
        Self {
            awarded: round2(clamped),
            max,
            details,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Category name -> award, in [`Category::ALL`] order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ScoreBreakdown {
    categories: BTreeMap<Category, CategoryScore>,
}

impl ScoreBreakdown {
    pub fn get(&self, category: Category) -> Option<&CategoryScore> {
        self.categories.get(&category)
    }

    pub fn awarded(&self, category: Category) -> f64 {
        self.get(category).map(|c| c.awarded).unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &CategoryScore)> {
        self.categories.iter()
    }

    /// Exact sum of the clamped awards.
    pub fn final_score(&self) -> f64 {
        self.categories.values().map(|c| c.awarded).sum()
    }
}

/// Everything the aggregator consumes for one run.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub compilation: &'a CompileResult,

    /// `None` when the runtime stage never started.
    pub runtime: Option<&'a RuntimeReport>,

    pub analyses: &'a AnalysisSet,
    pub capabilities: &'a [CapabilitySignal],
}

pub fn aggregate(inputs: &ScoreInputs<'_>) -> ScoreBreakdown {
    let categories = [
        (Category::Correctness, correctness(inputs)),
        (Category::Security, security(inputs.analyses)),
        (Category::CodeQuality, code_quality(inputs.analyses)),
        (Category::Performance, performance(inputs.analyses)),
        (Category::Advanced, advanced(inputs.capabilities)),
    ]
    .into_iter()
    .map(|(category, (raw, details))| (category, CategoryScore::new(category, raw, details)))
    .collect();

    ScoreBreakdown { categories }
}

fn analysis<'a>(
    analyses: &'a AnalysisSet,
    kind: AnalyzerKind,
    details: &mut Vec<String>,
) -> Option<&'a AnalyzerOutput> {
    let out = analyses.get(&kind);
    if out.is_none() {
        details.push(format!("{} analyzer not registered; scored as 0", kind.name()));
    }
    out
}

fn correctness(inputs: &ScoreInputs<'_>) -> (f64, Vec<String>) {
    let mut details = Vec::new();
    let mut raw = 0.0;

    let compile = inputs.compilation;
    if compile.success {
        raw += COMPILE_POINTS;
        details.push(format!(
            "Compilation: success (method={})",
            compile.method.name()
        ));
    } else {
        details.push(format!(
            "Compilation failed ({} error(s), method={})",
            compile.error_count,
            compile.method.name()
        ));
    }
    if let Some(note) = &compile.note {
        details.push(note.clone());
    }

    if let Some(structure) = analysis(inputs.analyses, AnalyzerKind::Structure, &mut details) {
        let score = clamp_unit(structure.score);
        let awarded = score * STRUCTURE_POINTS;
        raw += awarded;
        details.push(format!(
            "Functionality score: {score:.2} -> {awarded:.2}/{STRUCTURE_POINTS:.0}"
        ));
    }

    match inputs.runtime {
        None => details.push("Runtime: not run".to_string()),
        Some(report) => {
            let steps = [
                (report.built(), RUNTIME_BUILT_POINTS, "built"),
                (report.loaded(), RUNTIME_LOADED_POINTS, "loaded"),
                (report.unloaded(), RUNTIME_UNLOADED_POINTS, "unloaded"),
                (
                    report.diagnostic_log_captured,
                    RUNTIME_LOG_POINTS,
                    "diagnostic log captured",
                ),
            ];
            let reached: Vec<&str> = steps.iter().filter(|s| s.0).map(|s| s.2).collect();
            let points: f64 = steps.iter().filter(|s| s.0).map(|s| s.1).sum();
            let points = points.min(RUNTIME_POINTS_CAP);
            raw += points;
            details.push(format!(
                "Runtime: {} -> {points:.0}/{RUNTIME_POINTS_CAP:.0}",
                if reached.is_empty() {
                    "no milestones".to_string()
                } else {
                    reached.join(", ")
                }
            ));
        }
    }

    (raw, details)
}

fn security(analyses: &AnalysisSet) -> (f64, Vec<String>) {
    let max = Category::Security.max_points();
    let mut details = Vec::new();
    let Some(out) = analysis(analyses, AnalyzerKind::Security, &mut details) else {
        return (0.0, details);
    };
    if !out.components.is_empty() {
        let subs: Vec<String> = out
            .components
            .iter()
            .map(|(k, v)| format!("{k}={v:.2}"))
            .collect();
        details.push(format!("sub_scores: {}", subs.join(", ")));
    }
    if !out.details.is_empty() {
        details.push(format!("issues: {}", out.details.join(", ")));
    }
    (clamp_unit(out.score) * max, details)
}

fn code_quality(analyses: &AnalysisSet) -> (f64, Vec<String>) {
    let max = Category::CodeQuality.max_points();
    let mut details = Vec::new();
    let Some(out) = analysis(analyses, AnalyzerKind::Style, &mut details) else {
        return (0.0, details);
    };
    let part = |name: &str| clamp_unit(out.component(name).unwrap_or(out.score));
    let (style, docs, maintain) = (part(STYLE), part(DOCUMENTATION), part(MAINTAINABILITY));
    details.push(format!(
        "style={style:.3}, documentation={docs:.3}, maintainability={maintain:.3}"
    ));
    ((0.4 * style + 0.3 * docs + 0.3 * maintain) * max, details)
}

fn performance(analyses: &AnalysisSet) -> (f64, Vec<String>) {
    let max = Category::Performance.max_points();
    let mut details = Vec::new();
    let Some(out) = analysis(analyses, AnalyzerKind::Performance, &mut details) else {
        return (0.0, details);
    };
    details.extend(out.details.iter().cloned());
    (clamp_unit(out.score) * max, details)
}

fn advanced(capabilities: &[CapabilitySignal]) -> (f64, Vec<String>) {
    let raw = capabilities.iter().map(|c| c.points()).sum();
    let details = capabilities.iter().map(|c| c.label().to_string()).collect();
    (raw, details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::CompileMethod;
    use crate::runtime::RuntimeState;

    fn compiled(success: bool) -> CompileResult {
        CompileResult {
            success,
            method: CompileMethod::Fallback,
            error_count: if success { 0 } else { 1 },
            warning_count: 0,
            note: None,
            diagnostic_text: String::new(),
            artifact_ref: None,
            duration_ms: 0,
        }
    }

    fn perfect_analyses() -> AnalysisSet {
        let mut set = AnalysisSet::new();
        set.insert(AnalyzerKind::Structure, AnalyzerOutput::new(1.0));
        set.insert(
            AnalyzerKind::Style,
            AnalyzerOutput::new(1.0)
                .with_component(STYLE, 1.0)
                .with_component(DOCUMENTATION, 1.0)
                .with_component(MAINTAINABILITY, 1.0),
        );
        set.insert(AnalyzerKind::Security, AnalyzerOutput::new(1.0));
        set.insert(AnalyzerKind::Performance, AnalyzerOutput::new(1.0));
        set
    }

    fn full_runtime() -> RuntimeReport {
        let mut report = RuntimeReport::new("m");
        report.trace.advance(RuntimeState::Built).unwrap();
        report.trace.advance(RuntimeState::Loaded).unwrap();
        report.trace.advance(RuntimeState::Unloaded).unwrap();
        report.diagnostic_log_captured = true;
        report
    }

    #[test]
    fn test_perfect_run_caps_at_100() {
        let compile = compiled(true);
        let runtime = full_runtime();
        let analyses = perfect_analyses();
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: Some(&runtime),
            analyses: &analyses,
            capabilities: &CapabilitySignal::ALL,
        });
        assert_eq!(breakdown.awarded(Category::Correctness), 40.0);
        assert_eq!(breakdown.final_score(), 100.0);
    }

    #[test]
    fn test_awards_always_within_bounds() {
        let compile = compiled(true);
        let runtime = full_runtime();
        let mut analyses = perfect_analyses();
        analyses.insert(
            AnalyzerKind::Security,
            AnalyzerOutput {
                score: 4.0,
                ..AnalyzerOutput::default()
            },
        );
        let caps = [CapabilitySignal::DeviceTree; 6];
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: Some(&runtime),
            analyses: &analyses,
            capabilities: &caps,
        });
        for (_, c) in breakdown.iter() {
            assert!(c.awarded >= 0.0 && c.awarded <= c.max);
        }
        assert_eq!(breakdown.awarded(Category::Security), 25.0);
        assert_eq!(breakdown.awarded(Category::Advanced), 5.0);
        let sum: f64 = Category::ALL.iter().map(|c| breakdown.awarded(*c)).sum();
        assert_eq!(breakdown.final_score(), sum);
    }

    #[test]
    fn test_runtime_increments() {
        let compile = compiled(true);
        let mut runtime = RuntimeReport::new("m");
        runtime.trace.advance(RuntimeState::Built).unwrap();
        runtime.trace.advance(RuntimeState::Loaded).unwrap();
        runtime.trace.advance(RuntimeState::Unloaded).unwrap();
        let analyses = AnalysisSet::new();
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: Some(&runtime),
            analyses: &analyses,
            capabilities: &[],
        });
        assert_eq!(breakdown.awarded(Category::Correctness), 38.0);
    }

    #[test]
    fn test_failed_compile_keeps_structure_credit() {
        let compile = compiled(false);
        let mut analyses = perfect_analyses();
        analyses.insert(AnalyzerKind::Structure, AnalyzerOutput::new(0.5));
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        assert_eq!(breakdown.awarded(Category::Correctness), 5.0);
        assert_eq!(breakdown.awarded(Category::Security), 25.0);
        assert_eq!(breakdown.awarded(Category::CodeQuality), 20.0);
        assert_eq!(breakdown.awarded(Category::Performance), 10.0);
    }

    #[test]
    fn test_missing_analyzer_scores_zero_with_note() {
        let compile = compiled(true);
        let analyses = AnalysisSet::new();
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        let security = breakdown.get(Category::Security).unwrap();
        assert_eq!(security.awarded, 0.0);
        assert!(security.details[0].contains("not registered"));
        assert_eq!(breakdown.final_score(), 30.0);
    }

    #[test]
    fn test_code_quality_weights() {
        let mut analyses = AnalysisSet::new();
        analyses.insert(
            AnalyzerKind::Style,
            AnalyzerOutput::new(0.0)
                .with_component(STYLE, 0.5)
                .with_component(DOCUMENTATION, 1.0)
                .with_component(MAINTAINABILITY, 0.0),
        );
        let (raw, _) = code_quality(&analyses);
        assert!((raw - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_structure_score_is_clamped() {
        let compile = compiled(false);
        let mut analyses = perfect_analyses();
        analyses.insert(
            AnalyzerKind::Structure,
            AnalyzerOutput {
                score: 2.5,
                ..AnalyzerOutput::default()
            },
        );
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        assert_eq!(breakdown.awarded(Category::Correctness), 10.0);
    }

    #[test]
    fn test_nan_structure_score_keeps_compile_credit() {
        let compile = compiled(true);
        let mut analyses = perfect_analyses();
        analyses.insert(
            AnalyzerKind::Structure,
            AnalyzerOutput {
                score: f64::NAN,
                ..AnalyzerOutput::default()
            },
        );
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        assert_eq!(breakdown.awarded(Category::Correctness), 30.0);
    }

    #[test]
    fn test_max_points_per_category() {
        let total: f64 = Category::ALL.iter().map(|c| c.max_points()).sum();
        assert_eq!(total, 100.0);
        assert_eq!(Category::CodeQuality.max_points(), 20.0);
    }

    #[test]
    fn test_breakdown_serializes_category_names() {
        let compile = compiled(true);
        let analyses = perfect_analyses();
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compile,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        let json = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(json["Code Quality"]["max"], 20.0);
        assert_eq!(json["Correctness"]["awarded"], 40.0);
    }
}

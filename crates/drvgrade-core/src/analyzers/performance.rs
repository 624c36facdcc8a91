//! Static performance heuristics on a 10-point scale, normalised to [0, 1].

use std::sync::OnceLock;

use regex::Regex;

use super::{average_function_length, Analyzer, AnalyzerKind, AnalyzerOutput};

const LONG_FUNCTION_LINES: f64 = 100.0;
const BRANCH_ALLOWANCE: usize = 20;

fn branch_keyword() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(if|for|while|switch|goto)\b").expect("branch pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PerformanceAnalyzer;

impl Analyzer for PerformanceAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Performance
    }

    fn analyze(&self, source: &str) -> AnalyzerOutput {
        let mut points: f64 = 10.0;
        let mut details = Vec::new();

        let avg = average_function_length(source);
        if avg > LONG_FUNCTION_LINES {
            let penalty = ((avg - LONG_FUNCTION_LINES) / 50.0).min(3.0);
            points -= penalty;
            details.push(format!("average function length {avg:.1} -> -{penalty:.1}"));
        }

        let branches = branch_keyword().find_iter(source).count();
        if branches > BRANCH_ALLOWANCE {
            let penalty = ((branches - BRANCH_ALLOWANCE) as f64 / 20.0).min(3.0);
            points -= penalty;
            details.push(format!("branch keywords {branches} -> -{penalty:.1}"));
        }

        if source.contains("kmalloc") && (source.contains("1024") || source.contains("4096")) {
            points -= 2.0;
            details.push("large kmalloc detected -> -2.0".to_string());
        }

        AnalyzerOutput::new(points.clamp(0.0, 10.0) / 10.0).with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_source_is_full_score() {
        let out = PerformanceAnalyzer.analyze("int f(void) {\n\treturn 0;\n}\n");
        assert_eq!(out.score, 1.0);
        assert!(out.details.is_empty());
    }

    #[test]
    fn test_branch_density_penalty() {
        let source = "if (x) y();\n".repeat(40);
        let out = PerformanceAnalyzer.analyze(&source);
        assert!((out.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_large_allocation_penalty() {
        let out = PerformanceAnalyzer.analyze("p = kmalloc(4096, GFP_KERNEL);");
        assert!((out.score - 0.8).abs() < 1e-9);
        assert_eq!(out.details.len(), 1);
    }

    #[test]
    fn test_penalties_are_capped() {
        let body = "\tx++;\n".repeat(400);
        let source = format!("int f(void) {{\n{body}}}\n");
        let out = PerformanceAnalyzer.analyze(&source);
        assert!((out.score - 0.7).abs() < 1e-9);
    }
}

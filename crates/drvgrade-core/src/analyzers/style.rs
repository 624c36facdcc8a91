//! Layout, documentation and maintainability heuristics.
//!
//! Kernel style indents with tabs and keeps lines within 80 columns; each
//! long line and each space-indented line counts as one violation.

use super::{function_lengths, function_starts, Analyzer, AnalyzerKind, AnalyzerOutput};

pub const MAX_LINE_WIDTH: usize = 80;

pub const STYLE: &str = "style";
pub const DOCUMENTATION: &str = "documentation";
pub const MAINTAINABILITY: &str = "maintainability";

const MODULE_METADATA: [&str; 3] = ["MODULE_LICENSE", "MODULE_AUTHOR", "MODULE_DESCRIPTION"];

/// Violation counts from one pass over the source lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Violations {
    pub long_lines: usize,
    pub space_indented: usize,
}

impl Violations {
    pub fn total(&self) -> usize {
        self.long_lines + self.space_indented
    }
}

pub fn count_violations(source: &str) -> Violations {
    let mut v = Violations::default();
    for line in source.lines() {
        if line.chars().count() > MAX_LINE_WIDTH {
            v.long_lines += 1;
        }
        // Block comment continuation lines (" * text") are conventional.
        let trimmed = line.trim_start();
        if line.starts_with(' ') && !trimmed.is_empty() && !trimmed.starts_with('*') {
            v.space_indented += 1;
        }
    }
    v
}

/// Functions whose header is immediately preceded by a comment.
pub fn commented_functions(source: &str) -> usize {
    function_starts(source)
        .into_iter()
        .filter(|&start| {
            source[..start]
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .is_some_and(|l| l.ends_with("*/") || l.starts_with("//"))
        })
        .count()
}

pub fn documentation_score(source: &str) -> f64 {
    let metadata = if MODULE_METADATA.iter().all(|m| source.contains(m)) {
        0.5
    } else {
        0.0
    };
    let comments = (0.1 * commented_functions(source) as f64).min(0.5);
    (metadata + comments).min(1.0)
}

pub fn maintainability_score(source: &str) -> f64 {
    let lengths = function_lengths(source);
    if lengths.is_empty() {
        return 1.0;
    }
    let avg = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
    (1.0 - avg / 500.0).max(0.0)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StyleAnalyzer;

impl Analyzer for StyleAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Style
    }

    fn analyze(&self, source: &str) -> AnalyzerOutput {
        let violations = count_violations(source);
        let style = (1.0 - violations.total() as f64 / 100.0).max(0.0);
        let documentation = documentation_score(source);
        let maintainability = maintainability_score(source);

        AnalyzerOutput::new(0.4 * style + 0.3 * documentation + 0.3 * maintainability)
            .with_component(STYLE, style)
            .with_component(DOCUMENTATION, documentation)
            .with_component(MAINTAINABILITY, maintainability)
            .with_details(vec![
                format!("long lines: {}", violations.long_lines),
                format!("space-indented lines: {}", violations.space_indented),
                format!("commented functions: {}", commented_functions(source)),
            ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENTED: &str = "MODULE_LICENSE(\"GPL\");\nMODULE_AUTHOR(\"a\");\nMODULE_DESCRIPTION(\"d\");\n\n/* Say hello. */\nstatic int hello(void)\n{\n\treturn 0;\n}\n\n// Say bye.\nstatic void bye(void)\n{\n}\n";

    #[test]
    fn test_clean_source_has_no_violations() {
        assert_eq!(count_violations(DOCUMENTED).total(), 0);
    }

    #[test]
    fn test_long_and_space_indented_lines() {
        let source = format!("{}\n    int x;\n\tint y;\n /* ok */\n   * cont\n", "x".repeat(81));
        let v = count_violations(&source);
        assert_eq!(v.long_lines, 1);
        assert_eq!(v.space_indented, 2);
    }

    #[test]
    fn test_documentation_score() {
        assert_eq!(commented_functions(DOCUMENTED), 2);
        assert!((documentation_score(DOCUMENTED) - 0.7).abs() < 1e-9);
        assert_eq!(documentation_score("int x;"), 0.0);
    }

    #[test]
    fn test_style_score_floors_at_zero() {
        let source = "  x;\n".repeat(150);
        let out = StyleAnalyzer.analyze(&source);
        assert_eq!(out.component(STYLE), Some(0.0));
    }

    #[test]
    fn test_maintainability_without_functions() {
        assert_eq!(maintainability_score("int x;"), 1.0);
        let out = StyleAnalyzer.analyze(DOCUMENTED);
        assert!(out.component(MAINTAINABILITY).unwrap() > 0.98);
    }
}

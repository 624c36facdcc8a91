//! Security heuristics in four areas, each starting at 1.0 and losing a
//! fixed penalty per finding.

use std::sync::OnceLock;

use regex::Regex;

use super::{Analyzer, AnalyzerKind, AnalyzerOutput};

pub const MEMORY_SAFETY: &str = "memory_safety";
pub const RESOURCE_MANAGEMENT: &str = "resource_management";
pub const RACE_CONDITIONS: &str = "race_conditions";
pub const INPUT_VALIDATION: &str = "input_validation";

struct Patterns {
    unsafe_call: Regex,
    fixed_buffer: Regex,
    alloc: Regex,
    free: Regex,
    copy_to_user_len: Regex,
    copy_from_user_len: Regex,
    user_deref: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("security pattern is valid");
        Patterns {
            unsafe_call: re(r"\b(strcpy|sprintf|gets)\s*\("),
            fixed_buffer: re(r"char\s+\w+\s*\[\d+\];"),
            alloc: re(r"\b(k[mz]alloc|vmalloc)"),
            free: re(r"\b(kfree|vfree)\b"),
            copy_to_user_len: re(r"copy_to_user\s*\([^,]+,[^,]+,.*len"),
            copy_from_user_len: re(r"copy_from_user\s*\([^,]+,[^,]+,.*len"),
            user_deref: re(r"\*\s*__user"),
        }
    })
}

/// Sub-scores and the findings behind them.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityFindings {
    pub memory_safety: f64,
    pub resource_management: f64,
    pub race_conditions: f64,
    pub input_validation: f64,
    pub issues: Vec<String>,
}

impl SecurityFindings {
    pub fn mean(&self) -> f64 {
        (self.memory_safety + self.resource_management + self.race_conditions + self.input_validation)
            / 4.0
    }
}

pub fn scan(source: &str) -> SecurityFindings {
    let p = patterns();
    let mut issues = Vec::new();

    let mut memory: f64 = 1.0;
    let mut unsafe_calls: Vec<&str> = p
        .unsafe_call
        .captures_iter(source)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    unsafe_calls.sort_unstable();
    unsafe_calls.dedup();
    for call in unsafe_calls {
        issues.push(format!("unsafe_function:{call}"));
        memory -= 0.3;
    }
    if p.fixed_buffer.is_match(source) {
        issues.push("fixed_buffer_array".to_string());
        memory -= 0.2;
    }

    let mut resources: f64 = 1.0;
    if p.alloc.find_iter(source).count() > p.free.find_iter(source).count() {
        issues.push("possible_memory_leak".to_string());
        resources -= 0.3;
    }

    let mut races: f64 = 1.0;
    if source.contains("mutex_lock") && !source.contains("mutex_unlock") {
        issues.push("mutex_not_unlocked".to_string());
        races -= 0.4;
    }
    if source.contains("spin_lock") && !source.contains("spin_unlock") {
        issues.push("spinlock_not_unlocked".to_string());
        races -= 0.4;
    }

    let mut input: f64 = 1.0;
    if source.contains("copy_to_user") && !p.copy_to_user_len.is_match(source) {
        issues.push("copy_to_user_unchecked".to_string());
        input -= 0.3;
    }
    if source.contains("copy_from_user") && !p.copy_from_user_len.is_match(source) {
        issues.push("copy_from_user_unchecked".to_string());
        input -= 0.3;
    }
    if p.user_deref.is_match(source) {
        issues.push("unchecked_user_pointer".to_string());
        input -= 0.3;
    }

    SecurityFindings {
        memory_safety: memory.max(0.0),
        resource_management: resources.max(0.0),
        race_conditions: races.max(0.0),
        input_validation: input.max(0.0),
        issues,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityAnalyzer;

impl Analyzer for SecurityAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Security
    }

    fn analyze(&self, source: &str) -> AnalyzerOutput {
        let findings = scan(source);
        AnalyzerOutput::new(findings.mean())
            .with_component(MEMORY_SAFETY, findings.memory_safety)
            .with_component(RESOURCE_MANAGEMENT, findings.resource_management)
            .with_component(RACE_CONDITIONS, findings.race_conditions)
            .with_component(INPUT_VALIDATION, findings.input_validation)
            .with_details(findings.issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_source_scores_full() {
        let source = "static ssize_t r(char __user *buf, size_t len) {\n\treturn copy_to_user(buf, msg, len);\n}\n";
        let out = SecurityAnalyzer.analyze(source);
        assert_eq!(out.score, 1.0);
        assert!(out.details.is_empty());
    }

    #[test]
    fn test_unsafe_calls_and_fixed_buffer() {
        let source = "char buf[64];\nstrcpy(buf, s);\nsprintf(buf, \"%d\", 1);\n";
        let findings = scan(source);
        assert!((findings.memory_safety - 0.2).abs() < 1e-9);
        assert!(findings.issues.contains(&"unsafe_function:strcpy".to_string()));
        assert!(findings.issues.contains(&"fixed_buffer_array".to_string()));
    }

    #[test]
    fn test_similar_names_are_not_unsafe_calls() {
        let findings = scan("strscpy(a, b, n);\nsnprintf(a, n, \"x\");\nfgets(a);\n");
        assert_eq!(findings.memory_safety, 1.0);
    }

    #[test]
    fn test_leak_and_lock_imbalance() {
        let source = "p = kmalloc(8, GFP_KERNEL);\nq = kzalloc(8, GFP_KERNEL);\nkfree(p);\nmutex_lock(&m);\n";
        let findings = scan(source);
        assert!((findings.resource_management - 0.7).abs() < 1e-9);
        assert!((findings.race_conditions - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_sub_scores_floor_at_zero() {
        let source = "copy_to_user(a, b, 4);\ncopy_from_user(a, b, 4);\nvoid * __user p;\nstrcpy(a,b);sprintf(a,b);gets(a);\nchar x[4];\n";
        let findings = scan(source);
        assert_eq!(findings.memory_safety, 0.0);
        assert!((findings.input_validation - 0.1).abs() < 1e-9);
        let out = SecurityAnalyzer.analyze(source);
        assert!(out.score >= 0.0 && out.score <= 1.0);
    }
}

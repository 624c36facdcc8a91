//! Driver family detection and functional completeness.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{function_lengths, Analyzer, AnalyzerKind, AnalyzerOutput};

/// Driver family inferred from the symbols the source references.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverFamily {
    Char,
    Platform,
    Block,
    Net,
    Unknown,
}

impl DriverFamily {
    pub fn name(&self) -> &'static str {
        match self {
            DriverFamily::Char => "char",
            DriverFamily::Platform => "platform",
            DriverFamily::Block => "block",
            DriverFamily::Net => "net",
            DriverFamily::Unknown => "unknown",
        }
    }
}

/// Everything the structure pass learns about a source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureReport {
    pub family: DriverFamily,
    pub module_init: bool,
    pub module_exit: bool,
    pub function_count: usize,
    pub average_function_length: f64,

    /// File operation entry points assigned in the source (char family).
    pub fops_present: Vec<String>,

    /// Expected symbols found / expected symbols for the family.
    pub hits: usize,
    pub needed: usize,
}

impl StructureReport {
    pub fn functionality(&self) -> f64 {
        if self.needed == 0 {
            0.0
        } else {
            (self.hits as f64 / self.needed as f64).min(1.0)
        }
    }
}

const CHAR_FOPS: [&str; 4] = ["open", "read", "release", "write"];

fn word_call(name: &str) -> Regex {
    Regex::new(&format!(r"\b{name}\s*\(")).expect("call pattern is valid")
}

fn init_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| word_call("module_init"))
}

fn exit_call() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| word_call("module_exit"))
}

fn designated_field() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.([a-z_]+)\s*=").expect("field pattern is valid"))
}

fn any(source: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| source.contains(n))
}

fn count_true(checks: &[bool]) -> usize {
    checks.iter().filter(|c| **c).count()
}

/// Inspect a source file's structure.
pub fn inspect(source: &str) -> StructureReport {
    let module_init = init_call().is_match(source);
    let module_exit = exit_call().is_match(source);
    let lengths = function_lengths(source);
    let average_function_length = if lengths.is_empty() {
        0.0
    } else {
        lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
    };

    let mut fops_present = Vec::new();
    let (family, hits, needed) = if any(
        source,
        &["struct file_operations", "register_chrdev"],
    ) {
        let assigned: BTreeSet<&str> = designated_field()
            .captures_iter(source)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        fops_present = CHAR_FOPS
            .iter()
            .filter(|f| assigned.contains(*f))
            .map(|f| f.to_string())
            .collect();
        (DriverFamily::Char, fops_present.len(), CHAR_FOPS.len())
    } else if any(source, &["platform_driver", "ioremap"]) {
        let checks = [
            source.contains("ioremap"),
            source.contains("request_irq"),
            source.contains("platform_driver_register"),
            any(
                source,
                &["of_match_table", "of_device_id", "of_find_compatible_node"],
            ),
        ];
        (DriverFamily::Platform, count_true(&checks), checks.len())
    } else if any(source, &["register_blkdev", "request_queue", "gendisk"]) {
        let checks = [
            source.contains("register_blkdev"),
            any(source, &["request_queue", "blk_alloc_queue"]),
            any(source, &["gendisk", "submit_bio"]),
        ];
        (DriverFamily::Block, count_true(&checks), checks.len())
    } else if any(
        source,
        &["register_netdev", "alloc_netdev", "ndo_start_xmit", "net_device_ops"],
    ) {
        let checks = [
            any(source, &["register_netdev", "alloc_netdev"]),
            source.contains("ndo_start_xmit"),
            source.contains("net_device"),
        ];
        (DriverFamily::Net, count_true(&checks), checks.len())
    } else {
        (
            DriverFamily::Unknown,
            count_true(&[module_init, module_exit]),
            2,
        )
    };

    StructureReport {
        family,
        module_init,
        module_exit,
        function_count: lengths.len(),
        average_function_length,
        fops_present,
        hits,
        needed,
    }
}

/// Functional completeness for the detected driver family.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureAnalyzer;

impl Analyzer for StructureAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Structure
    }

    fn analyze(&self, source: &str) -> AnalyzerOutput {
        let report = inspect(source);
        let mut details = vec![
            format!("driver family: {}", report.family.name()),
            format!(
                "expected symbols: {}/{}",
                report.hits, report.needed
            ),
            format!(
                "functions: {} (avg {:.1} lines)",
                report.function_count, report.average_function_length
            ),
        ];
        if !report.fops_present.is_empty() {
            details.push(format!("file operations: {}", report.fops_present.join(", ")));
        }
        AnalyzerOutput::new(report.functionality())
            .with_component("functionality", report.functionality())
            .with_details(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = r#"
#include <linux/module.h>

static int __init hello_init(void)
{
	pr_info("hello\n");
	return 0;
}

static void __exit hello_exit(void)
{
	pr_info("bye\n");
}

module_init(hello_init);
module_exit(hello_exit);
"#;

    #[test]
    fn test_unknown_family_rewards_init_and_exit() {
        let report = inspect(HELLO);
        assert_eq!(report.family, DriverFamily::Unknown);
        assert!(report.module_init && report.module_exit);
        assert_eq!(report.function_count, 2);
        assert_eq!(StructureAnalyzer.analyze(HELLO).score, 1.0);
    }

    #[test]
    fn test_unknown_family_without_exit() {
        let source = "static int f(void) {\n\treturn 0;\n}\nmodule_init(f);\n";
        assert_eq!(StructureAnalyzer.analyze(source).score, 0.5);
    }

    #[test]
    fn test_char_family_counts_fops() {
        let source = r#"
static const struct file_operations fops = {
	.owner = THIS_MODULE,
	.open = dev_open,
	.read = dev_read,
	.write = dev_write,
};
"#;
        let report = inspect(source);
        assert_eq!(report.family, DriverFamily::Char);
        assert_eq!(report.fops_present, vec!["open", "read", "write"]);
        assert_eq!(report.functionality(), 0.75);
    }

    #[test]
    fn test_platform_family() {
        let source = "static struct platform_driver d;\nvoid *base = ioremap(0, 4);\n";
        let report = inspect(source);
        assert_eq!(report.family, DriverFamily::Platform);
        assert_eq!(report.hits, 1);
        assert_eq!(report.needed, 4);
    }

    #[test]
    fn test_empty_source_scores_zero() {
        assert_eq!(StructureAnalyzer.analyze("").score, 0.0);
    }
}

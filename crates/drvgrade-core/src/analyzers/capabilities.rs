//! Optional driver capabilities credited in the Advanced category.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySignal {
    /// `devm_*` managed-resource APIs.
    ManagedResources,
    DeviceTree,
    PowerManagement,
    DebugHelpers,
}

impl CapabilitySignal {
    pub const ALL: [CapabilitySignal; 4] = [
        CapabilitySignal::ManagedResources,
        CapabilitySignal::DeviceTree,
        CapabilitySignal::PowerManagement,
        CapabilitySignal::DebugHelpers,
    ];

    pub fn points(&self) -> f64 {
        match self {
            CapabilitySignal::ManagedResources | CapabilitySignal::DeviceTree => 1.5,
            CapabilitySignal::PowerManagement | CapabilitySignal::DebugHelpers => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CapabilitySignal::ManagedResources => "devm_* used",
            CapabilitySignal::DeviceTree => "device-tree support",
            CapabilitySignal::PowerManagement => "pm hooks",
            CapabilitySignal::DebugHelpers => "debug helpers",
        }
    }

    fn present_in(&self, source: &str) -> bool {
        match self {
            CapabilitySignal::ManagedResources => source.contains("devm_"),
            CapabilitySignal::DeviceTree => of_identifier().is_match(source),
            CapabilitySignal::PowerManagement => ["suspend", "resume", "pm_ops"]
                .iter()
                .any(|n| source.contains(n)),
            CapabilitySignal::DebugHelpers => {
                source.contains("debugfs") || source.contains("pr_debug")
            }
        }
    }
}

fn of_identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bof_\w+").expect("device tree pattern is valid"))
}

/// Signals present in the source, in [`CapabilitySignal::ALL`] order.
pub fn detect_capabilities(source: &str) -> Vec<CapabilitySignal> {
    CapabilitySignal::ALL
        .into_iter()
        .filter(|s| s.present_in(source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_detected() {
        assert!(detect_capabilities("int main(void) { return 0; }").is_empty());
    }

    #[test]
    fn test_all_detected() {
        let source = "devm_kzalloc(); static const struct of_device_id ids[];\n\
                      static int x_suspend(void); pr_debug(\"x\");";
        assert_eq!(detect_capabilities(source), CapabilitySignal::ALL.to_vec());
        let total: f64 = CapabilitySignal::ALL.iter().map(|s| s.points()).sum();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn test_of_prefix_requires_word_boundary() {
        assert!(detect_capabilities("sizeof_buf = 1;").is_empty());
    }
}

//! Runtime parameter directory of a loaded module.

use std::collections::BTreeSet;

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::probe::{ParameterMetrics, ProbeKind, ProbeMetrics, ProbeResult};

/// `<module_param_root>/<module>/parameters` must exist and contain every
/// expected name.
pub fn run(module_name: &str, config: &HarnessConfig) -> ProbeResult {
    let dir = config
        .module_param_root
        .join(module_name)
        .join("parameters");

    if !dir.is_dir() {
        let metrics = ParameterMetrics {
            directory_exists: false,
            found: Vec::new(),
            missing: config.expected_params.clone(),
        };
        return ProbeResult::completed(ProbeKind::Parameters, false, ProbeMetrics::Parameters(metrics))
            .with_errors(vec![format!("{} not present", dir.display())]);
    }

    let present: BTreeSet<String> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            return ProbeResult::errored(ProbeKind::Parameters, format!("read {}: {e}", dir.display()))
        }
    };

    let (found, missing): (Vec<String>, Vec<String>) = if config.expected_params.is_empty() {
        (present.into_iter().collect(), Vec::new())
    } else {
        config
            .expected_params
            .iter()
            .cloned()
            .partition(|name| present.contains(name))
    };

    let passed = missing.is_empty();
    let metrics = ParameterMetrics {
        directory_exists: true,
        found,
        missing,
    };
    ProbeResult::completed(ProbeKind::Parameters, passed, ProbeMetrics::Parameters(metrics))
}

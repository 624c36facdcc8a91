//! Control requests against the open endpoint.
//!
//! A rejected code is recorded like any other outcome; a driver that refuses
//! an unknown request cleanly is behaving correctly.

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::probe::{ControlCodeOutcome, ProbeKind, ProbeMetrics, ProbeResult};

use super::endpoint::Endpoint;

pub fn run(endpoint: &dyn Endpoint, config: &HarnessConfig) -> ProbeResult {
    if config.control_codes.is_empty() {
        return ProbeResult::skipped(ProbeKind::Control, "no control codes supplied");
    }
    let mut handle = match endpoint.open() {
        Ok(handle) => handle,
        Err(e) => {
            return ProbeResult::errored(ProbeKind::Control, format!("open {}: {e}", endpoint.path()))
        }
    };

    let outcomes = config
        .control_codes
        .iter()
        .map(|&code| match handle.control(code) {
            Ok(ret) => ControlCodeOutcome {
                code,
                accepted: true,
                return_value: Some(ret),
                errno: None,
                message: None,
            },
            Err(e) => ControlCodeOutcome {
                code,
                accepted: false,
                return_value: None,
                errno: e.raw_os_error(),
                message: Some(e.to_string()),
            },
        })
        .collect();

    ProbeResult::completed(ProbeKind::Control, true, ProbeMetrics::Control { outcomes })
}

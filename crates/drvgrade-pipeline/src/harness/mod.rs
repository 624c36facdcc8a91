//! Dynamic tests against a loaded module's I/O endpoint.
//!
//! Each probe runs on its own and cannot take the others down: failures are
//! recorded in its [`ProbeResult`], and a panicking probe is caught and
//! reported as an errored result.

pub mod concurrency;
pub mod control;
pub mod endpoint;
pub mod params;
pub mod smoke;
pub mod throughput;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use drvgrade_core::config::HarnessConfig;
use drvgrade_core::error::panic_message;
use drvgrade_core::obs::emit_probe_finished;
use drvgrade_core::probe::{DynamicReport, ProbeKind, ProbeResult};
use tracing::debug;

pub use endpoint::{
    DeviceLocator, DeviceNode, Endpoint, EndpointHandle, EndpointLocator,
};

/// Runs the probes in order: smoke, concurrency, throughput, parameters,
/// control.
#[derive(Clone)]
pub struct DynamicTestHarness {
    config: HarnessConfig,
    locator: Arc<dyn EndpointLocator>,
}

impl DynamicTestHarness {
    pub fn new(config: HarnessConfig, locator: Arc<dyn EndpointLocator>) -> Self {
        Self { config, locator }
    }

    /// Harness that looks for device nodes under `config.device_root`.
    pub fn with_device_nodes(config: HarnessConfig) -> Self {
        let locator = Arc::new(DeviceLocator::new(config.device_root.clone()));
        Self::new(config, locator)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Probe the endpoint of a module that is currently loaded.
    ///
    /// Never panics: with no endpoint the whole run is a single `Skipped`.
    pub fn run(&self, module_name: &str) -> DynamicReport {
        let located = catch_unwind(AssertUnwindSafe(|| self.locator.locate(module_name)));
        let endpoint = match located {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => {
                return DynamicReport::Skipped {
                    reason: format!("no device node found for `{module_name}`"),
                }
            }
            Err(panic) => {
                return DynamicReport::Skipped {
                    reason: format!("endpoint discovery failed: {}", panic_message(&*panic)),
                }
            }
        };
        debug!(endpoint = %endpoint.path(), "endpoint located");

        let ep = endpoint.as_ref();
        let config = &self.config;
        let probes = vec![
            guarded(ProbeKind::Smoke, || smoke::run(ep, config)),
            guarded(ProbeKind::Concurrency, || concurrency::run(ep, config)),
            guarded(ProbeKind::Throughput, || throughput::run(ep, config)),
            guarded(ProbeKind::Parameters, || params::run(module_name, config)),
            guarded(ProbeKind::Control, || control::run(ep, config)),
        ];

        DynamicReport::Completed {
            endpoint: endpoint.path(),
            probes,
        }
    }
}

fn guarded(kind: ProbeKind, probe: impl FnOnce() -> ProbeResult) -> ProbeResult {
    let result = catch_unwind(AssertUnwindSafe(probe)).unwrap_or_else(|panic| {
        ProbeResult::errored(kind, format!("probe panicked: {}", panic_message(&*panic)))
    });
    emit_probe_finished(kind.name(), result.passed, result.skipped.is_some());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_catches_panics() {
        let result = guarded(ProbeKind::Throughput, || panic!("boom"));
        assert!(!result.passed);
        assert!(result.error_sample[0].contains("boom"));
    }
}

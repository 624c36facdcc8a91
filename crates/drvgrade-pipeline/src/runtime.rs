//! RuntimeStage: build, load, probe and unload a module in place.
//!
//! The lifecycle is a typestate: `Lifecycle<NotBuilt>` can only be built,
//! `Lifecycle<Built>` only loaded, and only `Lifecycle<Loaded>` is unloaded,
//! so the stage cannot skip or reorder steps. Every transition is also
//! recorded in the [`RuntimeTrace`](drvgrade_core::runtime::RuntimeTrace)
//! carried by the report.

use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use drvgrade_core::config::RuntimeConfig;
use drvgrade_core::diagnostics::DiagnosticSignature;
use drvgrade_core::error::panic_message;
use drvgrade_core::obs::{emit_runtime_transition, emit_stage_fault};
use drvgrade_core::probe::DynamicReport;
use drvgrade_core::runtime::{RuntimeReport, RuntimeState};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::compile::module_name;
use crate::process::CommandOutput;
use crate::toolchain::{artifact_path, build_descriptor, BuildRequest, DiagnosticLog, Toolchain};

const RELOADED_NOTE: &str = "Module was already loaded; reloaded successfully.";

/// A module that is resident for the duration of the probe callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub module_name: String,
    pub artifact: PathBuf,
}

// Typestate markers.
enum NotBuilt {}
enum Built {}
enum Loaded {}
enum Unloaded {}

struct Lifecycle<S> {
    report: RuntimeReport,
    module_dir: PathBuf,
    _state: PhantomData<S>,
}

impl Lifecycle<NotBuilt> {
    fn start(module_name: String, module_dir: PathBuf) -> Self {
        Self {
            report: RuntimeReport::new(module_name),
            module_dir,
            _state: PhantomData,
        }
    }

    fn built(mut self) -> Lifecycle<Built> {
        self.enter(RuntimeState::Built);
        Lifecycle {
            report: self.report,
            module_dir: self.module_dir,
            _state: PhantomData,
        }
    }
}

impl Lifecycle<Built> {
    fn loaded(mut self) -> Lifecycle<Loaded> {
        self.enter(RuntimeState::Loaded);
        Lifecycle {
            report: self.report,
            module_dir: self.module_dir,
            _state: PhantomData,
        }
    }
}

impl Lifecycle<Loaded> {
    fn unloaded(mut self) -> Lifecycle<Unloaded> {
        self.enter(RuntimeState::Unloaded);
        Lifecycle {
            report: self.report,
            module_dir: self.module_dir,
            _state: PhantomData,
        }
    }
}

impl Lifecycle<Unloaded> {
    fn finish(self) -> RuntimeReport {
        self.report
    }
}

impl<S> Lifecycle<S> {
    fn name(&self) -> &str {
        &self.report.module_name
    }

    fn artifact(&self) -> PathBuf {
        artifact_path(&self.module_dir, &self.report.module_name)
    }

    fn enter(&mut self, next: RuntimeState) {
        let from = self.report.trace.current();
        match self.report.trace.advance(next) {
            Ok(_) => emit_runtime_transition(from, next),
            Err(e) => self.report.note(e.to_string()),
        }
    }

    /// Terminal failure; the report is all that is left.
    fn fail(mut self, reason: String) -> RuntimeReport {
        warn!(module = %self.report.module_name, reason = %reason, "runtime stage failed");
        self.enter(RuntimeState::Failed);
        self.report.failure = Some(reason);
        self.report
    }
}

/// Generated build descriptor, removed on drop if this run created it.
struct BuildDescriptorGuard {
    path: PathBuf,
    created: bool,
}

impl BuildDescriptorGuard {
    fn ensure(module_dir: &Path, module_name: &str) -> std::io::Result<Self> {
        let path = module_dir.join("Makefile");
        if path.exists() {
            return Ok(Self {
                path,
                created: false,
            });
        }
        std::fs::write(&path, build_descriptor(module_name))?;
        Ok(Self {
            path,
            created: true,
        })
    }
}

impl Drop for BuildDescriptorGuard {
    fn drop(&mut self) {
        if self.created {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove build descriptor");
            }
        }
    }
}

pub struct RuntimeStage {
    toolchain: Arc<dyn Toolchain>,
    log: Arc<dyn DiagnosticLog>,
    signature: DiagnosticSignature,
    config: RuntimeConfig,
}

impl RuntimeStage {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        log: Arc<dyn DiagnosticLog>,
        signature: DiagnosticSignature,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            toolchain,
            log,
            signature,
            config,
        }
    }

    /// Build the module next to its source, load it, hand it to `probe`
    /// while it is resident, then unload it.
    ///
    /// Never fails: the returned report records how far the lifecycle got.
    /// The build descriptor is removed afterwards only if this run created
    /// it, and build products are cleaned when configured.
    pub async fn run<F, Fut>(&self, source: &Path, probe: F) -> RuntimeReport
    where
        F: FnOnce(LoadedModule) -> Fut,
        Fut: Future<Output = DynamicReport>,
    {
        let name = module_name(source);
        let module_dir = match source.canonicalize() {
            Ok(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
            Err(e) => {
                return Lifecycle::start(name, PathBuf::new())
                    .fail(format!("source not accessible: {e}"))
            }
        };

        let guard = match BuildDescriptorGuard::ensure(&module_dir, &name) {
            Ok(guard) => guard,
            Err(e) => {
                return Lifecycle::start(name, module_dir)
                    .fail(format!("could not write build descriptor: {e}"))
            }
        };

        let mut report = self
            .drive(Lifecycle::start(name, module_dir.clone()), probe)
            .await;

        if self.config.clean_after_run {
            let timeout = Duration::from_secs(self.config.build_timeout_secs);
            match self.toolchain.clean(&module_dir, timeout).await {
                Ok(out) if out.success() => debug!("build products cleaned"),
                Ok(out) => report.note(format!("clean failed: {}", brief(&out))),
                Err(e) => report.note(format!("clean failed: {e}")),
            }
        }
        drop(guard);
        report
    }

    async fn drive<F, Fut>(&self, lifecycle: Lifecycle<NotBuilt>, probe: F) -> RuntimeReport
    where
        F: FnOnce(LoadedModule) -> Fut,
        Fut: Future<Output = DynamicReport>,
    {
        let built = match self.build(lifecycle).await {
            Ok(built) => built,
            Err(report) => return report,
        };
        let mut loaded = match self.load(built).await {
            Ok(loaded) => loaded,
            Err(report) => return report,
        };

        let module = LoadedModule {
            module_name: loaded.name().to_string(),
            artifact: loaded.artifact(),
        };
        let dynamic = AssertUnwindSafe(async move { probe(module).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                emit_stage_fault("dynamic", &message);
                DynamicReport::Skipped {
                    reason: format!("dynamic harness panicked: {message}"),
                }
            });
        loaded.report.dynamic = Some(dynamic);

        if self.config.capture_diagnostic_log {
            self.capture_log(&mut loaded.report).await;
        }

        self.unload(loaded).await
    }

    async fn build(&self, lifecycle: Lifecycle<NotBuilt>) -> Result<Lifecycle<Built>, RuntimeReport> {
        let request = BuildRequest {
            module_dir: lifecycle.module_dir.clone(),
            module_name: lifecycle.name().to_string(),
            timeout: Duration::from_secs(self.config.build_timeout_secs),
        };
        match self.toolchain.build(&request).await {
            Ok(out) if out.success() => {
                if request.artifact_path().is_file() {
                    Ok(lifecycle.built())
                } else {
                    Err(lifecycle.fail(format!(
                        "build succeeded but {} was not produced",
                        request.artifact_path().display()
                    )))
                }
            }
            Ok(out) => Err(lifecycle.fail(format!("module build failed: {}", brief(&out)))),
            Err(e) => Err(lifecycle.fail(format!("module build failed: {e}"))),
        }
    }

    /// Load, with one unload-and-retry if an instance is already resident.
    async fn load(&self, mut lifecycle: Lifecycle<Built>) -> Result<Lifecycle<Loaded>, RuntimeReport> {
        let artifact = lifecycle.artifact();
        let load_timeout = Duration::from_secs(self.config.load_timeout_secs);
        let unload_timeout = Duration::from_secs(self.config.unload_timeout_secs);

        let first = match self.toolchain.load(&artifact, load_timeout).await {
            Ok(out) => out,
            Err(e) => return Err(lifecycle.fail(format!("module load failed: {e}"))),
        };
        if first.success() {
            return Ok(lifecycle.loaded());
        }
        if !self.signature.is_already_loaded(&first.combined()) {
            return Err(lifecycle.fail(format!("module load failed: {}", brief(&first))));
        }

        info!(module = %lifecycle.name(), "module already loaded, unloading stale instance");
        match self.toolchain.unload(lifecycle.name(), unload_timeout).await {
            Ok(out) if out.success() => {}
            Ok(out) => {
                return Err(lifecycle.fail(format!(
                    "stale instance could not be unloaded: {}",
                    brief(&out)
                )))
            }
            Err(e) => {
                return Err(lifecycle.fail(format!("stale instance could not be unloaded: {e}")))
            }
        }

        match self.toolchain.load(&artifact, load_timeout).await {
            Ok(out) if out.success() => {
                lifecycle.report.note(RELOADED_NOTE);
                Ok(lifecycle.loaded())
            }
            Ok(out) => Err(lifecycle.fail(format!(
                "module load failed after reloading: {}",
                brief(&out)
            ))),
            Err(e) => Err(lifecycle.fail(format!("module load failed after reloading: {e}"))),
        }
    }

    async fn capture_log(&self, report: &mut RuntimeReport) {
        let timeout = Duration::from_secs(self.config.diagnostic_log_timeout_secs);
        match self.log.snapshot(timeout).await {
            Ok(text) if !text.trim().is_empty() => report.diagnostic_log_captured = true,
            Ok(_) => report.note("diagnostic log snapshot was empty"),
            Err(e) => report.note(format!("diagnostic log unavailable: {e}")),
        }
    }

    /// Best-effort: a failed unload is a note and the module stays loaded.
    async fn unload(&self, lifecycle: Lifecycle<Loaded>) -> RuntimeReport {
        let timeout = Duration::from_secs(self.config.unload_timeout_secs);
        match self.toolchain.unload(lifecycle.name(), timeout).await {
            Ok(out) if out.success() => lifecycle.unloaded().finish(),
            Ok(out) => {
                let mut report = lifecycle.report;
                report.note(format!("module unload failed: {}", brief(&out)));
                report
            }
            Err(e) => {
                let mut report = lifecycle.report;
                report.note(format!("module unload failed: {e}"));
                report
            }
        }
    }
}

/// Exit status plus the last line of output.
fn brief(out: &CommandOutput) -> String {
    let combined = out.combined();
    match combined.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!("exit status {}: {}", out.exit_code, line.trim()),
        None => format!("exit status {}", out.exit_code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_uses_last_line() {
        let out = CommandOutput::failed("insmod", 1, "first\ninsmod: ERROR: File exists\n\n");
        assert_eq!(brief(&out), "exit status 1: insmod: ERROR: File exists");
        assert_eq!(brief(&CommandOutput::failed("x", 2, "")), "exit status 2");
    }

    #[test]
    fn test_lifecycle_records_transitions() {
        let lc = Lifecycle::start("m".to_string(), PathBuf::from("/tmp"));
        let loaded = lc.built().loaded();
        assert_eq!(loaded.artifact(), PathBuf::from("/tmp/m.ko"));
        let report = loaded.fail("boom".to_string());
        assert_eq!(
            report.trace.history(),
            &[
                RuntimeState::NotBuilt,
                RuntimeState::Built,
                RuntimeState::Loaded,
                RuntimeState::Failed
            ]
        );
        assert_eq!(report.failure.as_deref(), Some("boom"));
    }

    #[test]
    fn test_lifecycle_steps_in_order_without_notes() {
        let lc = Lifecycle::start("m".to_string(), PathBuf::from("/tmp"));
        let report = lc.built().loaded().unloaded().finish();
        assert_eq!(
            report.trace.history(),
            &[
                RuntimeState::NotBuilt,
                RuntimeState::Built,
                RuntimeState::Loaded,
                RuntimeState::Unloaded
            ]
        );
        assert!(report.notes.is_empty());
        assert!(report.unloaded());
    }

    #[test]
    fn test_descriptor_guard_removes_only_what_it_created() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _guard = BuildDescriptorGuard::ensure(dir.path(), "m").unwrap();
            let text = std::fs::read_to_string(dir.path().join("Makefile")).unwrap();
            assert_eq!(text, "obj-m := m.o\n");
        }
        assert!(!dir.path().join("Makefile").exists());

        std::fs::write(dir.path().join("Makefile"), "custom\n").unwrap();
        {
            let _guard = BuildDescriptorGuard::ensure(dir.path(), "m").unwrap();
        }
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Makefile")).unwrap(),
            "custom\n"
        );
    }
}

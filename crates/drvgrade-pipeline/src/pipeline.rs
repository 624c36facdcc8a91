//! End-to-end evaluation of one driver source file.
//!
//! compile -> runtime (with dynamic probes while loaded) -> analyzers ->
//! aggregation. Each stage boundary catches faults and turns them into
//! notes, so a readable source always yields a complete record.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use drvgrade_core::analyzers::{detect_capabilities, AnalyzerRegistry};
use drvgrade_core::compile::{CompileMethod, CompileResult};
use drvgrade_core::config::EvaluatorConfig;
use drvgrade_core::diagnostics::{DiagnosticSignature, DiagnosticSummary};
use drvgrade_core::error::{panic_message, EvalError, Result};
use drvgrade_core::obs::{
    emit_evaluation_started, emit_score_computed, emit_stage_fault, emit_stage_finished,
    emit_stage_started, run_span,
};
use drvgrade_core::probe::DynamicReport;
use drvgrade_core::report::{source_digest, EvaluationRecord};
use drvgrade_core::runtime::{RuntimeReport, RuntimeState};
use drvgrade_core::scoring::{aggregate, ScoreInputs};
use futures::FutureExt;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::compile::{module_name, CompileStage};
use crate::harness::{DeviceLocator, DynamicTestHarness, EndpointLocator};
use crate::runtime::{LoadedModule, RuntimeStage};
use crate::toolchain::{DiagnosticLog, DmesgLog, KernelToolchain, Toolchain};

pub struct EvaluationPipeline {
    config: EvaluatorConfig,
    signature: DiagnosticSignature,
    toolchain: Arc<dyn Toolchain>,
    log: Arc<dyn DiagnosticLog>,
    analyzers: AnalyzerRegistry,
    locator: Arc<dyn EndpointLocator>,
}

impl EvaluationPipeline {
    /// Validates the configuration and compiles the diagnostic signature.
    pub fn new(
        config: EvaluatorConfig,
        toolchain: Arc<dyn Toolchain>,
        log: Arc<dyn DiagnosticLog>,
    ) -> Result<Self> {
        config.validate()?;
        let signature = DiagnosticSignature::from_config(&config.signature)?;
        let locator = Arc::new(DeviceLocator::new(config.harness.device_root.clone()));
        Ok(Self {
            config,
            signature,
            toolchain,
            log,
            analyzers: AnalyzerRegistry::standard(),
            locator,
        })
    }

    /// Pipeline against the running kernel: kbuild, `insmod`/`rmmod`,
    /// `dmesg`, and device nodes under the configured root.
    pub fn kernel(config: EvaluatorConfig) -> Result<Self> {
        let toolchain = Arc::new(KernelToolchain::new(config.toolchain.clone()));
        Self::new(config, toolchain, Arc::new(DmesgLog))
    }

    pub fn with_analyzers(mut self, analyzers: AnalyzerRegistry) -> Self {
        self.analyzers = analyzers;
        self
    }

    pub fn with_endpoint_locator(mut self, locator: Arc<dyn EndpointLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate one source file.
    ///
    /// Only an unreadable source is an error; every stage failure is
    /// reported inside the record.
    pub async fn evaluate(&self, source: &Path) -> Result<EvaluationRecord> {
        let text = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| EvalError::SourceUnreadable {
                path: source.to_path_buf(),
                source: e,
            })?;

        let run_id = Uuid::new_v4();
        let span = run_span(&run_id.to_string(), &source.display().to_string());
        self.evaluate_text(run_id, source, &text)
            .instrument(span)
            .await
    }

    async fn evaluate_text(
        &self,
        run_id: Uuid,
        source: &Path,
        text: &str,
    ) -> Result<EvaluationRecord> {
        let source_file = source.display().to_string();
        emit_evaluation_started(&run_id.to_string(), &source_file);
        let mut notes = Vec::new();

        let compilation = self.compile(source, &mut notes).await;
        let runtime = self.runtime(source, &compilation, &mut notes).await;

        emit_stage_started("analysis");
        let started = Instant::now();
        let (analyses, faults) = self.analyzers.run_guarded(text);
        for fault in faults {
            emit_stage_fault("analysis", &fault);
            notes.push(fault);
        }
        let capabilities = detect_capabilities(text);
        emit_stage_finished("analysis", true, started.elapsed().as_millis() as u64);

        let breakdown = aggregate(&ScoreInputs {
            compilation: &compilation,
            runtime: runtime.as_ref(),
            analyses: &analyses,
            capabilities: &capabilities,
        });
        let final_score = breakdown.final_score();
        emit_score_computed(&run_id.to_string(), final_score);

        Ok(EvaluationRecord {
            run_id,
            evaluated_at: Utc::now(),
            source_file,
            source_digest: source_digest(text),
            compilation,
            runtime,
            analyses,
            capabilities,
            breakdown,
            final_score,
            notes,
        })
    }

    async fn compile(&self, source: &Path, notes: &mut Vec<String>) -> CompileResult {
        emit_stage_started("compile");
        let stage = CompileStage::new(
            self.toolchain.clone(),
            self.signature.clone(),
            self.config.compile.clone(),
        );
        let result = match AssertUnwindSafe(stage.run(source)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = format!("compile stage fault: {}", panic_message(&*panic));
                emit_stage_fault("compile", &message);
                notes.push(message.clone());
                CompileResult::aborted(
                    CompileMethod::Fallback,
                    &DiagnosticSummary::default(),
                    String::new(),
                    message,
                )
            }
        };
        emit_stage_finished("compile", result.success, result.duration_ms);
        result
    }

    async fn runtime(
        &self,
        source: &Path,
        compilation: &CompileResult,
        notes: &mut Vec<String>,
    ) -> Option<RuntimeReport> {
        let skip_reason = if !self.config.runtime.enabled {
            Some("runtime stage skipped: disabled by configuration")
        } else if !compilation.success {
            Some("runtime stage skipped: compilation failed")
        } else if !self.toolchain.privileged_build_available().await {
            Some("runtime stage skipped: no privileged build environment")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            info!(reason, "runtime stage skipped");
            notes.push(reason.to_string());
            return None;
        }

        emit_stage_started("runtime");
        let started = Instant::now();
        let stage = RuntimeStage::new(
            self.toolchain.clone(),
            self.log.clone(),
            self.signature.clone(),
            self.config.runtime.clone(),
        );
        let harness = DynamicTestHarness::new(self.config.harness.clone(), self.locator.clone());
        let probe = move |module: LoadedModule| async move {
            emit_stage_started("dynamic");
            let name = module.module_name;
            match tokio::task::spawn_blocking(move || harness.run(&name)).await {
                Ok(report) => report,
                Err(e) => DynamicReport::Skipped {
                    reason: format!("dynamic harness aborted: {e}"),
                },
            }
        };

        let report = match AssertUnwindSafe(stage.run(source, probe))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(panic) => {
                let message = format!("runtime stage fault: {}", panic_message(&*panic));
                emit_stage_fault("runtime", &message);
                notes.push(message.clone());
                let mut report = RuntimeReport::new(module_name(source));
                let _ = report.trace.advance(RuntimeState::Failed);
                report.failure = Some(message);
                report
            }
        };
        emit_stage_finished(
            "runtime",
            report.failure.is_none() && report.unloaded(),
            started.elapsed().as_millis() as u64,
        );
        Some(report)
    }
}

//! drvgrade core: the domain model and pure logic of driver evaluation.
//!
//! - [`config`]: the explicit [`EvaluatorConfig`] handed to the pipeline
//! - [`diagnostics`]: compiler output classification and the soft-pass rule
//! - [`compile`], [`runtime`], [`probe`]: stage outcome records
//! - [`analyzers`]: pure source analyzers in an ordered registry
//! - [`scoring`]: the five-category aggregator
//! - [`report`]: the JSON record, text rendering, and CSV score log

pub mod analyzers;
pub mod compile;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod obs;
pub mod probe;
pub mod report;
pub mod runtime;
pub mod scoring;
pub mod telemetry;

pub use analyzers::{
    detect_capabilities, AnalysisSet, Analyzer, AnalyzerKind, AnalyzerOutput, AnalyzerRegistry,
    CapabilitySignal,
};
pub use compile::{CompileMethod, CompileResult};
pub use config::{
    CompileConfig, EvaluatorConfig, HarnessConfig, OutputConfig, RuntimeConfig, SignatureConfig,
    ToolchainConfig,
};
pub use diagnostics::{DiagnosticSignature, DiagnosticSummary, Severity};
pub use error::{panic_message, EvalError, Result};
pub use probe::{
    BoundedSample, ConcurrencyMetrics, ControlCodeOutcome, DynamicReport, ParameterMetrics,
    ProbeKind, ProbeMetrics, ProbeResult, SmokeMetrics, ThroughputMetrics,
};
pub use report::{source_digest, EvaluationRecord, ScoreLog};
pub use runtime::{IllegalTransition, RuntimeReport, RuntimeState, RuntimeTrace};
pub use scoring::{aggregate, Category, CategoryScore, ScoreBreakdown, ScoreInputs};
pub use telemetry::init_tracing;

//! Evaluator configuration.
//!
//! One explicit [`EvaluatorConfig`] is handed to the pipeline at construction.
//! Every field has a default, so a JSON config file only needs to name the
//! values it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, Result};

/// Top-level evaluator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub toolchain: ToolchainConfig,
    pub compile: CompileConfig,
    pub signature: SignatureConfig,
    pub runtime: RuntimeConfig,
    pub harness: HarnessConfig,
    pub output: OutputConfig,
}

impl EvaluatorConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make a stage unbounded or degenerate.
    pub fn validate(&self) -> Result<()> {
        if self.compile.privileged_timeout_secs == 0 || self.compile.fallback_timeout_secs == 0 {
            return Err(EvalError::InvalidConfig(
                "compile timeouts must be positive".to_string(),
            ));
        }
        if self.runtime.build_timeout_secs == 0
            || self.runtime.load_timeout_secs == 0
            || self.runtime.unload_timeout_secs == 0
            || self.runtime.diagnostic_log_timeout_secs == 0
        {
            return Err(EvalError::InvalidConfig(
                "runtime timeouts must be positive".to_string(),
            ));
        }
        if self.harness.threads == 0 {
            return Err(EvalError::InvalidConfig(
                "harness.threads must be positive".to_string(),
            ));
        }
        if self.harness.throughput_chunk_bytes == 0 {
            return Err(EvalError::InvalidConfig(
                "harness.throughput_chunk_bytes must be positive".to_string(),
            ));
        }
        // Compiles every pattern once so a bad regex fails fast.
        crate::diagnostics::DiagnosticSignature::from_config(&self.signature)?;
        Ok(())
    }
}

/// External programs and the kernel build tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Kernel build directory used for privileged (kbuild) builds.
    pub kernel_build_dir: PathBuf,

    /// `make` executable.
    pub make_program: String,

    /// Compiler used for the syntax-only fallback.
    pub compiler: String,

    /// Flags passed to the fallback compiler before the source path.
    pub fallback_flags: Vec<String>,

    /// Prefix module load/unload with non-interactive `sudo -n`.
    pub use_sudo: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            kernel_build_dir: default_kernel_build_dir(),
            make_program: "make".to_string(),
            compiler: "gcc".to_string(),
            fallback_flags: vec![
                "-fsyntax-only".to_string(),
                "-Wall".to_string(),
                "-Wextra".to_string(),
            ],
            use_sudo: true,
        }
    }
}

/// `/lib/modules/<running release>/build`.
pub fn default_kernel_build_dir() -> PathBuf {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease")
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from("/lib/modules").join(release).join("build")
}

/// CompileStage bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompileConfig {
    /// Timeout for the privileged build, in seconds.
    pub privileged_timeout_secs: u64,

    /// Timeout for the syntax-only fallback, in seconds.
    pub fallback_timeout_secs: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            privileged_timeout_secs: 240,
            fallback_timeout_secs: 60,
        }
    }
}

/// Diagnostic vocabulary of the target toolchain. All values are regexes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignatureConfig {
    /// Marks one error in compiler output.
    pub error_marker: String,

    /// Marks one warning in compiler output.
    pub warning_marker: String,

    /// Lines caused solely by an absent build dependency.
    pub missing_dependency: Vec<String>,

    /// Load failure caused by an instance that is already resident.
    pub already_loaded: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            error_marker: "error:".to_string(),
            warning_marker: "warning:".to_string(),
            missing_dependency: vec![
                r"fatal error: linux/[^:\s]+: No such file or directory".to_string(),
                r"No rule to make target".to_string(),
            ],
            already_loaded: "File exists".to_string(),
        }
    }
}

/// RuntimeStage bounds and switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Run the build/load/unload stage at all.
    pub enabled: bool,

    pub build_timeout_secs: u64,
    pub load_timeout_secs: u64,
    pub unload_timeout_secs: u64,

    /// Timeout for the kernel log snapshot.
    pub diagnostic_log_timeout_secs: u64,

    /// Take a kernel log snapshot once the module is loaded.
    pub capture_diagnostic_log: bool,

    /// Remove in-place build products after the run.
    pub clean_after_run: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            build_timeout_secs: 240,
            load_timeout_secs: 30,
            unload_timeout_secs: 30,
            diagnostic_log_timeout_secs: 10,
            capture_diagnostic_log: true,
            clean_after_run: true,
        }
    }
}

/// DynamicTestHarness parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory scanned for device nodes.
    pub device_root: PathBuf,

    /// Root of per-module runtime parameter directories.
    pub module_param_root: PathBuf,

    /// Payload written by the smoke probe.
    pub smoke_payload: String,

    /// How long the smoke probe polls for readable data, in milliseconds.
    pub smoke_read_timeout_ms: u64,

    /// Concurrency probe worker count.
    pub threads: usize,

    /// Writes per concurrency worker.
    pub iterations: usize,

    /// Concurrency probe payload size in bytes.
    pub payload_bytes: usize,

    /// Total bytes the throughput probe tries to write.
    pub throughput_total_bytes: usize,

    /// Throughput probe chunk size in bytes.
    pub throughput_chunk_bytes: usize,

    /// Wall-clock bound for the throughput probe, in milliseconds.
    pub throughput_deadline_ms: u64,

    /// Parameter names expected under the module's parameter directory.
    pub expected_params: Vec<String>,

    /// Control codes issued by the control-channel probe.
    pub control_codes: Vec<u64>,

    /// Maximum error strings kept per probe.
    pub error_sample_limit: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from("/dev"),
            module_param_root: PathBuf::from("/sys/module"),
            smoke_payload: "hello\n".to_string(),
            smoke_read_timeout_ms: 2_000,
            threads: 8,
            iterations: 200,
            payload_bytes: 256,
            throughput_total_bytes: 2 * 1024 * 1024,
            throughput_chunk_bytes: 64 * 1024,
            throughput_deadline_ms: 10_000,
            expected_params: Vec::new(),
            control_codes: Vec::new(),
            error_sample_limit: 3,
        }
    }
}

/// Where results are written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for `<stem>_results.json` records.
    pub output_dir: PathBuf,

    /// Append-only CSV score log.
    pub score_log: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            score_log: PathBuf::from("score_logs.csv"),
        }
    }
}

//! Dynamic probe result types.

use serde::{Deserialize, Serialize};

/// Bytes per megabyte for throughput figures.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// The probes the dynamic harness runs, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Smoke,
    Concurrency,
    Throughput,
    Parameters,
    Control,
}

impl ProbeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeKind::Smoke => "smoke",
            ProbeKind::Concurrency => "concurrency",
            ProbeKind::Throughput => "throughput",
            ProbeKind::Parameters => "parameters",
            ProbeKind::Control => "control",
        }
    }
}

/// Error strings capped at a fixed length, plus the uncapped total.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundedSample {
    limit: usize,
    total: usize,
    items: Vec<String>,
}

impl BoundedSample {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            total: 0,
            items: Vec::with_capacity(limit.min(16)),
        }
    }

    /// Count the error; keep its text only while under the limit.
    pub fn record(&mut self, error: impl Into<String>) {
        self.total += 1;
        if self.items.len() < self.limit {
            self.items.push(error.into());
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn into_items(self) -> Vec<String> {
        self.items
    }
}

/// Result of reading back from the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SmokeMetrics {
    pub bytes_written: usize,
    pub bytes_read: usize,

    /// Lossy UTF-8 preview of what was read back.
    pub read_preview: Option<String>,
}

/// Tallies from the concurrent writers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyMetrics {
    pub threads: usize,
    pub iterations: usize,
    pub success: usize,
    pub fail: usize,
}

/// Single-writer throughput.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThroughputMetrics {
    pub requested_bytes: usize,
    pub written_bytes: usize,
    pub elapsed_secs: f64,
    pub mb_per_sec: f64,

    /// Number of would-block back-offs taken.
    pub backoffs: usize,
}

/// Runtime parameter directory check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterMetrics {
    pub directory_exists: bool,

    /// Parameter names present (all of them, or the expected ones found).
    pub found: Vec<String>,

    /// Expected names that were not present.
    pub missing: Vec<String>,
}

/// Outcome of one control code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlCodeOutcome {
    pub code: u64,
    pub accepted: bool,
    pub return_value: Option<i32>,
    pub errno: Option<i32>,
    pub message: Option<String>,
}

/// Probe-specific measurements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeMetrics {
    Smoke(SmokeMetrics),
    Concurrency(ConcurrencyMetrics),
    Throughput(ThroughputMetrics),
    Parameters(ParameterMetrics),
    Control { outcomes: Vec<ControlCodeOutcome> },
    None,
}

/// One probe's outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub probe: ProbeKind,
    pub passed: bool,
    pub metrics: ProbeMetrics,

    /// First few error strings, never the full log.
    pub error_sample: Vec<String>,

    pub skipped: Option<String>,
}

impl ProbeResult {
    pub fn completed(probe: ProbeKind, passed: bool, metrics: ProbeMetrics) -> Self {
        Self {
            probe,
            passed,
            metrics,
            error_sample: Vec::new(),
            skipped: None,
        }
    }

    pub fn skipped(probe: ProbeKind, reason: impl Into<String>) -> Self {
        Self {
            probe,
            passed: false,
            metrics: ProbeMetrics::None,
            error_sample: Vec::new(),
            skipped: Some(reason.into()),
        }
    }

    /// A probe that could not run at all (open failure, internal fault).
    pub fn errored(probe: ProbeKind, error: impl Into<String>) -> Self {
        Self {
            probe,
            passed: false,
            metrics: ProbeMetrics::None,
            error_sample: vec![error.into()],
            skipped: None,
        }
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.error_sample = errors;
        self
    }
}

/// Everything the dynamic harness produced for one loaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DynamicReport {
    /// No endpoint was discoverable; no probe ran.
    Skipped { reason: String },
    Completed {
        endpoint: String,
        probes: Vec<ProbeResult>,
    },
}

impl DynamicReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, DynamicReport::Skipped { .. })
    }

    pub fn probe(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        match self {
            DynamicReport::Skipped { .. } => None,
            DynamicReport::Completed { probes, .. } => probes.iter().find(|p| p.probe == kind),
        }
    }

    pub fn passed_count(&self) -> usize {
        match self {
            DynamicReport::Skipped { .. } => 0,
            DynamicReport::Completed { probes, .. } => probes.iter().filter(|p| p.passed).count(),
        }
    }
}

/// `(written / 1 MiB) / elapsed`, or `0.0` when elapsed is not positive.
pub fn throughput_mbps(written_bytes: usize, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        (written_bytes as f64 / BYTES_PER_MB) / elapsed_secs
    } else {
        0.0
    }
}

//! Evaluation record, text rendering, and the append-only score log.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::analyzers::{AnalysisSet, CapabilitySignal};
use crate::compile::CompileResult;
use crate::error::Result;
use crate::probe::DynamicReport;
use crate::runtime::RuntimeReport;
use crate::scoring::{Category, ScoreBreakdown};

/// Hex SHA-256 of the evaluated source text.
pub fn source_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Complete result of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub run_id: Uuid,
    pub evaluated_at: DateTime<Utc>,

    /// Path of the evaluated file, as given.
    pub source_file: String,
    pub source_digest: String,

    pub compilation: CompileResult,

    /// `None` when the runtime stage never started.
    pub runtime: Option<RuntimeReport>,

    pub analyses: AnalysisSet,
    pub capabilities: Vec<CapabilitySignal>,
    pub breakdown: ScoreBreakdown,
    pub final_score: f64,

    /// Pipeline-level notes (skipped stages, caught faults).
    pub notes: Vec<String>,
}

impl EvaluationRecord {
    /// `<stem>_results.json`
    pub fn results_file_name(&self) -> String {
        let stem = Path::new(&self.source_file)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "evaluation".to_string());
        format!("{stem}_results.json")
    }

    /// Write the record as pretty JSON under `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.results_file_name());
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn dynamic(&self) -> Option<&DynamicReport> {
        self.runtime.as_ref().and_then(|r| r.dynamic.as_ref())
    }

    /// Human-readable breakdown.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Evaluation Report ===");
        let _ = writeln!(out, "File: {}", self.source_file);
        let _ = writeln!(out, "Run: {}", self.run_id);

        let c = &self.compilation;
        match (c.success, &c.note) {
            (true, Some(note)) => {
                let _ = writeln!(out, "Compilation: Success ({note})");
            }
            (true, None) => {
                let _ = writeln!(out, "Compilation: Success");
            }
            (false, _) => {
                let _ = writeln!(out, "Compilation: Failed");
            }
        }
        let _ = writeln!(
            out,
            "Warnings: {} Errors: {} (method={})",
            c.warning_count,
            c.error_count,
            c.method.name()
        );

        if let Some(runtime) = &self.runtime {
            let _ = writeln!(out, "\n--- Runtime ---");
            let states: Vec<&str> = runtime.trace.history().iter().map(|s| s.name()).collect();
            let _ = writeln!(out, "States: {}", states.join(" -> "));
            if let Some(failure) = &runtime.failure {
                let _ = writeln!(out, "Failure: {failure}");
            }
            for note in &runtime.notes {
                let _ = writeln!(out, "  - {note}");
            }
        }

        if let Some(dynamic) = self.dynamic() {
            let _ = writeln!(out, "\n--- Dynamic Runtime Tests ---");
            match dynamic {
                DynamicReport::Skipped { reason } => {
                    let _ = writeln!(out, "Skipped: {reason}");
                }
                DynamicReport::Completed { endpoint, probes } => {
                    let _ = writeln!(out, "Endpoint: {endpoint}");
                    for probe in probes {
                        let status = match (&probe.skipped, probe.passed) {
                            (Some(reason), _) => format!("skipped ({reason})"),
                            (None, true) => "passed".to_string(),
                            (None, false) => "failed".to_string(),
                        };
                        let _ = writeln!(out, "  {}: {status}", probe.probe.name());
                        for err in &probe.error_sample {
                            let _ = writeln!(out, "    ! {err}");
                        }
                    }
                }
            }
        }

        let _ = writeln!(out, "\n--- Score Breakdown ---");
        for category in Category::ALL {
            if let Some(score) = self.breakdown.get(category) {
                let _ = writeln!(
                    out,
                    "{}: {:.1}/{:.0}",
                    category.name(),
                    score.awarded,
                    score.max
                );
                for detail in &score.details {
                    let _ = writeln!(out, "  - {detail}");
                }
            }
        }

        if !self.notes.is_empty() {
            let _ = writeln!(out, "\n--- Notes ---");
            for note in &self.notes {
                let _ = writeln!(out, "  - {note}");
            }
        }

        let _ = writeln!(out, "\nOverall Score: {:.1}/100", self.final_score);
        out
    }
}

pub const SCORE_LOG_HEADER: [&str; 8] = [
    "timestamp",
    "file",
    "Correctness",
    "Security",
    "Code Quality",
    "Performance",
    "Advanced",
    "Final Score",
];

/// Append-only CSV log with one row per evaluation.
#[derive(Debug, Clone)]
pub struct ScoreLog {
    path: PathBuf,
}

impl ScoreLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, writing the header first if the log is new or empty.
    pub fn append(&self, record: &EvaluationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(SCORE_LOG_HEADER)?;
        }

        let mut row = vec![
            record.evaluated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            record.source_file.clone(),
        ];
        for category in Category::ALL {
            row.push(format!(
                "{:.1}/{:.0}",
                record.breakdown.awarded(category),
                category.max_points()
            ));
        }
        row.push(format!("{:.1}/100", record.final_score));
        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::AnalyzerRegistry;
    use crate::compile::CompileMethod;
    use crate::scoring::{aggregate, ScoreInputs};

    fn record(source_file: &str) -> EvaluationRecord {
        let source = "int x;\n";
        let compilation = CompileResult {
            success: true,
            method: CompileMethod::Fallback,
            error_count: 0,
            warning_count: 0,
            note: None,
            diagnostic_text: String::new(),
            artifact_ref: None,
            duration_ms: 3,
        };
        let analyses = AnalyzerRegistry::standard().run_all(source);
        let breakdown = aggregate(&ScoreInputs {
            compilation: &compilation,
            runtime: None,
            analyses: &analyses,
            capabilities: &[],
        });
        EvaluationRecord {
            run_id: Uuid::new_v4(),
            evaluated_at: Utc::now(),
            source_file: source_file.to_string(),
            source_digest: source_digest(source),
            final_score: breakdown.final_score(),
            compilation,
            runtime: None,
            analyses,
            capabilities: Vec::new(),
            breakdown,
            notes: vec!["runtime stage skipped: disabled".to_string()],
        }
    }

    #[test]
    fn test_source_digest_is_stable() {
        assert_eq!(
            source_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(source_digest("a"), source_digest("a"));
    }

    #[test]
    fn test_results_file_name() {
        assert_eq!(
            record("drivers/hello_driver.c").results_file_name(),
            "hello_driver_results.json"
        );
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("outputs");
        let rec = record("hello.c");
        let path = rec.write_to_dir(&out).unwrap();
        assert_eq!(path, out.join("hello_results.json"));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["source_file"], "hello.c");
        assert_eq!(json["compilation"]["method"], "fallback");
        assert!(json["breakdown"]["Correctness"]["awarded"].is_number());
    }

    #[test]
    fn test_render_text_sections() {
        let text = record("hello.c").render_text();
        assert!(text.contains("Compilation: Success"));
        assert!(text.contains("Correctness: "));
        assert!(text.contains("Code Quality: "));
        assert!(text.contains("runtime stage skipped"));
        assert!(text.contains("Overall Score: "));
    }

    #[test]
    fn test_score_log_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = ScoreLog::new(dir.path().join("logs").join("scores.csv"));
        log.append(&record("a.c")).unwrap();
        log.append(&record("b.c")).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "timestamp,file,Correctness,Security,Code Quality,Performance,Advanced,Final Score"
        );
        assert!(lines[1].contains(",a.c,"));
        assert!(lines[2].contains("/40,"));
        assert!(lines[2].ends_with("/100"));
    }
}

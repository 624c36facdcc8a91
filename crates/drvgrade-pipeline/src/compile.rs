//! CompileStage: privileged module build with a syntax-only fallback.
//!
//! The privileged attempt runs in a private temporary directory holding a
//! copy of the source and a generated build descriptor. It is skipped when
//! no privileged environment exists, and abandoned for the fallback when it
//! fails solely on missing build dependencies. The temporary directory is
//! removed on every exit path.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use drvgrade_core::compile::{CompileMethod, CompileResult};
use drvgrade_core::config::CompileConfig;
use drvgrade_core::diagnostics::DiagnosticSignature;
use tracing::{debug, info, warn};

use crate::error::ToolchainError;
use crate::toolchain::{build_descriptor, BuildRequest, Toolchain};

const MISSING_DEPENDENCY_FALLBACK: &str =
    "privileged build failed on missing build dependencies; used syntax-only fallback";

/// Outcome of the privileged attempt.
enum Privileged {
    Decided(CompileResult),
    /// Fall back, prefixing the fallback note with this context.
    FallBack(String),
}

pub struct CompileStage {
    toolchain: Arc<dyn Toolchain>,
    signature: DiagnosticSignature,
    config: CompileConfig,
}

impl CompileStage {
    pub fn new(
        toolchain: Arc<dyn Toolchain>,
        signature: DiagnosticSignature,
        config: CompileConfig,
    ) -> Self {
        Self {
            toolchain,
            signature,
            config,
        }
    }

    /// Compile one driver source file. Never fails: every problem is folded
    /// into the returned [`CompileResult`].
    pub async fn run(&self, source: &Path) -> CompileResult {
        let started = Instant::now();

        let result = if self.toolchain.privileged_build_available().await {
            match self.privileged(source).await {
                Privileged::Decided(result) => result,
                Privileged::FallBack(context) => {
                    info!(context = %context, "falling back to syntax-only compile");
                    self.fallback(source).await.with_leading_note(&context)
                }
            }
        } else {
            debug!("no privileged build environment, using syntax-only compile");
            self.fallback(source).await
        };

        result.with_duration(started.elapsed().as_millis() as u64)
    }

    async fn privileged(&self, source: &Path) -> Privileged {
        let workspace = match tempfile::Builder::new()
            .prefix("drvgrade_kbuild_")
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not create build workspace");
                return Privileged::FallBack(format!(
                    "privileged build workspace unavailable ({e}); used syntax-only fallback"
                ));
            }
        };

        let module_name = module_name(source);
        let copied = workspace.path().join(format!("{module_name}.c"));
        let prepared = std::fs::copy(source, &copied).and_then(|_| {
            std::fs::write(
                workspace.path().join("Makefile"),
                build_descriptor(&module_name),
            )
        });
        if let Err(e) = prepared {
            return Privileged::FallBack(format!(
                "privileged build workspace unavailable ({e}); used syntax-only fallback"
            ));
        }

        let request = BuildRequest {
            module_dir: workspace.path().to_path_buf(),
            module_name: module_name.clone(),
            timeout: Duration::from_secs(self.config.privileged_timeout_secs),
        };
        let outcome = match self.toolchain.build(&request).await {
            Ok(output) => {
                let text = output.combined();
                let summary = self.signature.classify(&text);
                let artifact = request.artifact_path();
                let artifact_present = artifact.is_file();

                if !output.success() && summary.solely_missing_dependency() {
                    Privileged::FallBack(MISSING_DEPENDENCY_FALLBACK.to_string())
                } else {
                    let artifact_ref = artifact_present.then(|| format!("{module_name}.ko"));
                    let mut result = CompileResult::judge_privileged(
                        output.success() && artifact_present,
                        &summary,
                        text,
                        artifact_ref,
                    );
                    if output.success() && summary.is_clean() && !artifact_present {
                        result.note = Some("build reported success but produced no module".into());
                    }
                    Privileged::Decided(result)
                }
            }
            Err(e) => Privileged::Decided(self.aborted(CompileMethod::Privileged, &e)),
        };

        if let Err(e) = workspace.close() {
            warn!(error = %e, "failed to remove build workspace");
        }
        outcome
    }

    async fn fallback(&self, source: &Path) -> CompileResult {
        let timeout = Duration::from_secs(self.config.fallback_timeout_secs);
        match self.toolchain.syntax_check(source, timeout).await {
            Ok(output) => {
                let text = output.combined();
                let summary = self.signature.classify(&text);
                if !output.success() && summary.is_clean() {
                    return CompileResult::aborted(
                        CompileMethod::Fallback,
                        &summary,
                        text,
                        format!(
                            "compiler exited with status {} without diagnostics",
                            output.exit_code
                        ),
                    );
                }
                CompileResult::judge_fallback(&summary, text)
            }
            Err(e) => self.aborted(CompileMethod::Fallback, &e),
        }
    }

    fn aborted(&self, method: CompileMethod, error: &ToolchainError) -> CompileResult {
        warn!(method = method.name(), error = %error, "compile attempt aborted");
        let partial = error.partial_output().to_string();
        let summary = self.signature.classify(&partial);
        CompileResult::aborted(method, &summary, partial, error.to_string())
    }
}

/// Module name from the source file stem.
pub fn module_name(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_from_stem() {
        assert_eq!(module_name(Path::new("/tmp/x/hello_driver.c")), "hello_driver");
        assert_eq!(module_name(Path::new("")), "module");
    }
}

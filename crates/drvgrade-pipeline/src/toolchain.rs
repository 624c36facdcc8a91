//! Privileged build/load/unload capabilities.
//!
//! The stages only see [`Toolchain`] and [`DiagnosticLog`]. [`KernelToolchain`]
//! drives kbuild, `insmod` and `rmmod`; tests use the fakes in
//! [`crate::fakes`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use drvgrade_core::config::ToolchainConfig;

use crate::error::{Result, ToolchainError};
use crate::process::{run_command, CommandOutput, CommandSpec};

/// A module build in a directory that holds the source and a build
/// descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub module_dir: PathBuf,
    pub module_name: String,
    pub timeout: Duration,
}

impl BuildRequest {
    /// `<module_dir>/<module_name>.ko`
    pub fn artifact_path(&self) -> PathBuf {
        artifact_path(&self.module_dir, &self.module_name)
    }
}

pub fn artifact_path(module_dir: &Path, module_name: &str) -> PathBuf {
    module_dir.join(format!("{module_name}.ko"))
}

/// Minimal kbuild descriptor for a single-file module.
pub fn build_descriptor(module_name: &str) -> String {
    format!("obj-m := {module_name}.o\n")
}

/// Build, syntax-check, load and unload operations.
///
/// Every method is bounded by the given timeout. A command that runs and
/// fails is `Ok` with a non-zero exit code; `Err` means it could not run to
/// completion.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Whether a privileged module build can be attempted at all.
    async fn privileged_build_available(&self) -> bool;

    async fn build(&self, request: &BuildRequest) -> Result<CommandOutput>;

    /// Syntax-only compile of a single source file.
    async fn syntax_check(&self, source: &Path, timeout: Duration) -> Result<CommandOutput>;

    async fn load(&self, artifact: &Path, timeout: Duration) -> Result<CommandOutput>;

    async fn unload(&self, module_name: &str, timeout: Duration) -> Result<CommandOutput>;

    /// Remove build products from a module directory.
    async fn clean(&self, module_dir: &Path, timeout: Duration) -> Result<CommandOutput>;
}

/// Best-effort snapshot of the system diagnostic log.
#[async_trait]
pub trait DiagnosticLog: Send + Sync {
    async fn snapshot(&self, timeout: Duration) -> Result<String>;
}

/// kbuild + `insmod`/`rmmod` against the running kernel.
#[derive(Debug, Clone)]
pub struct KernelToolchain {
    config: ToolchainConfig,
}

impl KernelToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    fn make(&self, module_dir: &Path, target: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&self.config.make_program, timeout)
            .arg("-C")
            .arg(self.config.kernel_build_dir.display().to_string())
            .arg(format!("M={}", module_dir.display()))
            .arg(target)
    }

    async fn run_privileged(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let spec = spec.privileged(self.config.use_sudo);
        let output = run_command(&spec).await?;
        if self.config.use_sudo && !output.success() && sudo_refused(&output.stderr) {
            return Err(ToolchainError::PermissionDenied {
                program: spec.display(),
                detail: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// `sudo -n` refuses instead of prompting.
fn sudo_refused(stderr: &str) -> bool {
    stderr.contains("sudo:")
        && (stderr.contains("password is required") || stderr.contains("not in the sudoers"))
}

#[async_trait]
impl Toolchain for KernelToolchain {
    async fn privileged_build_available(&self) -> bool {
        self.config.kernel_build_dir.is_dir()
    }

    async fn build(&self, request: &BuildRequest) -> Result<CommandOutput> {
        run_command(&self.make(&request.module_dir, "modules", request.timeout)).await
    }

    async fn syntax_check(&self, source: &Path, timeout: Duration) -> Result<CommandOutput> {
        let spec = CommandSpec::new(&self.config.compiler, timeout)
            .args(self.config.fallback_flags.iter().cloned())
            .arg(source.display().to_string());
        run_command(&spec).await
    }

    async fn load(&self, artifact: &Path, timeout: Duration) -> Result<CommandOutput> {
        self.run_privileged(CommandSpec::new("insmod", timeout).arg(artifact.display().to_string()))
            .await
    }

    async fn unload(&self, module_name: &str, timeout: Duration) -> Result<CommandOutput> {
        self.run_privileged(CommandSpec::new("rmmod", timeout).arg(module_name))
            .await
    }

    async fn clean(&self, module_dir: &Path, timeout: Duration) -> Result<CommandOutput> {
        run_command(&self.make(module_dir, "clean", timeout)).await
    }
}

/// Kernel ring buffer via `dmesg`.
#[derive(Debug, Clone, Default)]
pub struct DmesgLog;

#[async_trait]
impl DiagnosticLog for DmesgLog {
    async fn snapshot(&self, timeout: Duration) -> Result<String> {
        let spec = CommandSpec::new("dmesg", timeout).args(["--kernel", "--ctime", "--color=never"]);
        let output = run_command(&spec).await?;
        if !output.success() {
            return Err(ToolchainError::PermissionDenied {
                program: spec.display(),
                detail: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path_and_descriptor() {
        let req = BuildRequest {
            module_dir: PathBuf::from("/work/hello"),
            module_name: "hello".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(req.artifact_path(), PathBuf::from("/work/hello/hello.ko"));
        assert_eq!(build_descriptor("hello"), "obj-m := hello.o\n");
    }

    #[test]
    fn test_make_command_shape() {
        let toolchain = KernelToolchain::new(ToolchainConfig {
            kernel_build_dir: PathBuf::from("/lib/modules/6.1.0/build"),
            ..ToolchainConfig::default()
        });
        let spec = toolchain.make(Path::new("/work/hello"), "modules", Duration::from_secs(5));
        assert_eq!(
            spec.display(),
            "make -C /lib/modules/6.1.0/build M=/work/hello modules"
        );
    }

    #[test]
    fn test_sudo_refusal_detection() {
        assert!(sudo_refused("sudo: a password is required\n"));
        assert!(!sudo_refused("insmod: ERROR: could not insert module: File exists"));
    }

    #[tokio::test]
    async fn test_missing_build_tree_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = KernelToolchain::new(ToolchainConfig {
            kernel_build_dir: dir.path().join("absent"),
            ..ToolchainConfig::default()
        });
        assert!(!toolchain.privileged_build_available().await);
    }
}

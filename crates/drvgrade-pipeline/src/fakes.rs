//! In-memory fakes for the toolchain, diagnostic log and endpoints.
//!
//! `FakeToolchain` replays scripted responses per operation and records every
//! call, so stage control flow (fallback, retry-once, cleanup) can be checked
//! without a privileged environment.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, ToolchainError};
use crate::harness::endpoint::{Endpoint, EndpointHandle, EndpointLocator};
use crate::process::CommandOutput;
use crate::toolchain::{BuildRequest, DiagnosticLog, Toolchain};

// ---------------------------------------------------------------------------
// FakeToolchain
// ---------------------------------------------------------------------------

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum FakeResponse {
    Output(CommandOutput),
    Timeout { partial_output: String },
    PermissionDenied,
}

impl FakeResponse {
    /// Exit 0, no output.
    pub fn ok() -> Self {
        FakeResponse::Output(CommandOutput::ok("fake", ""))
    }

    /// Exit 0 with the given output.
    pub fn ok_with(output: &str) -> Self {
        FakeResponse::Output(CommandOutput::ok("fake", output))
    }

    /// Non-zero exit with the given diagnostics on stderr.
    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        FakeResponse::Output(CommandOutput::failed("fake", exit_code, stderr))
    }

    pub fn timeout(partial_output: &str) -> Self {
        FakeResponse::Timeout {
            partial_output: partial_output.to_string(),
        }
    }

    fn is_success(&self) -> bool {
        matches!(self, FakeResponse::Output(out) if out.success())
    }

    fn into_result(self, program: &str, timeout: Duration) -> Result<CommandOutput> {
        match self {
            FakeResponse::Output(mut out) => {
                out.program = program.to_string();
                Ok(out)
            }
            FakeResponse::Timeout { partial_output } => Err(ToolchainError::Timeout {
                program: program.to_string(),
                limit_ms: timeout.as_millis() as u64,
                partial_output,
            }),
            FakeResponse::PermissionDenied => Err(ToolchainError::PermissionDenied {
                program: program.to_string(),
                detail: "sudo: a password is required".to_string(),
            }),
        }
    }
}

/// A recorded toolchain invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainCall {
    Build {
        module_dir: PathBuf,
        module_name: String,
        /// A build descriptor existed in the directory at call time.
        descriptor_present: bool,
    },
    SyntaxCheck {
        source: PathBuf,
    },
    Load {
        artifact: PathBuf,
    },
    Unload {
        module_name: String,
    },
    Clean {
        module_dir: PathBuf,
    },
}

/// Scripted toolchain. Unscripted calls succeed with no output.
#[derive(Debug, Default)]
pub struct FakeToolchain {
    privileged: bool,
    skip_artifacts: bool,
    builds: Mutex<VecDeque<FakeResponse>>,
    syntax_checks: Mutex<VecDeque<FakeResponse>>,
    loads: Mutex<VecDeque<FakeResponse>>,
    unloads: Mutex<VecDeque<FakeResponse>>,
    cleans: Mutex<VecDeque<FakeResponse>>,
    calls: Mutex<Vec<ToolchainCall>>,
}

impl FakeToolchain {
    /// No privileged build environment: only the syntax-only path is used.
    pub fn new() -> Self {
        Self::default()
    }

    /// Privileged build environment present.
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            ..Self::default()
        }
    }

    /// Successful builds do not leave a `.ko` behind.
    pub fn without_artifacts(mut self) -> Self {
        self.skip_artifacts = true;
        self
    }

    pub fn script_build(self, response: FakeResponse) -> Self {
        self.builds.lock().unwrap().push_back(response);
        self
    }

    pub fn script_syntax_check(self, response: FakeResponse) -> Self {
        self.syntax_checks.lock().unwrap().push_back(response);
        self
    }

    pub fn script_load(self, response: FakeResponse) -> Self {
        self.loads.lock().unwrap().push_back(response);
        self
    }

    pub fn script_unload(self, response: FakeResponse) -> Self {
        self.unloads.lock().unwrap().push_back(response);
        self
    }

    pub fn script_clean(self, response: FakeResponse) -> Self {
        self.cleans.lock().unwrap().push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<ToolchainCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn load_count(&self) -> usize {
        self.count(|c| matches!(c, ToolchainCall::Load { .. }))
    }

    pub fn unload_count(&self) -> usize {
        self.count(|c| matches!(c, ToolchainCall::Unload { .. }))
    }

    pub fn build_count(&self) -> usize {
        self.count(|c| matches!(c, ToolchainCall::Build { .. }))
    }

    pub fn syntax_check_count(&self) -> usize {
        self.count(|c| matches!(c, ToolchainCall::SyntaxCheck { .. }))
    }

    fn count(&self, pred: impl Fn(&ToolchainCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ToolchainCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next(queue: &Mutex<VecDeque<FakeResponse>>) -> FakeResponse {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(FakeResponse::ok)
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn privileged_build_available(&self) -> bool {
        self.privileged
    }

    async fn build(&self, request: &BuildRequest) -> Result<CommandOutput> {
        self.record(ToolchainCall::Build {
            module_dir: request.module_dir.clone(),
            module_name: request.module_name.clone(),
            descriptor_present: request.module_dir.join("Makefile").exists(),
        });
        let response = Self::next(&self.builds);
        if response.is_success() && !self.skip_artifacts {
            std::fs::write(request.artifact_path(), b"\x7fELF")?;
        }
        response.into_result("make", request.timeout)
    }

    async fn syntax_check(&self, source: &Path, timeout: Duration) -> Result<CommandOutput> {
        self.record(ToolchainCall::SyntaxCheck {
            source: source.to_path_buf(),
        });
        Self::next(&self.syntax_checks).into_result("gcc", timeout)
    }

    async fn load(&self, artifact: &Path, timeout: Duration) -> Result<CommandOutput> {
        self.record(ToolchainCall::Load {
            artifact: artifact.to_path_buf(),
        });
        Self::next(&self.loads).into_result("insmod", timeout)
    }

    async fn unload(&self, module_name: &str, timeout: Duration) -> Result<CommandOutput> {
        self.record(ToolchainCall::Unload {
            module_name: module_name.to_string(),
        });
        Self::next(&self.unloads).into_result("rmmod", timeout)
    }

    async fn clean(&self, module_dir: &Path, timeout: Duration) -> Result<CommandOutput> {
        self.record(ToolchainCall::Clean {
            module_dir: module_dir.to_path_buf(),
        });
        Self::next(&self.cleans).into_result("make", timeout)
    }
}

// ---------------------------------------------------------------------------
// FakeDiagnosticLog
// ---------------------------------------------------------------------------

/// Diagnostic log that either returns fixed text or refuses access.
#[derive(Debug, Clone)]
pub struct FakeDiagnosticLog {
    text: Option<String>,
}

impl FakeDiagnosticLog {
    pub fn available(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
        }
    }

    pub fn unavailable() -> Self {
        Self { text: None }
    }
}

#[async_trait]
impl DiagnosticLog for FakeDiagnosticLog {
    async fn snapshot(&self, _timeout: Duration) -> Result<String> {
        self.text
            .clone()
            .ok_or_else(|| ToolchainError::PermissionDenied {
                program: "dmesg".to_string(),
                detail: "Operation not permitted".to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Scripted endpoints
// ---------------------------------------------------------------------------

/// How a scripted endpoint answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteScript {
    AcceptAll,
    /// Every write fails with `WouldBlock`.
    WouldBlock,
    /// Every write fails with a hard error of this kind.
    Fail(io::ErrorKind),
    /// Accept this many bytes in total, then fail hard.
    Capacity(usize),
    /// Every n-th write fails with `WouldBlock`, the rest are accepted.
    WouldBlockEvery(usize),
}

#[derive(Debug, Default)]
struct EndpointCounters {
    opens: AtomicUsize,
    write_calls: AtomicUsize,
    bytes_accepted: AtomicUsize,
    controls: Mutex<Vec<u64>>,
}

/// Endpoint with scripted behavior and shared counters.
#[derive(Debug, Clone)]
pub struct ScriptedEndpoint {
    name: String,
    writes: WriteScript,
    read_back: Vec<u8>,
    rejected_codes: Vec<u64>,
    open_error: Option<io::ErrorKind>,
    counters: Arc<EndpointCounters>,
}

impl ScriptedEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            writes: WriteScript::AcceptAll,
            read_back: Vec::new(),
            rejected_codes: Vec::new(),
            open_error: None,
            counters: Arc::default(),
        }
    }

    pub fn writes(mut self, script: WriteScript) -> Self {
        self.writes = script;
        self
    }

    /// Bytes returned by the first read on each handle.
    pub fn read_back(mut self, data: &[u8]) -> Self {
        self.read_back = data.to_vec();
        self
    }

    /// Control codes answered with `ENOTTY`.
    pub fn reject_codes(mut self, codes: &[u64]) -> Self {
        self.rejected_codes = codes.to_vec();
        self
    }

    pub fn fail_open(mut self, kind: io::ErrorKind) -> Self {
        self.open_error = Some(kind);
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.counters.write_calls.load(Ordering::SeqCst)
    }

    pub fn bytes_accepted(&self) -> usize {
        self.counters.bytes_accepted.load(Ordering::SeqCst)
    }

    pub fn control_codes_seen(&self) -> Vec<u64> {
        self.counters.controls.lock().unwrap().clone()
    }
}

struct ScriptedHandle {
    endpoint: ScriptedEndpoint,
    read_done: bool,
}

impl EndpointHandle for ScriptedHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let counters = &self.endpoint.counters;
        let call = counters.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.endpoint.writes {
            WriteScript::AcceptAll => {
                counters.bytes_accepted.fetch_add(buf.len(), Ordering::SeqCst);
                Ok(buf.len())
            }
            WriteScript::WouldBlock => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            WriteScript::Fail(kind) => Err(io::Error::from(kind)),
            WriteScript::Capacity(cap) => {
                let used = counters.bytes_accepted.load(Ordering::SeqCst);
                let room = cap.saturating_sub(used);
                if room == 0 {
                    return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
                }
                let n = room.min(buf.len());
                counters.bytes_accepted.fetch_add(n, Ordering::SeqCst);
                Ok(n)
            }
            WriteScript::WouldBlockEvery(n) if n > 0 && call % n == 0 => {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            WriteScript::WouldBlockEvery(_) => {
                counters.bytes_accepted.fetch_add(buf.len(), Ordering::SeqCst);
                Ok(buf.len())
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_done || self.endpoint.read_back.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        self.read_done = true;
        let n = self.endpoint.read_back.len().min(buf.len());
        buf[..n].copy_from_slice(&self.endpoint.read_back[..n]);
        Ok(n)
    }

    fn control(&mut self, code: u64) -> io::Result<i32> {
        self.endpoint.counters.controls.lock().unwrap().push(code);
        if self.endpoint.rejected_codes.contains(&code) {
            Err(io::Error::from_raw_os_error(libc::ENOTTY))
        } else {
            Ok(0)
        }
    }
}

impl Endpoint for ScriptedEndpoint {
    fn path(&self) -> String {
        format!("/dev/{}", self.name)
    }

    fn open(&self) -> io::Result<Box<dyn EndpointHandle>> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.open_error {
            return Err(io::Error::from(kind));
        }
        Ok(Box::new(ScriptedHandle {
            endpoint: self.clone(),
            read_done: false,
        }))
    }
}

/// Locator that always answers with the same endpoint, or with none.
#[derive(Clone, Default)]
pub struct StaticLocator {
    endpoint: Option<Arc<dyn Endpoint>>,
}

impl StaticLocator {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(endpoint: impl Endpoint + 'static) -> Self {
        Self {
            endpoint: Some(Arc::new(endpoint)),
        }
    }
}

impl EndpointLocator for StaticLocator {
    fn locate(&self, _module_name: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoint.clone()
    }
}

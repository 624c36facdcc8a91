//! drvgrade pipeline: the stages that touch the outside world.
//!
//! - [`compile`]: privileged kbuild with a syntax-only fallback
//! - [`runtime`]: build -> load -> unload with a single reload on conflict
//! - [`harness`]: dynamic probes against the loaded module's endpoint
//! - [`pipeline`]: runs the stages and scores the result
//!
//! External programs are reached only through the [`Toolchain`] and
//! [`DiagnosticLog`] traits; [`fakes`] provides scripted stand-ins.

pub mod compile;
pub mod error;
pub mod fakes;
pub mod harness;
pub mod pipeline;
pub mod process;
pub mod runtime;
pub mod toolchain;

pub use compile::CompileStage;
pub use error::ToolchainError;
pub use harness::{DeviceLocator, DeviceNode, DynamicTestHarness, Endpoint, EndpointLocator};
pub use pipeline::EvaluationPipeline;
pub use process::{run_command, CommandOutput, CommandSpec};
pub use runtime::{LoadedModule, RuntimeStage};
pub use toolchain::{BuildRequest, DiagnosticLog, DmesgLog, KernelToolchain, Toolchain};

mod backends;
mod executor;
mod factory;
mod font;
mod job;
pub mod placeholder;
mod traits;

pub use backends::{DockerBackend, NativeBackend};
pub use executor::{ExecutionOutcome, SandboxExecutor};
pub use factory::{available_backends, create_backend, BackendInfo};
pub use job::{generate_job_id, CaptureJob};
pub use traits::{BackendCapabilities, InterpreterBackend};

/// What the interpreter process left behind.
#[derive(Debug)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

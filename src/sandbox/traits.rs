use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use crate::error::Result;
use crate::sandbox::CaptureJob;

/// Capability flags indicating what the backend enforces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendCapabilities {
    /// Network access is cut off for the script
    pub network_isolated: bool,
    /// Memory usage is capped
    pub memory_limited: bool,
    /// The host filesystem outside the job directory is hidden
    pub filesystem_isolated: bool,
}

/// Trait for interpreter backends that run capture scripts.
///
/// A backend only describes how to launch the interpreter. Spawning, the
/// deadline, output draining and artifact checks are the executor's job, so
/// every backend gets the same timeout and cleanup guarantees.
#[async_trait]
pub trait InterpreterBackend: Send + Sync {
    /// Returns the backend name (e.g., "native", "docker")
    fn name(&self) -> &str;

    /// Returns the capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Path at which the running script must write the job's artifact.
    fn guest_artifact_path(&self, job: &CaptureJob) -> PathBuf;

    /// Host path where the script's artifact shows up when the script cannot
    /// write the final path directly. The executor moves it into place after
    /// the process is gone.
    fn staged_artifact_path(&self, _job: &CaptureJob) -> Option<PathBuf> {
        None
    }

    /// Build the command running `script` for `job`.
    ///
    /// `deadline` is the hard wall-clock limit the executor will enforce.
    fn command(&self, job: &CaptureJob, script: &Path, deadline: Duration) -> Result<Command>;

    /// Stop anything the command left running outside its own process group.
    /// Default implementation is a no-op for backends whose whole run lives
    /// in the spawned process group.
    async fn terminate(&self, _job: &CaptureJob) -> Result<()> {
        Ok(())
    }
}

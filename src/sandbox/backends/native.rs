use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::capture::GraphicsLibrary;
use crate::config::types::NativeConfig;
use crate::error::{CodereelError, Result};
use crate::sandbox::traits::{BackendCapabilities, InterpreterBackend};
use crate::sandbox::CaptureJob;

/// Minimal search path handed to the interpreter
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const MIB: u64 = 1024 * 1024;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

/// Kernel limits applied to the interpreter between fork and exec.
/// `None` leaves the inherited limit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResourceLimits {
    address_space: Option<u64>,
    processes: Option<u64>,
    file_size: Option<u64>,
}

impl ResourceLimits {
    fn new(config: &NativeConfig, memory_limit_mb: u64) -> Self {
        let nonzero = |v: u64| (v > 0).then_some(v);
        Self {
            address_space: nonzero(memory_limit_mb).map(|mb| mb * MIB),
            processes: nonzero(config.max_processes),
            file_size: nonzero(config.max_file_size_mb).map(|mb| mb * MIB),
        }
    }

    /// Runs in the forked child, so it only makes raw syscalls.
    #[cfg(unix)]
    fn apply(&self) -> std::io::Result<()> {
        if let Some(bytes) = self.address_space {
            set_rlimit(libc::RLIMIT_AS as RlimitResource, bytes)?;
        }
        if let Some(count) = self.processes {
            set_rlimit(libc::RLIMIT_NPROC as RlimitResource, count)?;
        }
        if let Some(bytes) = self.file_size {
            set_rlimit(libc::RLIMIT_FSIZE as RlimitResource, bytes)?;
        }
        set_rlimit(libc::RLIMIT_CORE as RlimitResource, 0)
    }
}

/// Lower both soft and hard limit, never above the current hard limit.
#[cfg(unix)]
fn set_rlimit(resource: RlimitResource, value: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into the struct we own.
    if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let value = (value as libc::rlim_t).min(current.rlim_max);
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    // SAFETY: setrlimit only reads the struct.
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Host interpreter backend.
///
/// Runs `python -I -B` with a scrubbed environment, the job directory as
/// working directory and home, headless graphics drivers and kernel resource
/// limits. Turtle jobs get a private X server through `xvfb-run` when one is
/// installed. The executor places the process in its own group so the whole
/// tree can be killed.
pub struct NativeBackend {
    python: PathBuf,
    xvfb_run: Option<PathBuf>,
    forward_display: bool,
    limits: ResourceLimits,
}

impl NativeBackend {
    /// Create a new native backend, resolving the interpreter through PATH.
    pub fn new(config: &NativeConfig, memory_limit_mb: u64) -> Result<Self> {
        let python = which::which(&config.python).map_err(|e| {
            CodereelError::BackendNotAvailable {
                backend: "native".to_string(),
                reason: format!("Python interpreter '{}' not found: {}", config.python, e),
            }
        })?;

        let xvfb_run = which::which("xvfb-run").ok();
        if xvfb_run.is_none() && !config.forward_display {
            warn!("xvfb-run not found; turtle drawings will fall back to a placeholder");
        }

        let limits = ResourceLimits::new(config, memory_limit_mb);
        info!(
            python = %python.display(),
            xvfb = xvfb_run.is_some(),
            limits = ?limits,
            "Native backend initialized"
        );

        Ok(Self {
            python,
            xvfb_run,
            forward_display: config.forward_display,
            limits,
        })
    }

    /// Check if the configured interpreter can be found.
    pub fn is_available(config: &NativeConfig) -> bool {
        which::which(&config.python).is_ok()
    }

    /// What a native backend built with this memory limit enforces.
    pub fn capabilities_for(memory_limit_mb: u64) -> BackendCapabilities {
        BackendCapabilities {
            network_isolated: false,
            memory_limited: cfg!(unix) && memory_limit_mb > 0,
            filesystem_isolated: false,
        }
    }

    /// Turtle needs Tk, which needs an X display.
    fn needs_private_display(&self, job: &CaptureJob) -> bool {
        job.library() == GraphicsLibrary::TurtleGraphics && !self.forward_display
    }
}

#[async_trait]
impl InterpreterBackend for NativeBackend {
    fn name(&self) -> &str {
        "native"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            memory_limited: cfg!(unix) && self.limits.address_space.is_some(),
            ..Self::capabilities_for(0)
        }
    }

    fn guest_artifact_path(&self, job: &CaptureJob) -> PathBuf {
        job.artifact_path().to_path_buf()
    }

    fn command(&self, job: &CaptureJob, script: &Path, _deadline: Duration) -> Result<Command> {
        let workdir = job.workdir();

        let mut cmd = match (&self.xvfb_run, self.needs_private_display(job)) {
            (Some(xvfb_run), true) => {
                let mut cmd = Command::new(xvfb_run);
                cmd.arg("-a");
                cmd.arg(&self.python);
                cmd
            }
            _ => Command::new(&self.python),
        };
        // Isolated mode: no user site-packages, no PYTHON* variables.
        cmd.args(["-I", "-B"]);
        cmd.arg(script);
        cmd.current_dir(workdir);

        cmd.env_clear();
        cmd.env("PATH", SANDBOX_PATH);
        cmd.env("HOME", workdir);
        cmd.env("TMPDIR", workdir);
        cmd.env("MPLBACKEND", "Agg");
        cmd.env("MPLCONFIGDIR", workdir);
        cmd.env("SDL_VIDEODRIVER", "dummy");
        cmd.env("SDL_AUDIODRIVER", "dummy");
        cmd.env("PYGAME_HIDE_SUPPORT_PROMPT", "1");
        // BLAS thread pools reserve address space per thread.
        cmd.env("OPENBLAS_NUM_THREADS", "1");
        cmd.env("OMP_NUM_THREADS", "1");

        if self.forward_display {
            if let Ok(display) = std::env::var("DISPLAY") {
                cmd.env("DISPLAY", display);
            }
        }

        #[cfg(unix)]
        {
            let limits = self.limits;
            // SAFETY: the closure only calls getrlimit/setrlimit, which are
            // async-signal-safe, and allocates nothing.
            unsafe {
                cmd.pre_exec(move || limits.apply());
            }
        }

        Ok(cmd)
    }
}

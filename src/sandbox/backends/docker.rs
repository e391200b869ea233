use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::capture::GraphicsLibrary;
use crate::config::types::DockerConfig;
use crate::error::{CodereelError, Result};
use crate::sandbox::traits::{BackendCapabilities, InterpreterBackend};
use crate::sandbox::CaptureJob;

/// Default Docker image name for the sandbox
const DEFAULT_IMAGE: &str = "codereel-sandbox:latest";

/// Path to the Dockerfile relative to the crate root
const DOCKERFILE_PATH: &str = "docker/Dockerfile.sandbox";

/// The job directory's mount point inside the container
const GUEST_JOB_DIR: &str = "/job";

/// File name the container writes its image to, inside the job directory
const STAGED_ARTIFACT: &str = "artifact.png";

/// Docker sandbox backend.
///
/// Every capture runs in a fresh `docker run --rm` container with no network,
/// a memory cap and a single bind mount: the job's private directory. The
/// image is written there and moved to the artifact path by the executor, so
/// a container never sees other artifacts. The container is named after the
/// job so it can be removed forcefully on timeout, and the interpreter is
/// additionally wrapped in `timeout -s KILL` so the container cannot outlive
/// its deadline even if the host side goes away.
pub struct DockerBackend {
    image: String,
    memory_limit_mb: u64,
    enable_networking: bool,
}

impl DockerBackend {
    /// Create a new Docker backend.
    pub async fn new(config: DockerConfig, memory_limit_mb: u64) -> Result<Self> {
        if !Self::is_available() {
            return Err(daemon_unavailable());
        }

        let image = config.image.unwrap_or_else(|| DEFAULT_IMAGE.to_string());

        // Check if image exists, build if configured to do so
        if !Self::image_exists(&image).await {
            if config.build_image {
                Self::build_image(&image).await?;
            } else {
                return Err(CodereelError::BackendNotAvailable {
                    backend: "docker".to_string(),
                    reason: format!(
                        "image '{}' is missing and build_image is off ({})",
                        image,
                        build_hint(&image)
                    ),
                });
            }
        }

        info!(image = %image, "Docker backend initialized");

        Ok(Self {
            image,
            memory_limit_mb,
            enable_networking: config.enable_networking,
        })
    }

    /// Whether the Docker daemon answers.
    pub fn is_available() -> bool {
        std::process::Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|status| status.success())
    }

    /// What a docker backend built from this config enforces.
    pub fn capabilities_for(config: &DockerConfig) -> BackendCapabilities {
        BackendCapabilities {
            network_isolated: !config.enable_networking,
            memory_limited: true,
            filesystem_isolated: true,
        }
    }

    async fn image_exists(image: &str) -> bool {
        docker_succeeds(["image", "inspect", image]).await
    }

    /// Build the sandbox image from the bundled Dockerfile.
    async fn build_image(image: &str) -> Result<()> {
        let dockerfile = locate_dockerfile()
            .ok_or_else(|| {
                CodereelError::SandboxInit(format!(
                    "{} not found; {}",
                    DOCKERFILE_PATH,
                    build_hint(image)
                ))
            })?
            .canonicalize()?;
        // The build context is the directory holding `docker/`.
        let context = dockerfile
            .ancestors()
            .nth(2)
            .ok_or_else(|| {
                CodereelError::SandboxInit("Dockerfile has no build context".to_string())
            })?;

        info!(image = %image, dockerfile = %dockerfile.display(), "Building sandbox image");
        let output = Command::new("docker")
            .args(["build", "--tag", image, "--file"])
            .arg(&dockerfile)
            .arg(context)
            .output()
            .await
            .map_err(|e| CodereelError::SandboxInit(format!("docker build did not start: {}", e)))?;

        if !output.status.success() {
            return Err(CodereelError::SandboxInit(format!(
                "docker build failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(image = %image, "Sandbox image ready");
        Ok(())
    }

    fn container_name(job: &CaptureJob) -> String {
        format!("codereel-{}", job.id())
    }

    /// Stop and remove the job's container.
    async fn remove_container(&self, name: &str) -> Result<()> {
        let output = Command::new("docker")
            .args(["rm", "-f", name])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                CodereelError::SandboxExecution(format!("Failed to remove container: {}", e))
            })?;

        if !output.status.success() {
            // Already gone once `--rm` has done its job.
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                container = %name,
                error = %stderr.trim(),
                "Container removal reported an error"
            );
        } else {
            info!(container = %name, "Removed sandbox container");
        }

        Ok(())
    }
}

#[async_trait]
impl InterpreterBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            network_isolated: !self.enable_networking,
            memory_limited: true,
            filesystem_isolated: true,
        }
    }

    fn guest_artifact_path(&self, _job: &CaptureJob) -> PathBuf {
        Path::new(GUEST_JOB_DIR).join(STAGED_ARTIFACT)
    }

    fn staged_artifact_path(&self, job: &CaptureJob) -> Option<PathBuf> {
        Some(job.workdir().join(STAGED_ARTIFACT))
    }

    fn command(&self, job: &CaptureJob, script: &Path, deadline: Duration) -> Result<Command> {
        let script_name = script.file_name().ok_or_else(|| {
            CodereelError::SandboxExecution(format!("Invalid script path: {}", script.display()))
        })?;

        let mut cmd = Command::new("docker");
        cmd.args(["run", "--rm", "--init"]);
        cmd.args(["--name", &Self::container_name(job)]);

        // Network isolation
        if !self.enable_networking {
            cmd.arg("--network=none");
        }

        // Resource limits
        cmd.arg(format!("--memory={}m", self.memory_limit_mb));
        cmd.arg("--pids-limit=256");
        cmd.arg("--cap-drop=ALL");
        cmd.arg("--security-opt=no-new-privileges");

        // Write files as the invoking user so the host can clean them up
        #[cfg(unix)]
        {
            // SAFETY: getuid/getgid have no preconditions and cannot fail.
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            cmd.arg(format!("--user={}:{}", uid, gid));
        }

        cmd.arg("-v");
        cmd.arg(format!("{}:{}:rw", job.workdir().display(), GUEST_JOB_DIR));
        cmd.args(["-w", GUEST_JOB_DIR]);

        for (key, value) in [
            ("HOME", GUEST_JOB_DIR),
            ("MPLBACKEND", "Agg"),
            ("MPLCONFIGDIR", GUEST_JOB_DIR),
            ("SDL_VIDEODRIVER", "dummy"),
            ("SDL_AUDIODRIVER", "dummy"),
            ("PYGAME_HIDE_SUPPORT_PROMPT", "1"),
            ("OPENBLAS_NUM_THREADS", "1"),
            ("OMP_NUM_THREADS", "1"),
        ] {
            cmd.arg("-e");
            cmd.arg(format!("{}={}", key, value));
        }

        cmd.arg(&self.image);

        // Bound the container from the inside as well.
        cmd.args(["timeout", "-s", "KILL"]);
        cmd.arg(format!("{}", deadline.as_secs() + 1));
        if job.library() == GraphicsLibrary::TurtleGraphics {
            // Tk needs an X display.
            cmd.args(["xvfb-run", "-a"]);
        }
        cmd.args(["python", "-I", "-B"]);
        cmd.arg(Path::new(GUEST_JOB_DIR).join(script_name));

        Ok(cmd)
    }

    async fn terminate(&self, job: &CaptureJob) -> Result<()> {
        let name = Self::container_name(job);
        if let Err(e) = self.remove_container(&name).await {
            warn!(container = %name, error = %e, "Failed to remove container");
            return Err(e);
        }
        Ok(())
    }
}

/// The error for a missing or stopped Docker daemon.
pub(crate) fn daemon_unavailable() -> CodereelError {
    CodereelError::BackendNotAvailable {
        backend: "docker".to_string(),
        reason: "the Docker daemon did not answer `docker info`; is it installed and running?"
            .to_string(),
    }
}

fn build_hint(image: &str) -> String {
    format!("build it with: docker build -t {} -f {} .", image, DOCKERFILE_PATH)
}

/// Run a quiet docker subcommand and report whether it exited 0.
async fn docker_succeeds<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new("docker")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

/// Look for the bundled Dockerfile next to the working directory, above the
/// executable (`target/<profile>/codereel`), then under the crate root.
fn locate_dockerfile() -> Option<PathBuf> {
    let cwd = std::iter::once(PathBuf::from("."));
    let exe_dirs = std::env::current_exe()
        .ok()
        .map(|exe| exe.ancestors().skip(1).take(6).map(Path::to_path_buf).collect::<Vec<_>>())
        .unwrap_or_default();
    let manifest = std::env::var_os("CARGO_MANIFEST_DIR").map(PathBuf::from);

    cwd.chain(exe_dirs)
        .chain(manifest)
        .map(|dir| dir.join(DOCKERFILE_PATH))
        .find(|candidate| candidate.is_file())
}

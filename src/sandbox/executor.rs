use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture;
use crate::config::types::{PlaceholderConfig, SandboxConfig};
use crate::error::{CodereelError, Result};
use crate::sandbox::placeholder::{self, PlaceholderStyle};
use crate::sandbox::traits::InterpreterBackend;
use crate::sandbox::{CaptureJob, CommandResult};

/// Bytes of stdout/stderr kept per stream (the tail is kept)
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// How long to wait for the output pipes to close once the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Characters of stderr quoted in a failure message
const ERROR_EXCERPT_CHARS: usize = 300;

/// How a capture run ended. An image exists at the artifact path in every case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The script wrote its own image.
    ArtifactProduced(PathBuf),
    /// The deadline passed and the process was killed; a placeholder was written.
    TimedOut,
    /// The script ended without an image; a placeholder was written.
    RuntimeFailure(String),
}

impl ExecutionOutcome {
    pub fn is_produced(&self) -> bool {
        matches!(self, Self::ArtifactProduced(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ArtifactProduced(_) => "artifact_produced",
            Self::TimedOut => "timed_out",
            Self::RuntimeFailure(_) => "runtime_failure",
        }
    }
}

/// Runs capture jobs through an interpreter backend.
///
/// Never fails: every path ends in an [`ExecutionOutcome`] and a readable
/// image at the artifact path, because the video assembler downstream has no
/// fallback of its own.
pub struct SandboxExecutor {
    backend: Box<dyn InterpreterBackend>,
    grace: Duration,
    placeholder: PlaceholderStyle,
}

impl SandboxExecutor {
    pub fn new(
        backend: Box<dyn InterpreterBackend>,
        config: &SandboxConfig,
        placeholder: &PlaceholderConfig,
    ) -> Self {
        Self {
            backend,
            grace: Duration::from_secs(config.grace_seconds),
            placeholder: PlaceholderStyle::from(placeholder),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn backend(&self) -> &dyn InterpreterBackend {
        self.backend.as_ref()
    }

    /// Run `code` and leave an image at `artifact_path`.
    pub async fn execute_and_capture(
        &self,
        code: &str,
        artifact_path: &Path,
        budget: Duration,
    ) -> ExecutionOutcome {
        match CaptureJob::new(code, artifact_path, budget) {
            Ok(job) => self.execute(job).await,
            Err(e) => self.setup_failed(artifact_path, &e, budget),
        }
    }

    /// Resolve a job that could not be created (no job directory, bad path).
    pub fn setup_failed(
        &self,
        artifact_path: &Path,
        error: &CodereelError,
        budget: Duration,
    ) -> ExecutionOutcome {
        error!(error = %error, "Failed to set up capture job");
        let outcome = ExecutionOutcome::RuntimeFailure(error.to_string());
        self.write_placeholder(artifact_path, &outcome, budget);
        outcome
    }

    /// Run a prepared job. The job (and its directory) is consumed.
    pub async fn execute(&self, job: CaptureJob) -> ExecutionOutcome {
        let started = Instant::now();
        info!(
            job_id = %job.id(),
            backend = self.backend.name(),
            library = %job.library(),
            budget_secs = job.budget().as_secs(),
            "Starting capture"
        );

        let outcome = match self.run(&job).await {
            Ok(result) => {
                let produced = artifact_ready(job.artifact_path().to_path_buf()).await;
                resolve_outcome(job.artifact_path(), produced, &result)
            }
            Err(e) => {
                warn!(job_id = %job.id(), error = %e, "Capture orchestration failed");
                ExecutionOutcome::RuntimeFailure(e.to_string())
            }
        };

        if !outcome.is_produced() {
            self.write_placeholder(job.artifact_path(), &outcome, job.budget());
        }

        info!(
            job_id = %job.id(),
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Capture finished"
        );

        outcome
    }

    async fn run(&self, job: &CaptureJob) -> Result<CommandResult> {
        prepare_artifact_location(job.artifact_path()).await?;

        let guest_artifact = self.backend.guest_artifact_path(job);
        let source = capture::rewrite(job.library(), job.code(), &guest_artifact, job.budget());
        let script = job.write_script(&source)?;

        let deadline = job.budget() + self.grace;
        let mut cmd = self.backend.command(job, script.path(), deadline)?;
        let result = self.supervise(job, &mut cmd, deadline).await;

        // Dropping the handle would delete it too; closing surfaces the error.
        let script_path = script.path().to_path_buf();
        if let Err(e) = script.close() {
            debug!(script = %script_path.display(), error = %e, "Script cleanup failed");
        }

        let result = result?;
        if let Some(staged) = self.backend.staged_artifact_path(job) {
            collect_staged(&staged, job.artifact_path()).await?;
        }
        Ok(result)
    }

    async fn supervise(
        &self,
        job: &CaptureJob,
        cmd: &mut Command,
        deadline: Duration,
    ) -> Result<CommandResult> {
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            CodereelError::SandboxExecution(format!(
                "Failed to spawn {} interpreter: {}",
                self.backend.name(),
                e
            ))
        })?;
        let mut group = ProcessGroup::of(&child);

        let stdout = child.stdout.take().map(|s| tokio::spawn(read_tail(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_tail(s)));

        let (exit_code, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => (status?.code(), false),
            Err(_) => {
                warn!(
                    job_id = %job.id(),
                    deadline_secs = deadline.as_secs(),
                    "Execution exceeded its deadline, killing"
                );
                kill_child(&mut child, &mut group).await;
                if let Err(e) = self.backend.terminate(job).await {
                    warn!(job_id = %job.id(), error = %e, "Backend termination failed");
                }
                (None, true)
            }
        };
        // Strays that inherited the pipes would keep them open. The leader is
        // reaped by now, so only a group that still has members is signalled.
        group.kill_if_alive();

        let stdout = collect_output(stdout).await;
        let stderr = collect_output(stderr).await;

        debug!(
            job_id = %job.id(),
            exit_code = ?exit_code,
            timed_out = timed_out,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Interpreter finished"
        );

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }

    fn write_placeholder(&self, path: &Path, outcome: &ExecutionOutcome, budget: Duration) {
        let (title, detail) = match outcome {
            ExecutionOutcome::ArtifactProduced(_) => return,
            ExecutionOutcome::TimedOut => (
                "EXECUTION TIMED OUT",
                format!("Time budget: {}s", budget.as_secs()),
            ),
            ExecutionOutcome::RuntimeFailure(message) => {
                ("EXECUTION COMPLETED", message.clone())
            }
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                debug!(dir = %parent.display(), error = %e, "Could not create artifact directory");
            }
        }
        // A partial image or a link left by the script is replaced, never written through.
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "Could not remove unusable artifact");
            }
        }

        if let Err(e) = placeholder::render(path, title, &detail, &self.placeholder) {
            error!(path = %path.display(), error = %e, "Failed to write placeholder artifact");
        }
    }
}

/// Decide the outcome once the process is gone. A usable artifact wins over
/// everything else.
fn resolve_outcome(
    artifact_path: &Path,
    produced: bool,
    result: &CommandResult,
) -> ExecutionOutcome {
    if produced {
        ExecutionOutcome::ArtifactProduced(artifact_path.to_path_buf())
    } else if result.timed_out {
        ExecutionOutcome::TimedOut
    } else {
        ExecutionOutcome::RuntimeFailure(failure_message(result))
    }
}

/// Whether a regular file that decodes as an image sits at `path`. A save cut
/// short by the deadline leaves a truncated file that does not count.
async fn artifact_ready(path: PathBuf) -> bool {
    tokio::task::spawn_blocking(move || {
        let is_file = std::fs::symlink_metadata(&path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if !is_file {
            return false;
        }
        match image::open(&path) {
            Ok(_) => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Artifact does not decode");
                false
            }
        }
    })
    .await
    .unwrap_or(false)
}

/// Move an artifact the guest wrote into its job directory to the host path.
async fn collect_staged(staged: &Path, artifact_path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(staged).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        warn!(path = %staged.display(), "Ignoring staged artifact that is not a regular file");
        return Ok(());
    }

    if tokio::fs::rename(staged, artifact_path).await.is_err() {
        // Job and artifact directories may sit on different filesystems.
        tokio::fs::copy(staged, artifact_path).await?;
    }
    debug!(from = %staged.display(), to = %artifact_path.display(), "Collected staged artifact");
    Ok(())
}

fn failure_message(result: &CommandResult) -> String {
    let excerpt = error_excerpt(&result.stderr).or_else(|| error_excerpt(&result.stdout));
    match (result.exit_code, excerpt) {
        (Some(0), None) => "Program exited without producing an image".to_string(),
        (Some(code), None) => format!("Program exited with code {}", code),
        (Some(code), Some(excerpt)) => format!("Exit code {}: {}", code, excerpt),
        (None, None) => "Program was terminated by a signal".to_string(),
        (None, Some(excerpt)) => format!("Terminated: {}", excerpt),
    }
}

/// The last non-empty output line, which for a Python crash holds the
/// exception, trimmed to a readable length.
fn error_excerpt(output: &str) -> Option<String> {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let last = lines.last()?;

    let chars: Vec<char> = last.chars().collect();
    if chars.len() > ERROR_EXCERPT_CHARS {
        let tail: String = chars[chars.len() - ERROR_EXCERPT_CHARS..].iter().collect();
        Some(format!("...{}", tail))
    } else {
        Some(last.to_string())
    }
}

/// Remove a stale artifact so only this run's output can count as produced.
async fn prepare_artifact_location(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn kill_child(child: &mut Child, group: &mut ProcessGroup) {
    group.kill();
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Child already exited");
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&chunk[..n]);
                if kept.len() > MAX_CAPTURED_OUTPUT {
                    let excess = kept.len() - MAX_CAPTURED_OUTPUT;
                    kept.drain(..excess);
                }
            }
        }
    }
    kept
}

async fn collect_output(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, handle).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).to_string(),
        Ok(Err(e)) => {
            debug!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            debug!("Output pipe still open after process exit");
            String::new()
        }
    }
}

/// The child's process group. Killed on drop so that cancelling the caller's
/// future also takes down everything the script spawned.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    /// Kill the group only if some member is still running.
    fn kill_if_alive(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: signal 0 only checks that the group exists.
            let alive = unsafe { libc::kill(-(pgid as libc::pid_t), 0) } == 0;
            if !alive {
                self.pgid = None;
            }
        }
        self.kill();
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid.take() {
            // SAFETY: kill(2) only delivers a signal; a stale group yields ESRCH.
            let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
            if rc == 0 {
                debug!(pgid = pgid, "Killed process group");
            }
        }
        #[cfg(not(unix))]
        {
            self.pgid = None;
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::config::types::NativeConfig;
    use crate::sandbox::backends::NativeBackend;
    use crate::sandbox::traits::BackendCapabilities;

    /// Runs a fixed shell snippet instead of Python. `$ARTIFACT` (where the
    /// snippet should write) and `$SCRIPT` are exported to it; the script path
    /// is recorded for cleanup checks.
    struct ShellBackend {
        snippet: String,
        staged: bool,
        seen_script: Arc<Mutex<Option<PathBuf>>>,
    }

    impl ShellBackend {
        fn new(snippet: &str) -> (Self, Arc<Mutex<Option<PathBuf>>>) {
            let seen = Arc::new(Mutex::new(None));
            (
                Self {
                    snippet: snippet.to_string(),
                    staged: false,
                    seen_script: seen.clone(),
                },
                seen,
            )
        }

        /// Write into the job directory, like a container backend.
        fn staged(mut self) -> Self {
            self.staged = true;
            self
        }
    }

    #[async_trait]
    impl InterpreterBackend for ShellBackend {
        fn name(&self) -> &str {
            "shell"
        }

        fn capabilities(&self) -> BackendCapabilities {
            BackendCapabilities::default()
        }

        fn guest_artifact_path(&self, job: &CaptureJob) -> PathBuf {
            match self.staged_artifact_path(job) {
                Some(staged) => staged,
                None => job.artifact_path().to_path_buf(),
            }
        }

        fn staged_artifact_path(&self, job: &CaptureJob) -> Option<PathBuf> {
            self.staged.then(|| job.workdir().join("staged.png"))
        }

        fn command(&self, job: &CaptureJob, script: &Path, _deadline: Duration) -> Result<Command> {
            *self.seen_script.lock().unwrap() = Some(script.to_path_buf());
            assert!(script.exists(), "script must exist while the command runs");

            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.snippet);
            cmd.env("ARTIFACT", self.guest_artifact_path(job));
            cmd.env("SCRIPT", script);
            Ok(cmd)
        }
    }

    fn executor(backend: impl InterpreterBackend + 'static) -> SandboxExecutor {
        let placeholder = PlaceholderConfig {
            width: 108,
            height: 192,
            ..PlaceholderConfig::default()
        };
        SandboxExecutor::new(Box::new(backend), &SandboxConfig::default(), &placeholder)
            .with_grace(Duration::from_millis(500))
    }

    fn assert_readable_image(path: &Path) {
        let img = image::open(path).expect("artifact must be a readable image");
        assert!(img.width() > 0 && img.height() > 0);
    }

    const TINY_PNG_WRITER: &str = "cp \"$FIXTURE\" \"$ARTIFACT\"";

    #[tokio::test]
    async fn test_artifact_produced() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = write_fixture(dir.path());

        let snippet = format!("FIXTURE='{}'; {}", fixture.display(), TINY_PNG_WRITER);
        let (backend, seen) = ShellBackend::new(&snippet);
        let artifact = dir.path().join("out").join("frame.png");

        let outcome = executor(backend)
            .execute_and_capture("import matplotlib", &artifact, Duration::from_secs(5))
            .await;

        assert_eq!(outcome, ExecutionOutcome::ArtifactProduced(artifact.clone()));
        let img = image::open(&artifact).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (4, 4));
        assert!(!seen.lock().unwrap().as_ref().unwrap().exists());
    }

    fn write_fixture(dir: &Path) -> PathBuf {
        let fixture = dir.join("fixture.png");
        image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]))
            .save(&fixture)
            .unwrap();
        fixture
    }

    #[tokio::test]
    async fn test_staged_artifact_is_moved_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = write_fixture(dir.path());
        let snippet = format!("FIXTURE='{}'; {}", fixture.display(), TINY_PNG_WRITER);
        let (backend, _) = ShellBackend::new(&snippet);
        let artifact = dir.path().join("out").join("frame.png");

        let job = CaptureJob::new("", &artifact, Duration::from_secs(5)).unwrap();
        let staged = job.workdir().join("staged.png");
        let outcome = executor(backend.staged()).execute(job).await;

        assert_eq!(outcome, ExecutionOutcome::ArtifactProduced(artifact.clone()));
        assert_eq!(image::open(&artifact).unwrap().width(), 4);
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_staged_symlink_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = write_fixture(dir.path());
        let snippet = format!("ln -s '{}' \"$ARTIFACT\"", fixture.display());
        let (backend, _) = ShellBackend::new(&snippet);
        let artifact = dir.path().join("frame.png");

        let outcome = executor(backend.staged())
            .execute_and_capture("", &artifact, Duration::from_secs(5))
            .await;

        assert!(matches!(outcome, ExecutionOutcome::RuntimeFailure(_)));
        assert!(!std::fs::symlink_metadata(&artifact).unwrap().file_type().is_symlink());
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_truncated_image_at_deadline_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        // PNG signature only, then hang as if killed mid-save.
        let (backend, _) =
            ShellBackend::new("printf '\\211PNG\\r\\n\\032\\n' > \"$ARTIFACT\"; sleep 30");

        let outcome = executor(backend)
            .execute_and_capture("", &artifact, Duration::from_millis(300))
            .await;

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let (backend, _) = ShellBackend::new("echo 'not an image' > \"$ARTIFACT\"");

        let outcome = executor(backend)
            .execute_and_capture("", &artifact, Duration::from_secs(5))
            .await;

        assert!(matches!(outcome, ExecutionOutcome::RuntimeFailure(_)));
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_stdout_used_when_stderr_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let (backend, _) = ShellBackend::new("echo 'gave up drawing'; exit 4");

        let outcome = executor(backend)
            .execute_and_capture("", &artifact, Duration::from_secs(5))
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFailure("Exit code 4: gave up drawing".to_string())
        );
    }

    #[tokio::test]
    async fn test_exited_group_is_not_signalled() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 0"]);
        cmd.process_group(0);
        let mut child = cmd.spawn().unwrap();
        let mut group = ProcessGroup::of(&child);
        child.wait().await.unwrap();

        group.kill_if_alive();
        assert!(group.pgid.is_none());
    }

    #[tokio::test]
    async fn test_timeout_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let (backend, seen) = ShellBackend::new("while :; do sleep 1; done");

        let started = Instant::now();
        let outcome = executor(backend)
            .execute_and_capture("while True: pass", &artifact, Duration::from_secs(1))
            .await;

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_readable_image(&artifact);
        assert!(!seen.lock().unwrap().as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let marker = dir.path().join("late.txt");
        // The background child would write the marker after the deadline.
        let snippet = format!("(sleep 3; touch '{}') & wait", marker.display());
        let (backend, _) = ShellBackend::new(&snippet);

        let outcome = executor(backend)
            .execute_and_capture("", &artifact, Duration::from_millis(200))
            .await;

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_crash_is_runtime_failure() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let (backend, seen) =
            ShellBackend::new("echo 'ZeroDivisionError: division by zero' >&2; exit 1");

        let outcome = executor(backend)
            .execute_and_capture("1/0", &artifact, Duration::from_secs(5))
            .await;

        match outcome {
            ExecutionOutcome::RuntimeFailure(message) => {
                assert!(message.contains("ZeroDivisionError"), "{message}");
                assert!(message.contains("Exit code 1"), "{message}");
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
        assert_readable_image(&artifact);
        assert!(!seen.lock().unwrap().as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_stale_artifact_does_not_count() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        std::fs::write(&artifact, b"old run").unwrap();
        let (backend, _) = ShellBackend::new("exit 0");

        let outcome = executor(backend)
            .execute_and_capture("print(1)", &artifact, Duration::from_secs(5))
            .await;

        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeFailure(
                "Program exited without producing an image".to_string()
            )
        );
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_spawn_failure_still_degrades() {
        struct Missing;

        #[async_trait]
        impl InterpreterBackend for Missing {
            fn name(&self) -> &str {
                "missing"
            }
            fn capabilities(&self) -> BackendCapabilities {
                BackendCapabilities::default()
            }
            fn guest_artifact_path(&self, job: &CaptureJob) -> PathBuf {
                job.artifact_path().to_path_buf()
            }
            fn command(&self, _: &CaptureJob, _: &Path, _: Duration) -> Result<Command> {
                Ok(Command::new("/nonexistent/interpreter"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let outcome = executor(Missing)
            .execute_and_capture("print(1)", &artifact, Duration::from_secs(1))
            .await;

        assert!(matches!(outcome, ExecutionOutcome::RuntimeFailure(_)));
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_job_directory_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("frame.png");
        let (backend, seen) = ShellBackend::new("exit 3");

        let job = CaptureJob::new("", &artifact, Duration::from_secs(1)).unwrap();
        let workdir = job.workdir().to_path_buf();
        executor(backend).execute(job).await;

        assert!(seen.lock().unwrap().as_ref().unwrap().starts_with(&workdir));
        assert!(!workdir.exists());
    }

    #[test]
    fn test_error_excerpt_takes_last_line() {
        let stderr =
            "Traceback (most recent call last):\n  File \"x.py\", line 1\nValueError: bad\n\n";
        assert_eq!(error_excerpt(stderr).unwrap(), "ValueError: bad");
        assert!(error_excerpt("  \n").is_none());

        let long = "x".repeat(ERROR_EXCERPT_CHARS + 50);
        let excerpt = error_excerpt(&long).unwrap();
        assert!(excerpt.starts_with("..."));
        assert_eq!(excerpt.chars().count(), ERROR_EXCERPT_CHARS + 3);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ExecutionOutcome::TimedOut).unwrap();
        assert_eq!(json["kind"], "timed_out");
        let json = serde_json::to_value(ExecutionOutcome::RuntimeFailure("boom".into())).unwrap();
        assert_eq!(json["detail"], "boom");
    }

    // Real interpreter runs; skipped when python3 is not installed.

    fn python_executor() -> Option<SandboxExecutor> {
        let backend = NativeBackend::new(&NativeConfig::default(), 1024).ok()?;
        Some(executor(backend).with_grace(Duration::from_secs(2)))
    }

    #[tokio::test]
    async fn test_python_infinite_loop_times_out() {
        let Some(executor) = python_executor() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("loop.png");

        let started = Instant::now();
        let outcome = executor
            .execute_and_capture("while True:\n    pass\n", &artifact, Duration::from_secs(1))
            .await;

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_python_exception_is_runtime_failure() {
        let Some(executor) = python_executor() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("crash.png");

        let outcome = executor
            .execute_and_capture(
                "raise RuntimeError('generated code exploded')\n",
                &artifact,
                Duration::from_secs(1),
            )
            .await;

        match outcome {
            ExecutionOutcome::RuntimeFailure(message) => {
                assert!(message.contains("generated code exploded"), "{message}");
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_python_plot_produces_artifact() {
        let Some(executor) = python_executor() else {
            return;
        };
        let has_matplotlib = std::process::Command::new("python3")
            .args(["-I", "-c", "import matplotlib"])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !has_matplotlib {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("plot.png");
        let code =
            "import matplotlib.pyplot as plt\nplt.plot([0, 1, 4, 9])\nplt.title('squares')\n";

        let outcome = executor
            .with_grace(Duration::from_secs(20))
            .execute_and_capture(code, &artifact, Duration::from_secs(1))
            .await;

        assert_eq!(outcome, ExecutionOutcome::ArtifactProduced(artifact.clone()));
        assert_readable_image(&artifact);
    }

    #[tokio::test]
    async fn test_python_memory_is_capped() {
        let Some(backend) = NativeBackend::new(&NativeConfig::default(), 256).ok() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("hog.png");

        let outcome = executor(backend)
            .with_grace(Duration::from_secs(5))
            .execute_and_capture(
                "hog = bytearray(1024 * 1024 * 1024)\n",
                &artifact,
                Duration::from_secs(1),
            )
            .await;

        match outcome {
            ExecutionOutcome::RuntimeFailure(message) => {
                assert!(message.contains("MemoryError"), "{message}");
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }
}

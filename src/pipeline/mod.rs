//! Per-job orchestration: validate generated code, capture its final frame
//! and report where the image landed.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::capture::GraphicsLibrary;
use crate::config::types::CodereelConfig;
use crate::error::{CodereelError, Result};
use crate::sandbox::{
    create_backend, generate_job_id, CaptureJob, ExecutionOutcome, SandboxExecutor,
};
use crate::validator::{self, AllowList};

/// How long a generated program may run, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TimeBudget(u64);

impl TimeBudget {
    pub const MIN_SECONDS: u64 = 15;
    pub const MAX_SECONDS: u64 = 60;
    pub const DEFAULT_SECONDS: u64 = 30;

    pub fn from_secs(seconds: u64) -> Result<Self> {
        if !(Self::MIN_SECONDS..=Self::MAX_SECONDS).contains(&seconds) {
            return Err(CodereelError::InvalidTimeBudget {
                seconds,
                min: Self::MIN_SECONDS,
                max: Self::MAX_SECONDS,
            });
        }
        Ok(Self(seconds))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl Default for TimeBudget {
    fn default() -> Self {
        Self(Self::DEFAULT_SECONDS)
    }
}

/// Pull the code out of a model reply.
///
/// Returns the first ```` ```python ```` fenced block, or the whole reply
/// trimmed when there is none.
pub fn extract_code_block(reply: &str) -> &str {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    let fence = FENCE.get_or_init(|| Regex::new(r"(?s)```python\r?\n(.*?)\r?\n```").ok());

    fence
        .as_ref()
        .and_then(|re| re.captures(reply))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| reply.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// The program drew its own frame
    Completed,
    /// A placeholder stands in for the frame
    Degraded,
}

/// Summary of one job, handed back to whoever assembles the video.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
    pub library: GraphicsLibrary,
    pub outcome: ExecutionOutcome,
    pub artifact_path: PathBuf,
    pub elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// Validates and runs generated code, one job per call.
pub struct Pipeline {
    policy: AllowList,
    executor: SandboxExecutor,
    artifact_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        policy: AllowList,
        executor: SandboxExecutor,
        artifact_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            policy,
            executor,
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Build the policy and backend described by `config`.
    pub async fn from_config(config: &CodereelConfig) -> Result<Self> {
        let backend = create_backend(&config.sandbox).await?;
        let capabilities = backend.capabilities();
        info!(backend = backend.name(), capabilities = ?capabilities, "Sandbox ready");
        if !capabilities.network_isolated {
            warn!(backend = backend.name(), "Generated code will run with network access");
        }
        let executor = SandboxExecutor::new(backend, &config.sandbox, &config.placeholder);
        Ok(Self::new(
            AllowList::from_config(&config.validator),
            executor,
            &config.output.artifact_dir,
        ))
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    /// Run one job.
    ///
    /// Rejected code fails with [`CodereelError::InvalidCode`] or
    /// [`CodereelError::UnsafeCode`] and nothing is executed. Past validation
    /// this always returns a report and an image exists at its artifact path.
    pub async fn run(
        &self,
        code: &str,
        library: Option<&str>,
        budget: TimeBudget,
    ) -> Result<JobReport> {
        let started = Instant::now();
        let job_id = generate_job_id();

        if let Err(e) = validator::validate(code, &self.policy).into_result() {
            warn!(job_id = %job_id, error = %e, "Generated code rejected");
            return Err(e);
        }

        let library = GraphicsLibrary::resolve(library, code);
        let artifact_path = self.artifact_dir.join(format!("{}.png", job_id));
        info!(
            job_id = %job_id,
            library = %library,
            artifact = %artifact_path.display(),
            "Job accepted"
        );

        let job = CaptureJob::with_id(&job_id, code, &artifact_path, budget.as_duration());
        let outcome = match job {
            Ok(job) => self.executor.execute(job.with_library(library)).await,
            Err(e) => self
                .executor
                .setup_failed(&artifact_path, &e, budget.as_duration()),
        };

        let (status, message) = match &outcome {
            ExecutionOutcome::ArtifactProduced(_) => {
                (JobStatus::Completed, "Final frame captured".to_string())
            }
            ExecutionOutcome::TimedOut => (
                JobStatus::Degraded,
                format!(
                    "Execution exceeded {}s; placeholder written",
                    budget.as_secs()
                ),
            ),
            ExecutionOutcome::RuntimeFailure(reason) => (
                JobStatus::Degraded,
                format!("No frame produced ({}); placeholder written", reason),
            ),
        };

        Ok(JobReport {
            job_id,
            status,
            message,
            library,
            outcome,
            artifact_path,
            elapsed_ms: started.elapsed().as_millis() as u64,
            created_at: Utc::now(),
        })
    }
}

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

use crate::capture::GraphicsLibrary;
use crate::error::Result;

/// One execution request: the code, where its image must land and how long
/// it may run.
///
/// The job owns a private temporary directory for the duration of the run;
/// dropping the job removes it, whatever happened in between.
#[derive(Debug)]
pub struct CaptureJob {
    id: String,
    code: String,
    library: GraphicsLibrary,
    artifact_path: PathBuf,
    budget: Duration,
    workdir: TempDir,
}

impl CaptureJob {
    /// Create a job with a fresh id; the library is inferred from the code.
    pub fn new(
        code: impl Into<String>,
        artifact_path: impl AsRef<Path>,
        budget: Duration,
    ) -> Result<Self> {
        Self::with_id(generate_job_id(), code, artifact_path, budget)
    }

    pub fn with_id(
        id: impl Into<String>,
        code: impl Into<String>,
        artifact_path: impl AsRef<Path>,
        budget: Duration,
    ) -> Result<Self> {
        let id = id.into();
        let code = code.into();
        let library = GraphicsLibrary::detect(&code);

        let artifact_path = artifact_path.as_ref();
        let artifact_path = if artifact_path.is_absolute() {
            artifact_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(artifact_path)
        };

        let workdir = tempfile::Builder::new()
            .prefix(&format!("codereel_{}_", id))
            .tempdir()?;
        debug!(job_id = %id, workdir = %workdir.path().display(), "Created job directory");

        Ok(Self {
            id,
            code,
            library,
            artifact_path,
            budget,
            workdir,
        })
    }

    /// Override the inferred library, e.g. with concept metadata.
    pub fn with_library(mut self, library: GraphicsLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn library(&self) -> GraphicsLibrary {
        self.library
    }

    /// Absolute host path of the expected artifact.
    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Persist `source` as a uniquely named script inside the job directory.
    ///
    /// The file is deleted when the returned handle drops.
    pub(crate) fn write_script(&self, source: &str) -> Result<NamedTempFile> {
        let mut script = tempfile::Builder::new()
            .prefix("capture_")
            .suffix(".py")
            .tempfile_in(self.workdir())?;
        script.write_all(source.as_bytes())?;
        script.flush()?;
        debug!(job_id = %self.id, script = %script.path().display(), "Wrote capture script");
        Ok(script)
    }
}

/// Short random identifier, unique across concurrent jobs.
pub fn generate_job_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

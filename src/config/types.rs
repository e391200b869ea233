use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::loader::get_data_dir;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodereelConfig {
    pub validator: ValidatorConfig,
    pub sandbox: SandboxConfig,
    pub placeholder: PlaceholderConfig,
    pub output: OutputConfig,
}

/// Import and call policy applied to generated code before it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Module names (or dotted prefixes) generated code may import
    pub allowed_imports: Vec<String>,
    /// Bare function names and `module.function` paths that may not be called
    pub forbidden_calls: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            allowed_imports: [
                "matplotlib",
                "numpy",
                "pygame",
                "turtle",
                "math",
                "random",
                "time",
                "sys",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            forbidden_calls: [
                "exec",
                "eval",
                "compile",
                "open",
                "__import__",
                "subprocess",
                "os.system",
                "os.popen",
                "os.execv",
                "os.execvp",
                "os.spawnl",
                "os.fork",
                "subprocess.Popen",
                "subprocess.run",
                "subprocess.call",
                "subprocess.check_call",
                "subprocess.check_output",
                "subprocess.getoutput",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// The interpreter backend used to run generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Host python3 in isolated mode, in its own process group
    Native,
    /// Throwaway Docker container without networking
    Docker,
    /// Docker when the daemon is reachable, otherwise native
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which backend to use
    pub backend: BackendType,
    /// Seconds added to the time budget to absorb interpreter startup
    pub grace_seconds: u64,
    /// Memory limit in MB (container memory on Docker, address space on native; 0 disables)
    pub memory_limit_mb: u64,
    /// Native backend configuration
    pub native: NativeConfig,
    /// Docker-specific configuration
    pub docker: DockerConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            grace_seconds: 5,
            memory_limit_mb: 1024,
            native: NativeConfig::default(),
            docker: DockerConfig::default(),
        }
    }
}

/// Native backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Python interpreter, resolved through PATH when not absolute
    pub python: String,
    /// Pass the host DISPLAY through instead of starting a private X server
    pub forward_display: bool,
    /// RLIMIT_NPROC for the interpreter (counts every process of the user; 0 disables)
    pub max_processes: u64,
    /// Largest file the script may write, in MB (0 disables)
    pub max_file_size_mb: u64,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            forward_display: false,
            max_processes: 4096,
            max_file_size_mb: 64,
        }
    }
}

/// Docker-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Custom Docker image name (default: codereel-sandbox:latest)
    pub image: Option<String>,
    /// Automatically build the image if it doesn't exist (default: true)
    pub build_image: bool,
    /// Enable networking in the container (default: false)
    pub enable_networking: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: None,
            build_image: true,
            enable_networking: false,
        }
    }
}

/// Look of the image written when a run produces no artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub foreground: [u8; 3],
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            background: [30, 30, 30],
            foreground: [212, 212, 212],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `<job_id>.png` artifacts
    pub artifact_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            artifact_dir: get_data_dir().join("artifacts"),
        }
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodereelError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Time budget must be between {min} and {max} seconds, got {seconds}")]
    InvalidTimeBudget { seconds: u64, min: u64, max: u64 },

    // Validation errors
    #[error("Invalid code: {message}")]
    InvalidCode { message: String },

    #[error("Unsafe code: {}", violations.join(", "))]
    UnsafeCode { violations: Vec<String> },

    // Sandbox errors
    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Execution failed in sandbox: {0}")]
    SandboxExecution(String),

    #[error("Backend '{backend}' not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Image errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CodereelError {
    /// Syntax errors go away by regenerating the code; policy rejections never do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidCode { .. })
    }
}

pub type Result<T> = std::result::Result<T, CodereelError>;

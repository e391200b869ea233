use std::path::{Path, PathBuf};

use crate::config::types::CodereelConfig;
use crate::error::{CodereelError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "codereel", "codereel") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".codereel").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values.
///
/// An explicitly requested file must exist; the default location may be absent.
pub fn load_config(config_path: Option<&Path>) -> Result<CodereelConfig> {
    let path = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(CodereelError::ConfigNotFound {
                    path: path.display().to_string(),
                });
            }
            path.to_path_buf()
        }
        None => get_config_path(),
    };

    if !path.exists() {
        return Ok(CodereelConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_config(&content)
}

/// Parse a TOML configuration document
pub fn parse_config(content: &str) -> Result<CodereelConfig> {
    toml::from_str(content).map_err(|e| CodereelError::TomlParse(e.to_string()))
}

/// Get the data directory for generated artifacts
pub fn get_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "codereel", "codereel") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs_fallback().join(".local").join("share").join("codereel")
    }
}

use tracing::info;

use crate::config::types::{BackendType, SandboxConfig};
use crate::error::{CodereelError, Result};
use crate::sandbox::backends::{daemon_unavailable, DockerBackend, NativeBackend};
use crate::sandbox::traits::{BackendCapabilities, InterpreterBackend};

/// Create an interpreter backend based on the configuration.
///
/// This factory function selects and instantiates the appropriate backend
/// based on the configured backend type and platform availability.
pub async fn create_backend(config: &SandboxConfig) -> Result<Box<dyn InterpreterBackend>> {
    let backend_type = resolve_backend_type(config)?;
    info!(backend = ?backend_type, "Selected interpreter backend");

    match backend_type {
        BackendType::Native => {
            let backend = NativeBackend::new(&config.native, config.memory_limit_mb)?;
            Ok(Box::new(backend))
        }
        BackendType::Docker => {
            let backend =
                DockerBackend::new(config.docker.clone(), config.memory_limit_mb).await?;
            Ok(Box::new(backend))
        }
        BackendType::Auto => Err(CodereelError::SandboxInit(
            "Backend selection did not resolve".to_string(),
        )),
    }
}

/// Resolve the backend type, handling Auto selection.
fn resolve_backend_type(config: &SandboxConfig) -> Result<BackendType> {
    match config.backend {
        BackendType::Auto => {
            // Priority: Docker (stronger isolation) > native interpreter
            if DockerBackend::is_available() {
                return Ok(BackendType::Docker);
            }
            if NativeBackend::is_available(&config.native) {
                return Ok(BackendType::Native);
            }
            Err(CodereelError::BackendNotAvailable {
                backend: "auto".to_string(),
                reason: format!(
                    "Neither Docker nor '{}' is available",
                    config.native.python
                ),
            })
        }
        BackendType::Docker => {
            if !DockerBackend::is_available() {
                return Err(daemon_unavailable());
            }
            Ok(BackendType::Docker)
        }
        BackendType::Native => Ok(BackendType::Native),
    }
}

/// Get information about available backends on this system.
pub fn available_backends(config: &SandboxConfig) -> Vec<BackendInfo> {
    let native = NativeBackend::is_available(&config.native);
    let docker = DockerBackend::is_available();

    vec![
        BackendInfo {
            name: "native",
            available: native,
            description: "Host Python interpreter in isolated mode",
            capabilities: NativeBackend::capabilities_for(config.memory_limit_mb),
            unavailable_reason: if native {
                None
            } else {
                Some("Python interpreter not found on PATH")
            },
        },
        BackendInfo {
            name: "docker",
            available: docker,
            description: "Disposable Docker container without networking",
            capabilities: DockerBackend::capabilities_for(&config.docker),
            unavailable_reason: if docker {
                None
            } else {
                Some("Docker daemon not accessible")
            },
        },
    ]
}

/// Information about an interpreter backend.
pub struct BackendInfo {
    pub name: &'static str,
    pub available: bool,
    pub description: &'static str,
    /// What the backend enforces once created from the same config
    pub capabilities: BackendCapabilities,
    pub unavailable_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::NativeConfig;

    #[test]
    fn test_native_resolves_without_probing() {
        let config = SandboxConfig {
            backend: BackendType::Native,
            ..SandboxConfig::default()
        };
        assert_eq!(resolve_backend_type(&config).unwrap(), BackendType::Native);
    }

    #[test]
    fn test_docker_without_daemon_is_reported() {
        if DockerBackend::is_available() {
            return;
        }
        let config = SandboxConfig {
            backend: BackendType::Docker,
            ..SandboxConfig::default()
        };
        match resolve_backend_type(&config).unwrap_err() {
            CodereelError::BackendNotAvailable { backend, reason } => {
                assert_eq!(backend, "docker");
                assert!(reason.contains("docker info"));
            }
            other => panic!("expected unavailable backend, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_reported() {
        let config = SandboxConfig {
            backend: BackendType::Native,
            native: NativeConfig {
                python: "definitely-not-a-python-binary".to_string(),
                ..NativeConfig::default()
            },
            ..SandboxConfig::default()
        };
        let err = create_backend(&config).await.err().unwrap();
        assert!(matches!(err, CodereelError::BackendNotAvailable { .. }));
    }

    #[test]
    fn test_available_backends_lists_both() {
        let names: Vec<_> = available_backends(&SandboxConfig::default())
            .iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["native", "docker"]);
    }

    #[test]
    fn test_available_backends_report_capabilities() {
        let backends = available_backends(&SandboxConfig::default());
        assert!(!backends[0].capabilities.network_isolated);
        assert!(backends[0].capabilities.memory_limited);
        assert!(backends[1].capabilities.network_isolated);
        assert!(backends[1].capabilities.filesystem_isolated);
    }
}

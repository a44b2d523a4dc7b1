use crate::config::ServiceDescriptor;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tracing::{debug, info};

/// Installs whatever software a service needs.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, service: &ServiceDescriptor) -> Result<()>;
}

/// Runs the descriptor's `install` command through `sh -c`.
#[derive(Debug, Default, Clone)]
pub struct CommandInstaller;

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, service: &ServiceDescriptor) -> Result<()> {
        let Some(install_cmd) = service.install.as_deref() else {
            debug!(service = %service.name, "No install command configured");
            return Ok(());
        };

        info!(service = %service.name, command = %install_cmd, "Running install command");
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(install_cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                Error::Install(format!(
                    "Failed to execute install command for '{}': {}",
                    service.name, e
                ))
            })?;

        if !status.success() {
            return Err(Error::Install(format!(
                "Install command for '{}' exited with {}",
                service.name, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(install: Option<&str>) -> ServiceDescriptor {
        ServiceDescriptor {
            name: "gobby".into(),
            systemd_unit: "gobby.service".into(),
            description: None,
            default_target_port: 6523,
            virtual_port: None,
            publish_before_starting: false,
            install: install.map(str::to_string),
            options: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_no_command_is_noop() {
        CommandInstaller.install(&descriptor(None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_successful_command() {
        CommandInstaller
            .install(&descriptor(Some("true")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_command() {
        let err = CommandInstaller
            .install(&descriptor(Some("exit 7")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Install(_)));
        assert!(err.to_string().contains("gobby"));
    }
}

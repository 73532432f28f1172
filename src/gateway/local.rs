//! Gateway that runs provisioning work on the local host
//!
//! Used when the requested device is the host the server runs on, e.g.
//! when exercising a flow against a locally mounted image.

use async_trait::async_trait;
use provision_shared::ProvisionError;
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::DutGateway;

#[derive(Debug, Default)]
pub struct LocalGateway;

impl LocalGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DutGateway for LocalGateway {
    async fn run_command(&self, command: &str, args: &[&str]) -> Result<String, ProvisionError> {
        debug!("local: run {} {}", command, args.join(" "));
        let output = Command::new(command).args(args).output().await?;
        if !output.status.success() {
            return Err(ProvisionError::RemoteExecution {
                exit_status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, ProvisionError> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn cache_and_resolve(&self, url: &str) -> Result<String, ProvisionError> {
        // Artifacts are already addressable from the local host.
        Ok(url.to_string())
    }

    async fn create_directories(&self, paths: &[&str]) -> Result<(), ProvisionError> {
        for path in paths {
            tokio::fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<(), ProvisionError> {
        match tokio::fs::remove_dir_all(path).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => Ok(other?),
        }
    }

    async fn restart(&self) -> Result<(), ProvisionError> {
        // Rebooting the host would take the server down with it.
        warn!("local: restart suppressed");
        Ok(())
    }

    fn target(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let gateway = LocalGateway::new();
        let out = gateway
            .run_command("echo", &["-n", "hello"])
            .await
            .expect("echo failed");
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit_is_error() {
        let gateway = LocalGateway::new();
        let err = gateway
            .run_command("sh", &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            ProvisionError::RemoteExecution {
                exit_status,
                stderr,
            } => {
                assert_eq!(exit_status, 3);
                assert!(stderr.contains("oops"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_directory_is_ok() {
        let gateway = LocalGateway::new();
        gateway
            .delete_directory("/tmp/provision-test-does-not-exist")
            .await
            .expect("delete of missing directory should succeed");
    }

    #[tokio::test]
    async fn test_path_exists() {
        let gateway = LocalGateway::new();
        assert!(gateway.path_exists("/").await.expect("probe failed"));
        assert!(!gateway
            .path_exists("/tmp/provision-test-does-not-exist")
            .await
            .expect("probe failed"));
    }
}

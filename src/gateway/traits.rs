//! Gateway trait abstraction for pluggable execution backends

use async_trait::async_trait;
use provision_shared::ProvisionError;

/// Uniform interface every provisioning command uses to act on a DUT.
///
/// A gateway is created fresh for each install request and is never
/// shared across concurrent workflow runs.
#[async_trait]
pub trait DutGateway: Send + Sync {
    /// Run a command on the device and return captured stdout.
    /// A non-zero exit status is an error carrying the captured stderr.
    async fn run_command(&self, command: &str, args: &[&str]) -> Result<String, ProvisionError>;

    /// Check whether a path exists on the device. Absence is a valid
    /// `false`, not an error.
    async fn path_exists(&self, path: &str) -> Result<bool, ProvisionError>;

    /// Stage a remote artifact for the device and return a URL the
    /// device can fetch it from.
    async fn cache_and_resolve(&self, url: &str) -> Result<String, ProvisionError>;

    /// Create directories (and missing parents) on the device. Idempotent.
    async fn create_directories(&self, paths: &[&str]) -> Result<(), ProvisionError>;

    /// Delete a directory tree on the device. Deleting a missing
    /// directory succeeds.
    async fn delete_directory(&self, path: &str) -> Result<(), ProvisionError>;

    /// Reboot the device and wait until it is reachable again, or no-op
    /// when reboot suppression is configured.
    async fn restart(&self) -> Result<(), ProvisionError>;

    /// Human-readable name of the gateway target
    fn target(&self) -> &str;
}

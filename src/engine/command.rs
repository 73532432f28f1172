//! Reversible command abstraction

use async_trait::async_trait;
use provision_shared::{InstallStatus, ProvisionError};

/// One atomic, independently reversible unit of provisioning work.
///
/// `execute` must be side-effect-complete or side-effect-free on
/// return. `revert` must be idempotent and tolerate the resource
/// already being absent, so it is safe to call during an unwind of a
/// partially executed phase.
#[async_trait]
pub trait ProvisionCommand: Send + Sync {
    /// Short name used in logs and failure messages
    fn name(&self) -> &'static str;

    async fn execute(&self) -> Result<(), ProvisionError>;

    /// Undo a successful `execute`. Default: nothing to undo.
    async fn revert(&self) -> Result<(), ProvisionError> {
        Ok(())
    }

    /// Human-readable description attached to a failure of this command
    fn failure_reason(&self) -> &'static str;

    /// Classification reported when this command fails
    fn status(&self) -> InstallStatus;
}

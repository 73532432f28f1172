//! Provisioning error taxonomy

use thiserror::Error;

use crate::operation::InstallStatus;

/// Errors surfaced by gateways and provisioning commands
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("remote execution failed (exit {exit_status}): {stderr}")]
    RemoteExecution { exit_status: i32, stderr: String },

    #[error("device unreachable: {0}")]
    DutUnreachable(String),

    #[error("artifact cache: {0}")]
    Cache(String),

    #[error("verification failed: {0}")]
    Verify(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Default fine-grained classification for this failure.
    pub fn status(&self) -> InstallStatus {
        match self {
            ProvisionError::InvalidRequest(_) => InstallStatus::InvalidRequest,
            ProvisionError::RemoteExecution { .. } => InstallStatus::InstallFailed,
            ProvisionError::DutUnreachable(_) => InstallStatus::DutUnreachable,
            ProvisionError::Cache(_) => InstallStatus::CacheFailed,
            ProvisionError::Verify(_) => InstallStatus::VerifyFailed,
            ProvisionError::Cancelled => InstallStatus::Cancelled,
            ProvisionError::Protocol(_) | ProvisionError::Io(_) => InstallStatus::ServerError,
        }
    }
}

//! Long-running operation model
//!
//! Every install request is tracked as an operation with a write-once
//! terminal result. Callers poll the operation by name until `done`.

use serde::{Deserialize, Serialize};

/// Coarse caller-visible outcome of a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    InvalidRequest,
    ServerError,
}

/// Fine-grained diagnostic classification carried in the result payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallStatus {
    Ok,
    InvalidRequest,
    DownloadFailed,
    InstallFailed,
    VerifyFailed,
    DutUnreachable,
    CacheFailed,
    ProvisionTimedOut,
    Cancelled,
    RevertFailed,
    ServerError,
}

impl InstallStatus {
    /// Collapse to the coarse status reported to callers.
    pub fn response_status(self) -> ResponseStatus {
        match self {
            InstallStatus::Ok => ResponseStatus::Ok,
            InstallStatus::InvalidRequest => ResponseStatus::InvalidRequest,
            _ => ResponseStatus::ServerError,
        }
    }
}

/// Terminal result of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: ResponseStatus,
    pub reason: InstallStatus,
    pub message: String,
}

impl OperationResult {
    /// Result for a run that completed every phase.
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            reason: InstallStatus::Ok,
            message: String::new(),
        }
    }

    /// Result for a failed run; the coarse status is derived from the
    /// fine-grained classification.
    pub fn failure(reason: InstallStatus, message: impl Into<String>) -> Self {
        Self {
            status: reason.response_status(),
            reason,
            message: message.into(),
        }
    }
}

/// A pollable workflow-run handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Opaque unique name, `operations/<uuid>`
    pub name: String,
    pub done: bool,
    #[serde(default)]
    pub result: Option<OperationResult>,
}

impl Operation {
    /// Create a fresh, not-done operation with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result: None,
        }
    }
}

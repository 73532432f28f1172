//! Wire protocol for the install RPC surface and the DUT agent
//!
//! Both wires carry length-prefixed JSON frames (see [`crate::codec`]).
//! The agent protocol is consumed, not served, by the provision server:
//! the gateway sends `AgentRequest` frames to the command-execution
//! agent running next to the DUT.

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::operation::Operation;

/// A package to install on a mobile DUT
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
    pub name: String,
    pub url: String,
}

/// What to install, per product variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum InstallTarget {
    /// Full OS image written to the inactive root partition
    OsImage {
        image_url: String,
        #[serde(default)]
        verify_version: Option<String>,
    },
    /// Versioned browser component installed under the component root
    BrowserComponent {
        image_url: String,
        #[serde(default)]
        override_version: Option<String>,
        #[serde(default)]
        override_install_path: Option<String>,
    },
    /// Mobile packages, optionally preceded by an OS flash
    MobilePackages {
        #[serde(default)]
        os_image_url: Option<String>,
        packages: Vec<PackageRef>,
    },
}

/// Behavioral flags attached to an install request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallFlags {
    /// Never reboot the device, even where the flow normally would.
    /// Used when repeatedly testing against one leased device.
    #[serde(default)]
    pub prevent_reboot: bool,
}

/// Immutable input to one workflow run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    /// Device identity: `local` or the DUT agent address (`host:port`)
    pub device: String,
    #[serde(default)]
    pub flags: InstallFlags,
    pub target: InstallTarget,
}

impl InstallRequest {
    /// Fail fast on requests that cannot resolve a device or a payload.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.device.trim().is_empty() {
            return Err(ProvisionError::InvalidRequest(
                "missing device identity".into(),
            ));
        }
        match &self.target {
            InstallTarget::OsImage { image_url, .. } => {
                if image_url.is_empty() {
                    return Err(ProvisionError::InvalidRequest("missing OS image URL".into()));
                }
            }
            InstallTarget::BrowserComponent { image_url, .. } => {
                if image_url.is_empty() {
                    return Err(ProvisionError::InvalidRequest(
                        "missing component image URL".into(),
                    ));
                }
            }
            InstallTarget::MobilePackages {
                os_image_url,
                packages,
            } => {
                if packages.is_empty() && os_image_url.is_none() {
                    return Err(ProvisionError::InvalidRequest(
                        "request installs neither an OS image nor any package".into(),
                    ));
                }
                if packages.iter().any(|p| p.name.is_empty() || p.url.is_empty()) {
                    return Err(ProvisionError::InvalidRequest(
                        "package entries need both a name and a URL".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Requests accepted by the provision server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Install(InstallRequest),
    GetOperation { name: String },
    CancelOperation { name: String },
}

/// Responses returned by the provision server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Operation(Operation),
    Error { message: String },
}

/// Result of one remote command execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Requests sent to the DUT command-execution agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    /// Run a command on the device with captured stdout/stderr
    Exec { command: String, args: Vec<String> },
    /// Reboot the device
    Restart,
    /// Stage an artifact for the device; answered with `CacheStarted`
    Cache { url: String },
    /// Poll a pending cache operation
    CacheStatus { name: String },
}

/// Responses from the DUT command-execution agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResponse {
    Exec(ExecResult),
    Ok,
    CacheStarted {
        name: String,
    },
    Cache {
        done: bool,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

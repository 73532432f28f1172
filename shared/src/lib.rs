//! Shared types for the DUT provisioning service
//!
//! This crate provides the install RPC types, the consumed DUT-agent
//! protocol, the long-running operation model, and the framing codec
//! used by the server and client binaries.

pub mod codec;
pub mod error;
pub mod operation;
pub mod protocol;

pub use error::ProvisionError;
pub use operation::{InstallStatus, Operation, OperationResult, ResponseStatus};
pub use protocol::*;

/// Timing bounds shared by the service and its gateways
pub mod timing {
    use std::time::Duration;

    /// Timeout for establishing a connection to a DUT agent
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Timeout for a single agent request/response exchange
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(60);

    /// How long a device may take to come back after a reboot
    pub const RESTART_TIMEOUT: Duration = Duration::from_secs(300);

    /// Reachability poll interval while waiting out a reboot
    pub const RESTART_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Bounded wait for an asynchronous cache-staging operation
    pub const CACHE_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

    /// Poll interval for a pending cache operation
    pub const CACHE_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Overall deadline for one provisioning run
    pub const PROVISION_TIMEOUT: Duration = Duration::from_secs(3600);
}

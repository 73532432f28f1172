//! Per-variant provisioning flows
//!
//! Each variant owns a service context (gateway handle plus state
//! resolved while the workflow runs) and assembles its phase chain
//! from reversible commands. One context per run, never shared.

mod browser;
mod mobile;
mod os;

use std::sync::Arc;

use provision_shared::{InstallRequest, InstallTarget};

use crate::engine::Workflow;
use crate::gateway::DutGateway;

pub use browser::BrowserService;
pub use mobile::MobileService;
pub use os::OsService;

/// Build the workflow for a validated request.
pub fn workflow_for(request: &InstallRequest, gateway: Arc<dyn DutGateway>) -> Workflow {
    match &request.target {
        InstallTarget::OsImage {
            image_url,
            verify_version,
        } => OsService::new(gateway, image_url.clone(), verify_version.clone()).workflow(),
        InstallTarget::BrowserComponent {
            image_url,
            override_version,
            override_install_path,
        } => BrowserService::new(
            gateway,
            image_url.clone(),
            override_version.clone(),
            override_install_path.clone(),
        )
        .workflow(),
        InstallTarget::MobilePackages {
            os_image_url,
            packages,
        } => MobileService::new(gateway, os_image_url.clone(), packages.clone()).workflow(),
    }
}

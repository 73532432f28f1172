//! Provisioning front-end
//!
//! Accepts install requests, allocates operation handles, and drives
//! each workflow on its own task. Callers get the not-done handle back
//! immediately and poll (or wait on) the registry; the run always
//! completes its operation, whatever happens to the workflow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use provision_shared::timing;
use provision_shared::{InstallRequest, InstallStatus, Operation, OperationResult};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::gateway::{self, DutGateway};
use crate::registry::OperationRegistry;
use crate::service;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Suppress every reboot, regardless of per-request flags
    pub no_reboot: bool,
    /// Overall deadline for one provisioning run
    pub provision_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            no_reboot: false,
            provision_timeout: timing::PROVISION_TIMEOUT,
        }
    }
}

pub struct ProvisionFrontEnd {
    registry: Arc<OperationRegistry>,
    config: ServerConfig,
    cancellations: RwLock<HashMap<String, watch::Sender<bool>>>,
}

impl ProvisionFrontEnd {
    pub fn new(registry: Arc<OperationRegistry>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            cancellations: RwLock::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Accept an install request and return its operation handle.
    ///
    /// Validation failures complete the handle before returning it, so
    /// a caller always gets a pollable operation and never an error.
    pub async fn install(self: Arc<Self>, request: InstallRequest) -> Operation {
        let suppress_reboot = self.config.no_reboot || request.flags.prevent_reboot;
        let gateway = gateway::for_device(&request.device, suppress_reboot);
        self.install_with_gateway(request, gateway).await
    }

    pub(crate) async fn install_with_gateway(
        self: Arc<Self>,
        request: InstallRequest,
        gateway: Arc<dyn DutGateway>,
    ) -> Operation {
        let op = self.registry.new_operation().await;

        if let Err(err) = request.validate() {
            warn!("rejected install request: {}", err);
            self.complete(
                &op.name,
                OperationResult::failure(InstallStatus::InvalidRequest, err.to_string()),
            )
            .await;
            return self.registry.get(&op.name).await.unwrap_or(op);
        }

        info!("{}: installing on {}", op.name, request.device);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancellations
            .write()
            .await
            .insert(op.name.clone(), cancel_tx);

        let workflow = service::workflow_for(&request, gateway);
        let deadline = self.config.provision_timeout;
        let frontend = self.clone();
        let name = op.name.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(deadline, workflow.run(cancel_rx)).await {
                Ok(Ok(())) => OperationResult::ok(),
                Ok(Err(failure)) => {
                    warn!("{}: workflow failed: {}", name, failure.message);
                    OperationResult::failure(failure.status, failure.message)
                }
                Err(_) => OperationResult::failure(
                    InstallStatus::ProvisionTimedOut,
                    format!("provisioning did not finish within {:?}", deadline),
                ),
            };
            frontend.complete(&name, result).await;
            frontend.cancellations.write().await.remove(&name);
        });

        op
    }

    /// Signal cancellation to a running workflow. Returns whether a
    /// run was still listening.
    pub async fn cancel(&self, name: &str) -> bool {
        let cancellations = self.cancellations.read().await;
        match cancellations.get(name) {
            Some(tx) => {
                info!("{}: cancellation requested", name);
                tx.send(true).is_ok()
            }
            None => false,
        }
    }

    pub async fn get(&self, name: &str) -> Option<Operation> {
        self.registry.get(name).await
    }

    async fn complete(&self, name: &str, result: OperationResult) {
        if let Err(err) = self.registry.set_result(name, result).await {
            error!("{}: failed to record result: {}", name, err);
        }
    }
}

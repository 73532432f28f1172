//! Full OS image install flow
//!
//! Writes a staged OS image to the inactive root partition, points the
//! bootloader at it, reboots, then verifies the reported OS version.

use std::sync::Arc;

use async_trait::async_trait;
use provision_shared::{InstallStatus, ProvisionError};
use tokio::sync::RwLock;

use crate::engine::{Phase, ProvisionCommand, Workflow};
use crate::gateway::DutGateway;

const STAGING_DIR: &str = "/var/tmp/provision/os";
const INACTIVE_ROOT_PARTITION: &str = "/dev/disk/by-partlabel/root-b";
const ACTIVE_BOOT_TARGET: &str = "root-a";
const NEXT_BOOT_TARGET: &str = "root-b";
const OS_RELEASE_FILE: &str = "/etc/os-release";

/// Services that hold the root device busy while an image is written
const SYSTEM_SERVICES: &[&str] = &["ui", "update-engine"];

#[derive(Default)]
struct Resolved {
    staged_url: Option<String>,
}

/// Context for one OS image run
pub struct OsService {
    gateway: Arc<dyn DutGateway>,
    image_url: String,
    verify_version: Option<String>,
    resolved: RwLock<Resolved>,
}

impl OsService {
    pub fn new(
        gateway: Arc<dyn DutGateway>,
        image_url: String,
        verify_version: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            image_url,
            verify_version,
            resolved: RwLock::new(Resolved::default()),
        })
    }

    pub fn workflow(self: Arc<Self>) -> Workflow {
        let init = self.clone();
        let install = self.clone();
        let post = self;
        Workflow::builder()
            .phase(move || {
                Phase::new(
                    "os-init",
                    vec![
                        Box::new(StopServices { svc: init.clone() }),
                        Box::new(CreateStaging { svc: init.clone() }),
                        Box::new(StageImage { svc: init.clone() }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "os-install-image",
                    vec![
                        Box::new(WriteRootPartition {
                            svc: install.clone(),
                        }),
                        Box::new(SetNextBoot {
                            svc: install.clone(),
                        }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "os-post-install",
                    vec![
                        Box::new(Reboot { svc: post.clone() }),
                        Box::new(VerifyVersion { svc: post.clone() }),
                        Box::new(CleanupStaging { svc: post.clone() }),
                    ],
                )
            })
            .build()
    }

    async fn staged_url(&self) -> Result<String, ProvisionError> {
        self.resolved
            .read()
            .await
            .staged_url
            .clone()
            .ok_or_else(|| ProvisionError::Protocol("OS image staged out of order".into()))
    }
}

struct StopServices {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for StopServices {
    fn name(&self) -> &'static str {
        "stop-services"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        for service in SYSTEM_SERVICES {
            self.svc
                .gateway
                .run_command("systemctl", &["stop", service])
                .await?;
        }
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        for service in SYSTEM_SERVICES.iter().rev() {
            self.svc
                .gateway
                .run_command("systemctl", &["start", service])
                .await?;
        }
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to stop system services"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct CreateStaging {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for CreateStaging {
    fn name(&self) -> &'static str {
        "create-staging"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc.gateway.create_directories(&[STAGING_DIR]).await
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        self.svc.gateway.delete_directory(STAGING_DIR).await
    }

    fn failure_reason(&self) -> &'static str {
        "failed to create staging directory"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct StageImage {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for StageImage {
    fn name(&self) -> &'static str {
        "stage-image"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let url = self.svc.gateway.cache_and_resolve(&self.svc.image_url).await?;
        self.svc.resolved.write().await.staged_url = Some(url);
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to stage OS image"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DownloadFailed
    }
}

struct WriteRootPartition {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for WriteRootPartition {
    fn name(&self) -> &'static str {
        "write-root-partition"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let staged = self.svc.staged_url().await?;
        let pipeline = format!(
            r#"curl -sSf "$1" | dd of={} bs=4M conv=fsync"#,
            INACTIVE_ROOT_PARTITION
        );
        self.svc
            .gateway
            .run_command("sh", &["-c", &pipeline, "_", &staged])
            .await?;
        Ok(())
    }

    /// Invalidate the half-written partition so the bootloader never
    /// picks it up.
    async fn revert(&self) -> Result<(), ProvisionError> {
        let wipe = format!(
            "dd if=/dev/zero of={} bs=1M count=1 conv=fsync",
            INACTIVE_ROOT_PARTITION
        );
        self.svc.gateway.run_command("sh", &["-c", &wipe]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to write OS image to the inactive root partition"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct SetNextBoot {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for SetNextBoot {
    fn name(&self) -> &'static str {
        "set-next-boot"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .run_command("bootctl", &["set-next", NEXT_BOOT_TARGET])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .run_command("bootctl", &["set-next", ACTIVE_BOOT_TARGET])
            .await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to set the next boot target"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct Reboot {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for Reboot {
    fn name(&self) -> &'static str {
        "reboot"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc.gateway.restart().await
    }

    fn failure_reason(&self) -> &'static str {
        "device did not come back after reboot"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DutUnreachable
    }
}

struct VerifyVersion {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for VerifyVersion {
    fn name(&self) -> &'static str {
        "verify-version"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let expected = match &self.svc.verify_version {
            Some(expected) => expected,
            None => return Ok(()),
        };
        let release = self
            .svc
            .gateway
            .run_command("cat", &[OS_RELEASE_FILE])
            .await?;
        if !release.contains(expected.as_str()) {
            return Err(ProvisionError::Verify(format!(
                "device does not report version {}",
                expected
            )));
        }
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "OS version verification failed"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::VerifyFailed
    }
}

struct CleanupStaging {
    svc: Arc<OsService>,
}

#[async_trait]
impl ProvisionCommand for CleanupStaging {
    fn name(&self) -> &'static str {
        "cleanup-staging"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc.gateway.delete_directory(STAGING_DIR).await
    }

    fn failure_reason(&self) -> &'static str {
        "failed to clean staging directory"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

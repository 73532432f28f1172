//! Mobile package install flow
//!
//! Optionally flashes an OS image, then stages and installs a set of
//! packages through the device package manager. Package staging and
//! installation are one command per package so a mid-set failure
//! unwinds exactly the packages that made it on.

use std::sync::Arc;

use async_trait::async_trait;
use provision_shared::{InstallStatus, PackageRef, ProvisionError};
use tokio::sync::RwLock;

use crate::engine::{Phase, ProvisionCommand, Workflow};
use crate::gateway::DutGateway;

const STAGING_DIR: &str = "/data/local/tmp/provision";
const OS_PARTITION: &str = "/dev/block/by-name/os";
const PROVISION_MARKER: &str = "/data/local/tmp/provisioned";
const BOOT_COMPLETED_PROP: &str = "sys.boot_completed";

#[derive(Default)]
struct Resolved {
    staged_os: Option<String>,
}

/// Context for one mobile packages run
pub struct MobileService {
    gateway: Arc<dyn DutGateway>,
    os_image_url: Option<String>,
    packages: Vec<PackageRef>,
    resolved: RwLock<Resolved>,
}

impl MobileService {
    pub fn new(
        gateway: Arc<dyn DutGateway>,
        os_image_url: Option<String>,
        packages: Vec<PackageRef>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            os_image_url,
            packages,
            resolved: RwLock::new(Resolved::default()),
        })
    }

    pub fn workflow(self: Arc<Self>) -> Workflow {
        let prepare = self.clone();
        let os_fetch = self.clone();
        let os_install = self.clone();
        let pkg_fetch = self.clone();
        let pkg_install = self.clone();
        let post = self;
        Workflow::builder()
            .phase(move || {
                Phase::new(
                    "mobile-prepare",
                    vec![
                        Box::new(CheckDeviceReady {
                            svc: prepare.clone(),
                        }),
                        Box::new(CreateStaging {
                            svc: prepare.clone(),
                        }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "mobile-os-fetch",
                    vec![Box::new(StageOsImage {
                        svc: os_fetch.clone(),
                    })],
                )
            })
            .phase(move || {
                Phase::new(
                    "mobile-os-install",
                    vec![
                        Box::new(FlashOsImage {
                            svc: os_install.clone(),
                        }),
                        Box::new(RebootAfterFlash {
                            svc: os_install.clone(),
                        }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "mobile-package-fetch",
                    pkg_fetch
                        .packages
                        .iter()
                        .map(|package| {
                            Box::new(StagePackage {
                                svc: pkg_fetch.clone(),
                                package: package.clone(),
                            }) as Box<dyn ProvisionCommand>
                        })
                        .collect(),
                )
            })
            .phase(move || {
                Phase::new(
                    "mobile-package-install",
                    pkg_install
                        .packages
                        .iter()
                        .map(|package| {
                            Box::new(InstallPackage {
                                svc: pkg_install.clone(),
                                package: package.clone(),
                            }) as Box<dyn ProvisionCommand>
                        })
                        .collect(),
                )
            })
            .phase(move || {
                Phase::new(
                    "mobile-post-install",
                    vec![
                        Box::new(RecordProvisionMarker { svc: post.clone() }),
                        Box::new(CleanupStaging { svc: post.clone() }),
                    ],
                )
            })
            .build()
    }

    fn package_path(package: &PackageRef) -> String {
        format!("{}/{}.apk", STAGING_DIR, package.name)
    }
}

struct CheckDeviceReady {
    svc: Arc<MobileService>,
}

#[async_trait]
impl ProvisionCommand for CheckDeviceReady {
    fn name(&self) -> &'static str {
        "check-device-ready"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let value = self
            .svc
            .gateway
            .run_command("getprop", &[BOOT_COMPLETED_PROP])
            .await?;
        if value.trim() != "1" {
            return Err(ProvisionError::DutUnreachable(
                "device has not finished booting".into(),
            ));
        }
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "device is not ready for provisioning"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DutUnreachable
    }
}

struct CreateStaging {
    svc: Arc<MobileService>,
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

/// No-op when the request carries no OS image.
struct StageOsImage {
    svc: Arc<MobileService>,
}

#[async_trait]
impl ProvisionCommand for StageOsImage {
    fn name(&self) -> &'static str {
        "stage-os-image"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let url = match &self.svc.os_image_url {
            Some(url) => url,
            None => return Ok(()),
        };
        let staged = self.svc.gateway.cache_and_resolve(url).await?;
        self.svc.resolved.write().await.staged_os = Some(staged);
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to stage OS image"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DownloadFailed
    }
}

struct FlashOsImage {
    svc: Arc<MobileService>,
}

#[async_trait]
impl ProvisionCommand for FlashOsImage {
    fn name(&self) -> &'static str {
        "flash-os-image"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let staged = match self.svc.resolved.read().await.staged_os.clone() {
            Some(staged) => staged,
            None => return Ok(()),
        };
        let pipeline = format!(r#"curl -sSf "$1" | dd of={} bs=4M conv=fsync"#, OS_PARTITION);
        self.svc
            .gateway
            .run_command("sh", &["-c", &pipeline, "_", &staged])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        if self.svc.resolved.read().await.staged_os.is_none() {
            return Ok(());
        }
        let wipe = format!("dd if=/dev/zero of={} bs=1M count=1 conv=fsync", OS_PARTITION);
        self.svc.gateway.run_command("sh", &["-c", &wipe]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to flash OS image"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct RebootAfterFlash {
    svc: Arc<MobileService>,
}

#[async_trait]
impl ProvisionCommand for RebootAfterFlash {
    fn name(&self) -> &'static str {
        "reboot-after-flash"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        if self.svc.resolved.read().await.staged_os.is_none() {
            return Ok(());
        }
        self.svc.gateway.restart().await
    }

    fn failure_reason(&self) -> &'static str {
        "device did not come back after the OS flash"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DutUnreachable
    }
}

struct StagePackage {
    svc: Arc<MobileService>,
    package: PackageRef,
}

#[async_trait]
impl ProvisionCommand for StagePackage {
    fn name(&self) -> &'static str {
        "stage-package"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let staged = self.svc.gateway.cache_and_resolve(&self.package.url).await?;
        let dest = MobileService::package_path(&self.package);
        self.svc
            .gateway
            .run_command("curl", &["-sSf", "-o", &dest, &staged])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        let dest = MobileService::package_path(&self.package);
        self.svc.gateway.run_command("rm", &["-f", &dest]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to stage package"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DownloadFailed
    }
}

struct InstallPackage {
    svc: Arc<MobileService>,
    package: PackageRef,
}

#[async_trait]
impl ProvisionCommand for InstallPackage {
    fn name(&self) -> &'static str {
        "install-package"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let path = MobileService::package_path(&self.package);
        self.svc
            .gateway
            .run_command("pm", &["install", "-r", &path])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .run_command("pm", &["uninstall", &self.package.name])
            .await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to install package"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct RecordProvisionMarker {
    svc: Arc<MobileService>,
}

#[async_trait]
impl ProvisionCommand for RecordProvisionMarker {
    fn name(&self) -> &'static str {
        "record-provision-marker"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .run_command("sh", &["-c", r#"date > "$1""#, "_", PROVISION_MARKER])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .run_command("rm", &["-f", PROVISION_MARKER])
            .await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to record the provision marker"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct CleanupStaging {
    svc: Arc<MobileService>,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use tokio::sync::watch;

    fn packages() -> Vec<PackageRef> {
        vec![
            PackageRef {
                name: "gms".into(),
                url: "gs://packages/gms.apk".into(),
            },
            PackageRef {
                name: "webview".into(),
                url: "gs://packages/webview.apk".into(),
            },
        ]
    }

    fn service(
        gateway: &Arc<FakeGateway>,
        os_image_url: Option<&str>,
        packages: Vec<PackageRef>,
    ) -> Arc<MobileService> {
        MobileService::new(gateway.clone(), os_image_url.map(Into::into), packages)
    }

    #[tokio::test]
    async fn test_full_install_succeeds() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.respond("getprop", "1\n");

        let (_tx, rx) = watch::channel(false);
        service(&gateway, Some("gs://images/mobile/os.img"), packages())
            .workflow()
            .run(rx)
            .await
            .expect("install should succeed");

        let calls = gateway.calls();
        assert_eq!(calls[0], "run getprop sys.boot_completed");
        assert!(calls.contains(&"cache gs://images/mobile/os.img".into()));
        assert!(calls.contains(&"restart".into()));
        assert!(calls.contains(&"cache gs://packages/gms.apk".into()));
        assert!(calls.contains(&"run pm install -r /data/local/tmp/provision/gms.apk".into()));
        assert!(calls.contains(&"run pm install -r /data/local/tmp/provision/webview.apk".into()));
        assert_eq!(
            calls.last().map(String::as_str),
            Some("rmdir /data/local/tmp/provision")
        );
    }

    #[tokio::test]
    async fn test_package_only_request_skips_os_phases() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.respond("getprop", "1");

        let (_tx, rx) = watch::channel(false);
        service(&gateway, None, packages())
            .workflow()
            .run(rx)
            .await
            .expect("install should succeed");

        let calls = gateway.calls();
        assert!(!calls.contains(&"restart".into()));
        assert!(!calls.iter().any(|c| c.contains("dd of=")));
    }

    #[tokio::test]
    async fn test_unready_device_stops_before_any_change() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.respond("getprop", "0");

        let (_tx, rx) = watch::channel(false);
        let failure = service(&gateway, None, packages())
            .workflow()
            .run(rx)
            .await
            .unwrap_err();

        assert_eq!(failure.status, InstallStatus::DutUnreachable);
        assert_eq!(gateway.calls(), vec!["run getprop sys.boot_completed"]);
    }

    #[tokio::test]
    async fn test_failed_reboot_invalidates_flashed_image() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.respond("getprop", "1");
        gateway.fail_with(
            "restart",
            ProvisionError::DutUnreachable("dut-1 never came back".into()),
        );

        let (_tx, rx) = watch::channel(false);
        let failure = service(&gateway, Some("gs://images/mobile/os.img"), vec![])
            .workflow()
            .run(rx)
            .await
            .unwrap_err();

        assert_eq!(failure.status, InstallStatus::DutUnreachable);
        let calls = gateway.calls();
        assert!(calls
            .iter()
            .any(|c| c.starts_with("run sh -c dd if=/dev/zero")));
    }

    #[tokio::test]
    async fn test_package_install_failure_never_reverts_the_failing_install() {
        let gateway = Arc::new(FakeGateway::new());
        gateway.respond("getprop", "1");
        gateway.fail_with(
            "pm",
            ProvisionError::RemoteExecution {
                exit_status: 1,
                stderr: "INSTALL_FAILED_INVALID_APK".into(),
            },
        );

        let (_tx, rx) = watch::channel(false);
        let failure = service(&gateway, None, packages())
            .workflow()
            .run(rx)
            .await
            .unwrap_err();

        assert_eq!(failure.status, InstallStatus::InstallFailed);
        assert!(!gateway.calls().iter().any(|c| c.contains("pm uninstall")));
    }
}

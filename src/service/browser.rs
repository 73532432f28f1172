//! Browser component install flow
//!
//! Installs a versioned browser component under the component root:
//! stage the compressed image, resolve the component version from its
//! metadata (or an override), copy it into a versioned directory,
//! publish the manifest and latest-version marker, then verify.

use std::sync::Arc;

use async_trait::async_trait;
use provision_shared::{InstallStatus, ProvisionError};
use serde_json::json;
use tokio::sync::RwLock;

use crate::engine::{Phase, ProvisionCommand, Workflow};
use crate::gateway::DutGateway;

const DEFAULT_COMPONENT_ROOT: &str = "/var/lib/components/browser";
const STAGING_DIR: &str = "/var/tmp/provision/browser";
const IMAGE_FILE: &str = "image.squash";
const MANIFEST_FILE: &str = "manifest.json";
const LATEST_VERSION_FILE: &str = "latest-version";

/// Writes `$1` to the file at `$2`; both travel as positional shell
/// arguments so quoting in the payload cannot break the script.
const WRITE_FILE_SCRIPT: &str = r#"printf '%s\n' "$1" > "$2""#;

#[derive(Default)]
struct Resolved {
    staged_url: Option<String>,
    version: Option<String>,
}

/// Context for one browser component run
pub struct BrowserService {
    gateway: Arc<dyn DutGateway>,
    image_url: String,
    override_version: Option<String>,
    component_root: String,
    resolved: RwLock<Resolved>,
}

impl BrowserService {
    pub fn new(
        gateway: Arc<dyn DutGateway>,
        image_url: String,
        override_version: Option<String>,
        override_install_path: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            image_url,
            override_version,
            component_root: override_install_path
                .unwrap_or_else(|| DEFAULT_COMPONENT_ROOT.into()),
            resolved: RwLock::new(Resolved::default()),
        })
    }

    pub fn workflow(self: Arc<Self>) -> Workflow {
        let init = self.clone();
        let install = self.clone();
        let verify = self;
        Workflow::builder()
            .phase(move || {
                Phase::new(
                    "browser-init",
                    vec![
                        Box::new(CreateDirs { svc: init.clone() }),
                        Box::new(StageImage { svc: init.clone() }),
                        Box::new(ReadMetadata { svc: init.clone() }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "browser-install",
                    vec![
                        Box::new(CreateVersionDir {
                            svc: install.clone(),
                        }),
                        Box::new(FetchImage {
                            svc: install.clone(),
                        }),
                        Box::new(WriteManifest {
                            svc: install.clone(),
                        }),
                        Box::new(PublishVersion {
                            svc: install.clone(),
                        }),
                    ],
                )
            })
            .phase(move || {
                Phase::new(
                    "browser-verify",
                    vec![
                        Box::new(VerifyComponent {
                            svc: verify.clone(),
                        }),
                        Box::new(CleanupStaging {
                            svc: verify.clone(),
                        }),
                    ],
                )
            })
            .build()
    }

    /// Metadata lives next to the image under the same prefix.
    fn metadata_url(&self) -> String {
        match self.image_url.rfind('/') {
            Some(idx) => format!("{}/metadata.json", &self.image_url[..idx]),
            None => "metadata.json".into(),
        }
    }

    async fn staged_url(&self) -> Result<String, ProvisionError> {
        self.resolved
            .read()
            .await
            .staged_url
            .clone()
            .ok_or_else(|| ProvisionError::Protocol("component image staged out of order".into()))
    }

    async fn version(&self) -> Result<String, ProvisionError> {
        self.resolved
            .read()
            .await
            .version
            .clone()
            .ok_or_else(|| ProvisionError::Protocol("component version resolved out of order".into()))
    }

    fn version_path(&self, version: &str) -> String {
        format!("{}/{}", self.component_root, version)
    }

    fn image_path(&self, version: &str) -> String {
        format!("{}/{}/{}", self.component_root, version, IMAGE_FILE)
    }

    fn manifest_path(&self, version: &str) -> String {
        format!("{}/{}/{}", self.component_root, version, MANIFEST_FILE)
    }

    fn latest_version_path(&self) -> String {
        format!("{}/{}", self.component_root, LATEST_VERSION_FILE)
    }
}

struct CreateDirs {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for CreateDirs {
    fn name(&self) -> &'static str {
        "create-dirs"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        self.svc
            .gateway
            .create_directories(&[&self.svc.component_root, STAGING_DIR])
            .await
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        self.svc.gateway.delete_directory(STAGING_DIR).await
    }

    fn failure_reason(&self) -> &'static str {
        "failed to create component directories"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct StageImage {
    svc: Arc<BrowserService>,
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
        "failed to stage component image"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::DownloadFailed
    }
}

struct ReadMetadata {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for ReadMetadata {
    fn name(&self) -> &'static str {
        "read-metadata"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        if let Some(version) = &self.svc.override_version {
            self.svc.resolved.write().await.version = Some(version.clone());
            return Ok(());
        }

        let metadata_url = self
            .svc
            .gateway
            .cache_and_resolve(&self.svc.metadata_url())
            .await?;
        let raw = self
            .svc
            .gateway
            .run_command("curl", &["-sSf", &metadata_url])
            .await?;

        // Metadata shape: {"content": {"version": "..."}}
        let metadata: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| ProvisionError::Verify(format!("component metadata unreadable: {}", err)))?;
        let version = metadata["content"]["version"]
            .as_str()
            .ok_or_else(|| ProvisionError::Verify("component metadata has no version".into()))?;

        self.svc.resolved.write().await.version = Some(version.into());
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to resolve component version"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct CreateVersionDir {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for CreateVersionDir {
    fn name(&self) -> &'static str {
        "create-version-dir"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        self.svc
            .gateway
            .create_directories(&[&self.svc.version_path(&version)])
            .await
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        self.svc
            .gateway
            .delete_directory(&self.svc.version_path(&version))
            .await
    }

    fn failure_reason(&self) -> &'static str {
        "failed to create versioned component directory"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct FetchImage {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for FetchImage {
    fn name(&self) -> &'static str {
        "copy-image"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let staged = self.svc.staged_url().await?;
        let version = self.svc.version().await?;
        let path = self.svc.image_path(&version);
        self.svc
            .gateway
            .run_command("curl", &["-sSf", "-o", &path, &staged])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        let path = self.svc.image_path(&version);
        self.svc.gateway.run_command("rm", &["-f", &path]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to copy component image"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct WriteManifest {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for WriteManifest {
    fn name(&self) -> &'static str {
        "write-manifest"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        let manifest = json!({
            "version": version,
            "image": IMAGE_FILE,
        })
        .to_string();
        let path = self.svc.manifest_path(&version);
        self.svc
            .gateway
            .run_command("sh", &["-c", WRITE_FILE_SCRIPT, "_", &manifest, &path])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        let path = self.svc.manifest_path(&version);
        self.svc.gateway.run_command("rm", &["-f", &path]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to write component manifest"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct PublishVersion {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for PublishVersion {
    fn name(&self) -> &'static str {
        "publish-version"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        let path = self.svc.latest_version_path();
        self.svc
            .gateway
            .run_command("sh", &["-c", WRITE_FILE_SCRIPT, "_", &version, &path])
            .await?;
        Ok(())
    }

    async fn revert(&self) -> Result<(), ProvisionError> {
        let path = self.svc.latest_version_path();
        self.svc.gateway.run_command("rm", &["-f", &path]).await?;
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "failed to publish component version"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::InstallFailed
    }
}

struct VerifyComponent {
    svc: Arc<BrowserService>,
}

#[async_trait]
impl ProvisionCommand for VerifyComponent {
    fn name(&self) -> &'static str {
        "verify-component"
    }

    async fn execute(&self) -> Result<(), ProvisionError> {
        let version = self.svc.version().await?;
        for path in [
            self.svc.image_path(&version),
            self.svc.manifest_path(&version),
        ] {
            if !self.svc.gateway.path_exists(&path).await? {
                return Err(ProvisionError::Verify(format!(
                    "{} missing after install",
                    path
                )));
            }
        }
        Ok(())
    }

    fn failure_reason(&self) -> &'static str {
        "component verification failed"
    }

    fn status(&self) -> InstallStatus {
        InstallStatus::VerifyFailed
    }
}

struct CleanupStaging {
    svc: Arc<BrowserService>,
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

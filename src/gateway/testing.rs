//! Scripted gateway fake shared by engine, flow, and front-end tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use provision_shared::ProvisionError;

use super::traits::DutGateway;

/// Records every gateway call and plays back scripted results.
///
/// Failures are keyed by the command name (or `cache` / `mkdir` /
/// `rmdir` / `restart` for the non-exec operations) and are consumed on
/// first use, so a scripted failure fires exactly once.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<String>>,
    stdout: Mutex<HashMap<String, String>>,
    fail: Mutex<HashMap<String, ProvisionError>>,
    exists: Mutex<HashMap<String, bool>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, stdout: &str) {
        self.stdout
            .lock()
            .expect("stdout lock")
            .insert(command.into(), stdout.into());
    }

    pub fn fail_with(&self, key: &str, err: ProvisionError) {
        self.fail.lock().expect("fail lock").insert(key.into(), err);
    }

    pub fn set_exists(&self, path: &str, exists: bool) {
        self.exists
            .lock()
            .expect("exists lock")
            .insert(path.into(), exists);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn take_failure(&self, key: &str) -> Option<ProvisionError> {
        self.fail.lock().expect("fail lock").remove(key)
    }
}

#[async_trait]
impl DutGateway for FakeGateway {
    async fn run_command(&self, command: &str, args: &[&str]) -> Result<String, ProvisionError> {
        self.record(format!("run {} {}", command, args.join(" ")));
        if let Some(err) = self.take_failure(command) {
            return Err(err);
        }
        Ok(self
            .stdout
            .lock()
            .expect("stdout lock")
            .get(command)
            .cloned()
            .unwrap_or_default())
    }

    async fn path_exists(&self, path: &str) -> Result<bool, ProvisionError> {
        self.record(format!("exists {}", path));
        Ok(*self
            .exists
            .lock()
            .expect("exists lock")
            .get(path)
            .unwrap_or(&true))
    }

    async fn cache_and_resolve(&self, url: &str) -> Result<String, ProvisionError> {
        self.record(format!("cache {}", url));
        if let Some(err) = self.take_failure("cache") {
            return Err(err);
        }
        Ok(format!("http://dut-cache/{}", url.trim_start_matches("gs://")))
    }

    async fn create_directories(&self, paths: &[&str]) -> Result<(), ProvisionError> {
        self.record(format!("mkdir {}", paths.join(" ")));
        match self.take_failure("mkdir") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<(), ProvisionError> {
        self.record(format!("rmdir {}", path));
        match self.take_failure("rmdir") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn restart(&self) -> Result<(), ProvisionError> {
        self.record("restart".into());
        match self.take_failure("restart") {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn target(&self) -> &str {
        "fake-dut"
    }
}

//! Workflow phases: ordered reversible commands with rollback

use provision_shared::{InstallStatus, ProvisionError};
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::command::ProvisionCommand;

/// Terminal failure of a workflow run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowFailure {
    pub status: InstallStatus,
    pub message: String,
}

/// A named, ordered group of commands; one stage of a workflow run.
///
/// Created once per run, at the point its predecessor completes, and
/// never reused.
pub struct Phase {
    name: &'static str,
    commands: Vec<Box<dyn ProvisionCommand>>,
}

impl Phase {
    pub fn new(name: &'static str, commands: Vec<Box<dyn ProvisionCommand>>) -> Self {
        Self { name, commands }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the commands strictly in declared order.
    ///
    /// On the first failure, commands that already succeeded are
    /// reverted in strict reverse order before the failure is
    /// surfaced; the failing command itself is never reverted. A
    /// failed revert leaves the device in unknown state and escalates
    /// over the original classification.
    pub async fn run(&self, cancel: &mut watch::Receiver<bool>) -> Result<(), WorkflowFailure> {
        for (idx, command) in self.commands.iter().enumerate() {
            info!("{}: running {}", self.name, command.name());

            let outcome = tokio::select! {
                biased;
                _ = cancelled(cancel) => Err(ProvisionError::Cancelled),
                result = command.execute() => result,
            };

            if let Err(err) = outcome {
                warn!("{}: {} failed: {}", self.name, command.name(), err);
                self.unwind(idx, command.as_ref(), err).await?;
            }
        }
        Ok(())
    }

    async fn unwind(
        &self,
        failed_idx: usize,
        failed: &dyn ProvisionCommand,
        err: ProvisionError,
    ) -> Result<(), WorkflowFailure> {
        for done in self.commands[..failed_idx].iter().rev() {
            info!("{}: reverting {}", self.name, done.name());
            if let Err(revert_err) = done.revert().await {
                error!(
                    "{}: revert of {} failed: {}",
                    self.name,
                    done.name(),
                    revert_err
                );
                return Err(WorkflowFailure {
                    status: InstallStatus::RevertFailed,
                    message: format!(
                        "revert of {} failed while handling {} failure ({}): {}",
                        done.name(),
                        failed.name(),
                        err,
                        revert_err
                    ),
                });
            }
        }

        // An unreachable device or a cancellation outranks the
        // command's own classification.
        let status = match &err {
            ProvisionError::DutUnreachable(_) | ProvisionError::Cancelled => err.status(),
            _ => failed.status(),
        };
        Err(WorkflowFailure {
            status,
            message: format!("{}: {}: {}", failed.name(), failed.failure_reason(), err),
        })
    }
}

/// Resolves when cancellation is requested; pends forever otherwise.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone: cancellation can no longer arrive.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    struct RecordingCommand {
        name: &'static str,
        log: Log,
        fail_execute: Option<fn() -> ProvisionError>,
        fail_revert: bool,
    }

    impl RecordingCommand {
        fn ok(name: &'static str, log: &Log) -> Box<Self> {
            Box::new(Self {
                name,
                log: log.clone(),
                fail_execute: None,
                fail_revert: false,
            })
        }

        fn failing(name: &'static str, log: &Log, err: fn() -> ProvisionError) -> Box<Self> {
            Box::new(Self {
                name,
                log: log.clone(),
                fail_execute: Some(err),
                fail_revert: false,
            })
        }

        fn bad_revert(name: &'static str, log: &Log) -> Box<Self> {
            Box::new(Self {
                name,
                log: log.clone(),
                fail_execute: None,
                fail_revert: true,
            })
        }
    }

    #[async_trait]
    impl ProvisionCommand for RecordingCommand {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self) -> Result<(), ProvisionError> {
            self.log
                .lock()
                .expect("log lock")
                .push(format!("execute {}", self.name));
            match self.fail_execute {
                Some(err) => Err(err()),
                None => Ok(()),
            }
        }

        async fn revert(&self) -> Result<(), ProvisionError> {
            self.log
                .lock()
                .expect("log lock")
                .push(format!("revert {}", self.name));
            if self.fail_revert {
                return Err(ProvisionError::RemoteExecution {
                    exit_status: 1,
                    stderr: "revert blew up".into(),
                });
            }
            Ok(())
        }

        fn failure_reason(&self) -> &'static str {
            "failed to copy file"
        }

        fn status(&self) -> InstallStatus {
            InstallStatus::InstallFailed
        }
    }

    /// Command that never finishes executing, for cancellation tests.
    struct StuckCommand {
        log: Log,
    }

    #[async_trait]
    impl ProvisionCommand for StuckCommand {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn execute(&self) -> Result<(), ProvisionError> {
            self.log
                .lock()
                .expect("log lock")
                .push("execute stuck".into());
            std::future::pending::<()>().await;
            Ok(())
        }

        fn failure_reason(&self) -> &'static str {
            "never finishes"
        }

        fn status(&self) -> InstallStatus {
            InstallStatus::InstallFailed
        }
    }

    fn live_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_all_commands_run_in_order() {
        let log: Log = Default::default();
        let phase = Phase::new(
            "install",
            vec![
                RecordingCommand::ok("mkdir", &log),
                RecordingCommand::ok("copy-file", &log),
                RecordingCommand::ok("write-manifest", &log),
            ],
        );

        let (_tx, mut rx) = live_cancel();
        phase.run(&mut rx).await.expect("phase should succeed");

        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["execute mkdir", "execute copy-file", "execute write-manifest"]
        );
    }

    #[tokio::test]
    async fn test_failure_reverts_prior_commands_in_reverse_order() {
        let log: Log = Default::default();
        let phase = Phase::new(
            "install",
            vec![
                RecordingCommand::ok("mkdir", &log),
                RecordingCommand::ok("stage", &log),
                RecordingCommand::failing("copy-file", &log, || {
                    ProvisionError::DutUnreachable("dut-1 dropped".into())
                }),
                RecordingCommand::ok("write-manifest", &log),
            ],
        );

        let (_tx, mut rx) = live_cancel();
        let failure = phase.run(&mut rx).await.unwrap_err();

        // Reverts run in strict reverse order; the failing command is
        // never reverted and later commands never execute.
        assert_eq!(
            *log.lock().expect("log lock"),
            vec![
                "execute mkdir",
                "execute stage",
                "execute copy-file",
                "revert stage",
                "revert mkdir",
            ]
        );
        assert_eq!(failure.status, InstallStatus::DutUnreachable);
        assert!(failure.message.contains("copy-file"));
        assert!(failure.message.contains("failed to copy file"));
    }

    #[tokio::test]
    async fn test_command_classification_used_for_plain_failures() {
        let log: Log = Default::default();
        let phase = Phase::new(
            "install",
            vec![RecordingCommand::failing("copy-file", &log, || {
                ProvisionError::RemoteExecution {
                    exit_status: 1,
                    stderr: "cp: no space".into(),
                }
            })],
        );

        let (_tx, mut rx) = live_cancel();
        let failure = phase.run(&mut rx).await.unwrap_err();
        assert_eq!(failure.status, InstallStatus::InstallFailed);
    }

    #[tokio::test]
    async fn test_revert_failure_escalates() {
        let log: Log = Default::default();
        let phase = Phase::new(
            "install",
            vec![
                RecordingCommand::bad_revert("mkdir", &log),
                RecordingCommand::failing("copy-file", &log, || {
                    ProvisionError::DutUnreachable("dut-1 dropped".into())
                }),
            ],
        );

        let (_tx, mut rx) = live_cancel();
        let failure = phase.run(&mut rx).await.unwrap_err();

        // The original classification is superseded: device state is
        // unknown after a failed unwind.
        assert_eq!(failure.status, InstallStatus::RevertFailed);
        assert!(failure.message.contains("mkdir"));
        assert!(failure.message.contains("copy-file"));
    }

    #[tokio::test]
    async fn test_revert_of_unexecuted_command_is_safe() {
        let log: Log = Default::default();
        let command = RecordingCommand::ok("mkdir", &log);
        command
            .revert()
            .await
            .expect("revert of never-executed command should succeed");
    }

    #[tokio::test]
    async fn test_cancellation_reverts_executed_commands() {
        let log: Log = Default::default();
        let phase = Phase::new(
            "install",
            vec![
                RecordingCommand::ok("mkdir", &log),
                Box::new(StuckCommand { log: log.clone() }),
            ],
        );

        let (tx, rx) = live_cancel();
        let run = tokio::spawn(async move {
            let mut rx = rx;
            phase.run(&mut rx).await
        });

        // Let the phase reach the stuck command, then cancel.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tx.send(true).expect("cancel send");

        let failure = run.await.expect("join failed").unwrap_err();
        assert_eq!(failure.status, InstallStatus::Cancelled);
        assert_eq!(
            *log.lock().expect("log lock"),
            vec!["execute mkdir", "execute stuck", "revert mkdir"]
        );
    }
}

//! Long-running operation registry
//!
//! The registry is the only state shared by concurrent workflow runs.
//! Every install request allocates an operation here; the front-end
//! completes it exactly once and callers poll it by name.

use std::collections::HashMap;
use std::time::Duration;

use provision_shared::{Operation, OperationResult};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown operation {0}")]
    UnknownOperation(String),

    #[error("operation {0} is already done")]
    AlreadyDone(String),
}

struct OperationEntry {
    op: Operation,
    done_tx: watch::Sender<bool>,
}

/// Tracks all operations of this server instance. Safe to share
/// across runs; all mutation goes through the inner lock.
#[derive(Default)]
pub struct OperationRegistry {
    operations: RwLock<HashMap<String, OperationEntry>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, not-done operation with a unique name.
    pub async fn new_operation(&self) -> Operation {
        let name = format!("operations/{}", Uuid::new_v4());
        let op = Operation::new(name.clone());
        let (done_tx, _) = watch::channel(false);
        let entry = OperationEntry {
            op: op.clone(),
            done_tx,
        };

        let mut operations = self.operations.write().await;
        operations.insert(name, entry);
        op
    }

    /// Record the terminal result. Write-once: completing an operation
    /// twice, or an unknown one, is an error.
    pub async fn set_result(
        &self,
        name: &str,
        result: OperationResult,
    ) -> Result<(), RegistryError> {
        let mut operations = self.operations.write().await;
        let entry = operations
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownOperation(name.into()))?;
        if entry.op.done {
            return Err(RegistryError::AlreadyDone(name.into()));
        }
        entry.op.result = Some(result);
        entry.op.done = true;
        let _ = entry.done_tx.send(true);
        debug!("completed {}", name);
        Ok(())
    }

    /// Non-blocking snapshot of an operation.
    pub async fn get(&self, name: &str) -> Option<Operation> {
        let operations = self.operations.read().await;
        operations.get(name).map(|e| e.op.clone())
    }

    /// Wait until an operation is done or the timeout elapses, then
    /// return its current snapshot.
    pub async fn wait(&self, name: &str, timeout: Duration) -> Option<Operation> {
        let mut done_rx = {
            let operations = self.operations.read().await;
            operations.get(name)?.done_tx.subscribe()
        };

        let _ = tokio::time::timeout(timeout, async {
            while !*done_rx.borrow() {
                if done_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        self.get(name).await
    }

    /// Drop all tracked operations. Called at server shutdown.
    pub async fn close(&self) {
        let mut operations = self.operations.write().await;
        operations.clear();
    }

    /// Number of tracked operations
    pub async fn count(&self) -> usize {
        self.operations.read().await.len()
    }
}

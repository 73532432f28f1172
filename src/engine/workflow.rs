//! A workflow: a forward-linked chain of lazily built phases

use tokio::sync::watch;
use tracing::info;

use super::phase::{Phase, WorkflowFailure};

type PhaseBuilder = Box<dyn FnOnce() -> Phase + Send>;

/// One provisioning workflow, assembled by a variant flow.
///
/// Phases are held as constructors and built only when their
/// predecessor has completed, so a builder observes every context
/// update made by earlier phases.
pub struct Workflow {
    phases: Vec<PhaseBuilder>,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder { phases: Vec::new() }
    }

    /// Drive every phase in order to the terminal state.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) -> Result<(), WorkflowFailure> {
        for build in self.phases {
            let phase = build();
            info!("entering phase {}", phase.name());
            phase.run(&mut cancel).await?;
        }
        Ok(())
    }
}

/// Builder collecting the ordered phase constructors of one variant
pub struct WorkflowBuilder {
    phases: Vec<PhaseBuilder>,
}

impl WorkflowBuilder {
    pub fn phase<F>(mut self, build: F) -> Self
    where
        F: FnOnce() -> Phase + Send + 'static,
    {
        self.phases.push(Box::new(build));
        self
    }

    pub fn build(self) -> Workflow {
        Workflow {
            phases: self.phases,
        }
    }
}

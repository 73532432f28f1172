//! Provisioning workflow engine
//!
//! This module handles:
//! - The reversible command abstraction (execute/revert)
//! - Phase execution with reverse-order rollback on failure
//! - Chaining phases into a workflow driven to a terminal state
//! - Cancellation threaded through every running command

mod command;
mod phase;
mod workflow;

pub use command::ProvisionCommand;
pub use phase::{Phase, WorkflowFailure};
pub use workflow::{Workflow, WorkflowBuilder};

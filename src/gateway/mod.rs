//! Remote execution gateways for driving work on a DUT

mod agent;
mod local;
mod traits;

pub use agent::AgentGateway;
pub use local::LocalGateway;
pub use traits::DutGateway;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

/// Resolve the gateway for a requested device. `local` runs on this
/// host; anything else is treated as a DUT agent address.
pub fn for_device(device: &str, no_reboot: bool) -> Arc<dyn DutGateway> {
    if device == "local" {
        Arc::new(LocalGateway::new())
    } else {
        Arc::new(AgentGateway::new(device, no_reboot))
    }
}

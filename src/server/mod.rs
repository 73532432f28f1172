//! Provisioning front-end and TCP listener

mod frontend;
mod listener;

pub use frontend::{ProvisionFrontEnd, ServerConfig};
pub use listener::serve;

mod engine;
mod gateway;
mod registry;
mod server;
mod service;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use registry::OperationRegistry;
use server::{ProvisionFrontEnd, ServerConfig};

use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// DUT provisioning service
#[derive(Debug, Parser)]
#[command(name = "provision-server")]
struct Args {
    /// Address to serve the install RPC surface on
    #[arg(long, default_value = "0.0.0.0:7070")]
    listen: String,

    /// Suppress every device reboot, regardless of per-request flags
    #[arg(long)]
    no_reboot: bool,

    /// Overall deadline for one provisioning run, in seconds
    #[arg(long, default_value_t = 3600)]
    provision_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    info!("provision server starting on {}", args.listen);

    let registry = Arc::new(OperationRegistry::new());
    let frontend = ProvisionFrontEnd::new(
        registry.clone(),
        ServerConfig {
            no_reboot: args.no_reboot,
            provision_timeout: Duration::from_secs(args.provision_timeout_secs),
        },
    );

    tokio::select! {
        result = server::serve(&args.listen, frontend) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            registry.close().await;
            Ok(())
        }
    }
}

//! fleet CLI
//!
//! Scaffolds application manifests, manages the port ledger and edits ingress
//! routing in a GitOps repository.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_cli::Cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

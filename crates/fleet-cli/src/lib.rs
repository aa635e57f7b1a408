//! fleet CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// fleet - scaffold and operate a GitOps manifest repository
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to a fleet config file (defaults to ./.fleet/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold the manifests of an application
    #[command(name = "app:create")]
    AppCreate(commands::app::CreateArgs),

    /// Add or remove an ingress rule for a service
    #[command(name = "ingress")]
    Ingress(commands::ingress::IngressArgs),

    /// Seal an env file into a secret for an application
    #[command(name = "secret:create")]
    SecretCreate(commands::secret::SecretArgs),

    /// Bootstrap infrastructure from a setup file
    #[command(name = "setup:new")]
    SetupNew(commands::setup::SetupArgs),

    /// List port allocations
    #[command(name = "port:list")]
    PortList,

    /// Allocate the next free port for an application
    #[command(name = "port:allocate")]
    PortAllocate(commands::ports::AllocateArgs),

    /// Release a port held by an application
    #[command(name = "port:release")]
    PortRelease(commands::ports::ReleaseArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = config::load_config(self.config.as_deref())?;
        match self.command {
            Commands::AppCreate(args) => commands::app::run(args, &config).await,
            Commands::Ingress(args) => commands::ingress::run(args, &config),
            Commands::SecretCreate(args) => commands::secret::run(args, &config).await,
            Commands::SetupNew(args) => commands::setup::run(args).await,
            Commands::PortList => commands::ports::list(&config),
            Commands::PortAllocate(args) => commands::ports::allocate(args, &config),
            Commands::PortRelease(args) => commands::ports::release(args, &config),
        }
    }
}

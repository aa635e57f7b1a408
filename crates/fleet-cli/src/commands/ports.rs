//! `port:*`: operate the port ledger directly

use clap::Args;
use tracing::info;

use crate::config::FleetConfig;
use crate::Result;

#[derive(Args, Debug)]
pub struct AllocateArgs {
    /// Application name
    #[arg(short = 'a', long)]
    pub app: String,
}

#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Application name
    #[arg(short = 'a', long)]
    pub app: String,
    /// Port to release
    #[arg(short = 'p', long)]
    pub port: u16,
}

pub fn list(config: &FleetConfig) -> Result<()> {
    let entries = config.registry().entries()?;
    println!("{:<30} {:<6}", "APP", "PORT");
    for entry in entries {
        println!("{:<30} {:<6}", entry.owner, entry.port);
    }
    Ok(())
}

pub fn allocate(args: AllocateArgs, config: &FleetConfig) -> Result<()> {
    let port = config.registry().allocate(&args.app)?;
    println!("{port}");
    Ok(())
}

pub fn release(args: ReleaseArgs, config: &FleetConfig) -> Result<()> {
    if config.registry().release(&args.app, args.port)? {
        info!(app = %args.app, port = args.port, "Port released");
    } else {
        info!(app = %args.app, port = args.port, "Port was not allocated to app");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> FleetConfig {
        FleetConfig {
            ports_file: dir.path().join("ports.txt"),
            ..FleetConfig::default()
        }
    }

    #[test]
    fn test_allocate_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        allocate(AllocateArgs { app: "api".into() }, &config).unwrap();
        allocate(AllocateArgs { app: "web".into() }, &config).unwrap();
        release(
            ReleaseArgs {
                app: "api".into(),
                port: 8000,
            },
            &config,
        )
        .unwrap();

        let ledger = std::fs::read_to_string(dir.path().join("ports.txt")).unwrap();
        assert_eq!(ledger, "web: 8001\n");
        list(&config).unwrap();
    }

    #[test]
    fn test_list_without_ledger() {
        let dir = tempfile::tempdir().unwrap();
        list(&config_in(&dir)).unwrap();
    }
}

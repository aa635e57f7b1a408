//! `setup:new`: bootstrap infrastructure from a setup file
//!
//! The setup file lists clusters and their namespaces. The default
//! cluster/namespace pair is flattened into environment variables and handed
//! to the functions of a bash setup script, one after another.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use super::{describe, run_streamed};
use crate::{Error, Result};

/// Script functions run for a new setup, in order
pub const SETUP_STEPS: &[&str] = &["hello", "install_flux", "bootstrap", "pull_git"];

#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Path to the setup file
    #[arg(short = 'f', long)]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub script_path: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub default_cluster: String,
    #[serde(default)]
    pub default_namespace: String,
    #[serde(default)]
    pub clusters: Vec<ClusterSetup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterSetup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespaces: Vec<NamespaceSetup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamespaceSetup {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub config: NamespaceOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceOptions {
    #[serde(default)]
    pub read_write_key: bool,
    #[serde(default)]
    pub components_extra: Vec<String>,
}

/// The default cluster/namespace pair with the top-level settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedSetup {
    pub owner: String,
    pub kind: String,
    pub provider: String,
    pub team: String,
    pub cluster_name: String,
    pub namespace: String,
    pub repository: String,
    pub branch: String,
    pub read_write_key: bool,
    pub components_extra: Vec<String>,
}

impl FlattenedSetup {
    /// Variables exported to the setup script
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Owner", self.owner.clone()),
            ("Kind", self.kind.clone()),
            ("Provider", self.provider.clone()),
            ("Team", self.team.clone()),
            ("ClusterName", self.cluster_name.clone()),
            ("Namespace", self.namespace.clone()),
            ("Repository", self.repository.clone()),
            ("Branch", self.branch.clone()),
            ("ReadWriteKey", self.read_write_key.to_string()),
            ("ComponentsExtra", self.components_extra.join(",")),
        ]
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} is required")));
    }
    Ok(())
}

impl SetupConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::file_not_found(path),
            _ => Error::Io(e),
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Validate the file and flatten the default cluster/namespace pair.
    pub fn flatten(&self) -> Result<FlattenedSetup> {
        require(&self.owner, "owner")?;
        require(&self.default_cluster, "defaultCluster")?;
        require(&self.default_namespace, "defaultNamespace")?;
        require(&self.kind, "kind")?;
        require(&self.provider, "provider")?;
        require(&self.script_path, "scriptPath")?;

        let mut seen = HashSet::new();
        let mut default = None;
        for cluster in &self.clusters {
            require(&cluster.name, "cluster name")?;
            for ns in &cluster.namespaces {
                require(&ns.namespace, "namespace")?;
                require(&ns.repository, "repository")?;
                require(&ns.branch, "branch")?;

                if !seen.insert((cluster.name.as_str(), ns.namespace.as_str())) {
                    return Err(Error::validation(format!(
                        "duplicate cluster and namespace: {}/{}",
                        cluster.name, ns.namespace
                    )));
                }
                if cluster.name == self.default_cluster && ns.namespace == self.default_namespace {
                    default = Some((cluster, ns));
                }
            }
        }

        let (cluster, ns) = default.ok_or_else(|| {
            Error::validation(format!(
                "default cluster/namespace {}/{} is not defined",
                self.default_cluster, self.default_namespace
            ))
        })?;

        Ok(FlattenedSetup {
            owner: self.owner.clone(),
            kind: self.kind.clone(),
            provider: self.provider.clone(),
            team: self.team.clone(),
            cluster_name: cluster.name.clone(),
            namespace: ns.namespace.clone(),
            repository: ns.repository.clone(),
            branch: ns.branch.clone(),
            read_write_key: ns.config.read_write_key,
            components_extra: ns.config.components_extra.clone(),
        })
    }
}

pub async fn run(args: SetupArgs) -> Result<()> {
    let config = SetupConfig::load(&args.file)?;
    let flat = config.flatten()?;
    run_steps(Path::new(&config.script_path), &flat, SETUP_STEPS).await?;
    info!(cluster = %flat.cluster_name, namespace = %flat.namespace, "Infrastructure successfully setup");
    Ok(())
}

/// Run each script function with the flattened setup in its environment;
/// stops at the first failure.
async fn run_steps(script: &Path, setup: &FlattenedSetup, steps: &[&str]) -> Result<()> {
    if !script.is_file() {
        return Err(Error::file_not_found(script));
    }
    let vars = setup.env_vars();
    for &step in steps {
        let label = describe("bash", [script.as_os_str(), OsStr::new(step)]);
        info!(step, "Running {label}");

        let mut command = Command::new("bash");
        command
            .arg(script)
            .arg(step)
            .envs(vars.iter().map(|(k, v)| (*k, v.as_str())));
        run_streamed(command, &label).await?;
    }
    Ok(())
}

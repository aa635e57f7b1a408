//! fleet configuration stored at `./.fleet/config.json`.
//!
//! Resolution chain (highest priority first):
//! 1. Explicit `--config` flag
//! 2. `FLEET_CONFIG` environment variable
//! 3. `./.fleet/config.json` in the working directory
//! 4. Built-in defaults
//!
//! A path named by the flag or the environment variable must exist; the
//! working-directory file is optional. Relative paths inside the config are
//! resolved against the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fleet_common::ingress::RuleMatch;
use fleet_common::ports::{DEFAULT_LEDGER_FILE, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
use fleet_common::{
    app::DEFAULT_IMAGE_HOST, IngressReconciler, ManifestRenderer, PortRegistry,
    DEFAULT_APPS_PATH, DEFAULT_BASE_PATH, DEFAULT_ROOT_DOMAIN,
};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".fleet";
const CONFIG_FILE_NAME: &str = "config.json";
const FLEET_CONFIG_ENV: &str = "FLEET_CONFIG";
const DEFAULT_SEALING_CERT: &str = "./pub-sealed-secrets.pem";

/// Inclusive port range handed out by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: DEFAULT_MIN_PORT,
            end: DEFAULT_MAX_PORT,
        }
    }
}

/// Repository layout and tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Root of Base resources.
    pub base_path: PathBuf,
    /// Root of per-environment resources; environments live at `<apps_path>/<env>`.
    pub apps_path: PathBuf,
    /// Registry host for default image references.
    pub image_host: String,
    /// Domain ingress hosts are built under.
    pub root_domain: String,
    /// Port ledger file.
    pub ports_file: PathBuf,
    /// Ports handed out by `port:allocate`.
    pub port_range: PortRange,
    /// Public certificate passed to kubeseal.
    pub sealing_cert: PathBuf,
    /// How existing ingress rules are matched.
    pub rule_match: RuleMatch,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from(DEFAULT_BASE_PATH),
            apps_path: PathBuf::from(DEFAULT_APPS_PATH),
            image_host: DEFAULT_IMAGE_HOST.to_string(),
            root_domain: DEFAULT_ROOT_DOMAIN.to_string(),
            ports_file: PathBuf::from(DEFAULT_LEDGER_FILE),
            port_range: PortRange::default(),
            sealing_cert: PathBuf::from(DEFAULT_SEALING_CERT),
            rule_match: RuleMatch::default(),
        }
    }
}

impl FleetConfig {
    /// Directory holding one environment's resources.
    pub fn env_dir(&self, env: &str) -> PathBuf {
        self.apps_path.join(env)
    }

    /// Directory holding one application's resources in an environment.
    pub fn app_dir(&self, env: &str, app: &str) -> PathBuf {
        self.env_dir(env).join(app)
    }

    pub fn registry(&self) -> PortRegistry {
        PortRegistry::with_range(&self.ports_file, self.port_range.start..=self.port_range.end)
    }

    pub fn renderer(&self) -> ManifestRenderer {
        ManifestRenderer::new(&self.base_path, self.registry())
    }

    pub fn reconciler(&self) -> IngressReconciler {
        IngressReconciler::new(&self.root_domain).with_rule_match(self.rule_match)
    }

    fn validate(&self) -> Result<()> {
        if self.port_range.start == 0 || self.port_range.start > self.port_range.end {
            return Err(Error::validation(format!(
                "invalid port range {}-{}",
                self.port_range.start, self.port_range.end
            )));
        }
        if self.root_domain.trim().is_empty() {
            return Err(Error::validation("root_domain must not be empty"));
        }
        Ok(())
    }
}

/// Pick the config file to load, if any.
///
/// Returns the path and whether it must exist.
pub fn resolve_config_path(explicit: Option<&Path>, env_value: Option<String>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    if let Some(path) = env_value.filter(|p| !p.is_empty()) {
        return (PathBuf::from(path), true);
    }
    (Path::new(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME), false)
}

/// Load config following the resolution chain.
pub fn load_config(explicit: Option<&Path>) -> Result<FleetConfig> {
    let (path, required) = resolve_config_path(explicit, std::env::var(FLEET_CONFIG_ENV).ok());
    load_config_from(&path, required)
}

fn load_config_from(path: &Path, required: bool) -> Result<FleetConfig> {
    if !path.exists() {
        if required {
            return Err(Error::file_not_found(path));
        }
        return Ok(FleetConfig::default());
    }
    let data = std::fs::read_to_string(path)?;
    let config: FleetConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

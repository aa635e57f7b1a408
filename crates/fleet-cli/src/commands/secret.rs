//! `secret:create`: seal an env file into an application's manifests
//!
//! The env file becomes an Opaque Secret, kubeseal turns that into
//! `sealed-secret.yaml` next to the application's kustomization, and the
//! application deployment gets one `secretKeyRef` env entry per key. The
//! plaintext secret and the env file are deleted afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use base64::Engine;
use clap::Args;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use fleet_common::fs::write_atomic;

use super::{describe, CommandErrorExt};
use crate::config::FleetConfig;
use crate::{Error, Result};

const SEALED_SECRET_FILE: &str = "sealed-secret.yaml";
const KUSTOMIZATION_FILE: &str = "kustomization.yaml";
const DEPLOYMENT_FILE: &str = "deployment.yaml";

#[derive(Args, Debug)]
pub struct SecretArgs {
    /// Environment
    #[arg(short = 'e', long)]
    pub env: String,
    /// Application name
    #[arg(short = 'a', long)]
    pub app: String,
    /// Path to the .env file (deleted once sealed)
    #[arg(short = 'f', long)]
    pub file: PathBuf,
}

pub async fn run(args: SecretArgs, config: &FleetConfig) -> Result<()> {
    let sealer = Sealer::kubeseal(&config.sealing_cert);
    create_secret(&args, config, &sealer, Path::new(".")).await
}

/// Name of the Secret holding an application's env in one environment.
pub fn secret_name(app: &str, env: &str) -> String {
    format!("{app}.{env}.secret")
}

/// Parse `KEY=value` lines into base64-encoded values, sorted by key.
///
/// Blank lines, `#` comments and `---` separators are skipped. Key and value
/// are trimmed; the value may itself contain `=`.
pub fn parse_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::file_not_found(path),
        _ => Error::Io(e),
    })?;
    parse_env(&content)
}

fn parse_env(content: &str) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed == "---" {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| Error::validation(format!("invalid line in env file: {line}")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::validation(format!("missing key in env file line: {line}")));
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(value.trim());
        env.insert(key.to_string(), encoded);
    }
    Ok(env)
}

/// Opaque Secret manifest
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretManifest {
    api_version: &'static str,
    kind: &'static str,
    metadata: SecretMetadata,
    #[serde(rename = "type")]
    type_: &'static str,
    data: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct SecretMetadata {
    name: String,
    namespace: String,
}

impl SecretManifest {
    fn new(name: String, namespace: &str, data: BTreeMap<String, String>) -> Self {
        Self {
            api_version: "v1",
            kind: "Secret",
            metadata: SecretMetadata {
                name,
                namespace: namespace.to_string(),
            },
            type_: "Opaque",
            data,
        }
    }
}

/// External program turning a plain Secret (stdin) into a SealedSecret (stdout)
#[derive(Debug, Clone)]
pub struct Sealer {
    program: String,
    args: Vec<String>,
}

impl Sealer {
    /// `kubeseal --format yaml --cert <cert>`
    pub fn kubeseal(cert: &Path) -> Self {
        Self {
            program: "kubeseal".to_string(),
            args: vec![
                "--format".to_string(),
                "yaml".to_string(),
                "--cert".to_string(),
                cert.to_string_lossy().into_owned(),
            ],
        }
    }

    /// Seal `input` into `output`. The output file only appears when the
    /// sealer succeeds.
    async fn seal(&self, input: &Path, output: &Path) -> Result<()> {
        let label = describe(&self.program, &self.args);
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        let staged = tempfile::NamedTempFile::new_in(dir)?;
        let stdin = std::fs::File::open(input)?;
        let stdout = staged.reopen()?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::command_failed(format!("failed to start {label}: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                warn!("{line}");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(Error::command_failed(format!("{label} failed with {status}")));
        }
        staged.persist(output).cmd_err()?;
        Ok(())
    }
}

/// Plaintext secret on disk; removed on drop unless already deleted.
struct PlaintextSecret {
    path: PathBuf,
    removed: bool,
}

impl PlaintextSecret {
    fn write(path: PathBuf, manifest: &SecretManifest) -> Result<Self> {
        std::fs::write(&path, serde_yaml::to_string(manifest)?)?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn remove(mut self) -> Result<()> {
        self.removed = true;
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

impl Drop for PlaintextSecret {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove plaintext secret");
            }
        }
    }
}

async fn create_secret(
    args: &SecretArgs,
    config: &FleetConfig,
    sealer: &Sealer,
    workdir: &Path,
) -> Result<()> {
    let app_dir = config.app_dir(&args.env, &args.app);
    let kustomization = app_dir.join(KUSTOMIZATION_FILE);
    let deployment = app_dir.join(DEPLOYMENT_FILE);
    for required in [&kustomization, &deployment] {
        if !required.exists() {
            return Err(Error::file_not_found(required));
        }
    }

    let data = parse_env_file(&args.file)?;
    let keys: Vec<String> = data.keys().cloned().collect();
    let name = secret_name(&args.app, &args.env);

    let plaintext = PlaintextSecret::write(
        workdir.join(format!("{name}.yaml")),
        &SecretManifest::new(name.clone(), &args.env, data),
    )?;
    debug!(path = %plaintext.path.display(), "Wrote plaintext secret");

    let sealed = app_dir.join(SEALED_SECRET_FILE);
    sealer.seal(&plaintext.path, &sealed).await?;
    info!(path = %sealed.display(), "Sealed secret");

    add_to_kustomization(&kustomization, SEALED_SECRET_FILE)?;
    set_secret_env(&deployment, &name, &keys)?;

    plaintext.remove()?;
    std::fs::remove_file(&args.file)?;

    info!(app = %args.app, env = %args.env, keys = keys.len(), "Secret successfully created and sealed");
    Ok(())
}

/// Append `resource` to the kustomization's `resources` unless present.
fn add_to_kustomization(path: &Path, resource: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut value: Value = serde_yaml::from_str(&content)?;

    let root = value
        .as_mapping_mut()
        .ok_or_else(|| Error::validation(format!("{} is not a mapping", path.display())))?;
    let resources = root
        .entry(Value::from("resources"))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if resources.is_null() {
        *resources = Value::Sequence(Vec::new());
    }
    let list = resources.as_sequence_mut().ok_or_else(|| {
        Error::validation(format!("resources in {} is not a list", path.display()))
    })?;

    if list.iter().any(|r| r.as_str() == Some(resource)) {
        debug!(path = %path.display(), resource, "Kustomization already lists resource");
        return Ok(());
    }
    list.push(Value::from(resource));
    write_atomic(path, serde_yaml::to_string(&value)?.as_bytes())?;
    Ok(())
}

/// Replace the first container's env with `secretKeyRef`s into `secret`.
fn set_secret_env(path: &Path, secret: &str, keys: &[String]) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut value: Value = serde_yaml::from_str(&content)?;

    let invalid = || Error::validation(format!("invalid deployment structure in {}", path.display()));
    let container = value
        .get_mut("spec")
        .and_then(|s| s.get_mut("template"))
        .and_then(|t| t.get_mut("spec"))
        .and_then(|s| s.get_mut("containers"))
        .and_then(|c| c.as_sequence_mut())
        .and_then(|c| c.first_mut())
        .and_then(|c| c.as_mapping_mut())
        .ok_or_else(invalid)?;

    let env: Vec<Value> = keys.iter().map(|key| secret_key_ref(secret, key)).collect();
    container.insert(Value::from("env"), Value::Sequence(env));

    write_atomic(path, serde_yaml::to_string(&value)?.as_bytes())?;
    Ok(())
}

fn secret_key_ref(secret: &str, key: &str) -> Value {
    let mut key_ref = Mapping::new();
    key_ref.insert("name".into(), secret.into());
    key_ref.insert("key".into(), key.into());

    let mut value_from = Mapping::new();
    value_from.insert("secretKeyRef".into(), Value::Mapping(key_ref));

    let mut entry = Mapping::new();
    entry.insert("name".into(), key.into());
    entry.insert("valueFrom".into(), Value::Mapping(value_from));
    Value::Mapping(entry)
}

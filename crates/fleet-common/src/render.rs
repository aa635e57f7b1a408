//! Manifest renderer
//!
//! Renders every template of an [`AppDescriptor`] into its place in the
//! manifest tree:
//!
//! ```text
//! <base-root>/<app>/*.yaml       Base
//! <target-root>/<app>/*.yaml     Application
//! <target-root>/common/*.yaml    Common
//! ```
//!
//! Existing files are never overwritten, so rendering the same application
//! twice is a no-op. The workload's port is claimed in the ledger once per
//! render, before the port-defining templates (the Base deployment and
//! service) are written. The claim is released again when none of them lands.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::app::AppDescriptor;
use crate::error::IoResultExt;
use crate::ports::PortRegistry;
use crate::template::{ResourceCategory, TemplateContext, TemplateEngine, TemplateEntry, COMMON_DIR};
use crate::{fs, Error, Result};

/// What happened to one template
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenderAction {
    /// The file was created
    Written(PathBuf),
    /// The file already existed and was left untouched
    Skipped(PathBuf),
}

impl RenderAction {
    /// Destination file
    pub fn path(&self) -> &Path {
        match self {
            Self::Written(p) | Self::Skipped(p) => p,
        }
    }
}

/// Outcome of rendering a single template
#[derive(Debug)]
pub struct TemplateOutcome {
    /// Template name
    pub template: String,
    /// Template category
    pub category: ResourceCategory,
    /// Result of the render task
    pub result: Result<RenderAction>,
}

/// Outcomes of every template, in catalog order
#[derive(Debug, Default)]
pub struct RenderReport {
    outcomes: Vec<TemplateOutcome>,
}

impl RenderReport {
    /// All outcomes in catalog order
    pub fn outcomes(&self) -> &[TemplateOutcome] {
        &self.outcomes
    }

    /// Files created by this render
    pub fn written(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Ok(RenderAction::Written(p)) => Some(p.as_path()),
                _ => None,
            })
            .collect()
    }

    /// Files that already existed
    pub fn skipped(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                Ok(RenderAction::Skipped(p)) => Some(p.as_path()),
                _ => None,
            })
            .collect()
    }

    /// Every failed outcome
    pub fn errors(&self) -> Vec<&TemplateOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err()).collect()
    }

    /// Whether every template rendered or was skipped
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Surface the first error in catalog order, or the actions taken.
    pub fn into_result(self) -> Result<Vec<RenderAction>> {
        self.outcomes.into_iter().map(|o| o.result).collect()
    }
}

/// Renders application manifest trees
#[derive(Clone)]
pub struct ManifestRenderer {
    base_root: PathBuf,
    registry: PortRegistry,
    engine: Arc<TemplateEngine>,
}

impl ManifestRenderer {
    /// Renderer writing Base resources under `base_root` and consulting
    /// `registry` for port ownership.
    pub fn new(base_root: impl Into<PathBuf>, registry: PortRegistry) -> Self {
        Self {
            base_root: base_root.into(),
            registry,
            engine: Arc::new(TemplateEngine::new()),
        }
    }

    /// Root directory for Base resources
    pub fn base_root(&self) -> &Path {
        &self.base_root
    }

    /// The port ledger consulted by port-defining templates
    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }

    /// Render every template of `app`, with Application and Common resources
    /// under `target_root`.
    ///
    /// All templates run to completion. Per-template failures are reported in
    /// the returned [`RenderReport`]; only descriptor validation and directory
    /// setup fail the call itself.
    pub async fn render(&self, app: &AppDescriptor, target_root: &Path) -> Result<RenderReport> {
        app.validate()?;

        let base_dir = self.base_root.join(app.name());
        let app_dir = target_root.join(app.name());
        let common_dir = target_root.join(COMMON_DIR);
        for dir in [&base_dir, &app_dir, &common_dir] {
            tokio::fs::create_dir_all(dir).await.at(dir)?;
        }

        let base_ref = base_reference(&app_dir, &base_dir).await?;
        let ctx = app.context(base_ref);
        debug!(app = app.name(), base_ref = %ctx.base_ref, "Rendering manifests");

        let jobs: Vec<RenderJob> = app
            .templates()
            .iter()
            .map(|entry| {
                let dir = match entry.category() {
                    ResourceCategory::Base => &base_dir,
                    ResourceCategory::Application => &app_dir,
                    ResourceCategory::Common => &common_dir,
                };
                RenderJob {
                    dest: dir.join(entry.relative_path()),
                    entry: entry.clone(),
                    ctx: ctx.clone(),
                    port_owner: None,
                    engine: Arc::clone(&self.engine),
                }
            })
            .collect();

        let claim = self.claim_port(app, &jobs).await?;
        let jobs = jobs.into_iter().map(|mut job| {
            if let PortClaim::Conflict(owner) = &claim {
                if job.entry.defines_port() {
                    job.port_owner = Some(owner.clone());
                }
            }
            job
        });

        let tasks = jobs.map(|job| {
            let template = job.entry.name().to_string();
            let category = job.entry.category();
            let defines_port = job.entry.defines_port();
            async move {
                let result = blocking(move || job.run()).await;
                (
                    defines_port,
                    TemplateOutcome {
                        template,
                        category,
                        result,
                    },
                )
            }
        });

        let results = join_all(tasks).await;
        let port_written = results
            .iter()
            .any(|(defines_port, o)| *defines_port && matches!(o.result, Ok(RenderAction::Written(_))));
        if claim == PortClaim::Fresh && !port_written {
            let registry = self.registry.clone();
            let (owner, port) = (app.name().to_string(), app.port());
            blocking(move || registry.release(&owner, port)).await?;
            debug!(app = app.name(), port, "Released unused port claim");
        }

        let outcomes: Vec<TemplateOutcome> = results.into_iter().map(|(_, o)| o).collect();
        for outcome in &outcomes {
            if let Err(err) = &outcome.result {
                error!(
                    template = %outcome.template,
                    category = %outcome.category,
                    error = %err,
                    "Template render failed"
                );
            }
        }

        Ok(RenderReport { outcomes })
    }

    /// Claim the app's port once, before any port-defining file is written.
    ///
    /// Nothing is claimed when every port-defining file already exists.
    async fn claim_port(&self, app: &AppDescriptor, jobs: &[RenderJob]) -> Result<PortClaim> {
        let mut pending = false;
        for job in jobs.iter().filter(|j| j.entry.defines_port()) {
            if !tokio::fs::try_exists(&job.dest).await.at(&job.dest)? {
                pending = true;
            }
        }
        if !pending {
            return Ok(PortClaim::NotNeeded);
        }

        let registry = self.registry.clone();
        let (owner, port) = (app.name().to_string(), app.port());
        match blocking(move || registry.claim(&owner, port)).await {
            Ok(true) => Ok(PortClaim::Fresh),
            Ok(false) => Ok(PortClaim::AlreadyHeld),
            Err(Error::PortConflict { owner, .. }) => Ok(PortClaim::Conflict(owner)),
            Err(e) => Err(e),
        }
    }
}

/// State of the app's port in the ledger for one render
#[derive(Debug, PartialEq, Eq)]
enum PortClaim {
    NotNeeded,
    Fresh,
    AlreadyHeld,
    Conflict(String),
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| Err(Error::internal("renderer", e.to_string())))
}

/// Everything one render task needs, owned so it can move onto the blocking
/// pool.
struct RenderJob {
    dest: PathBuf,
    entry: TemplateEntry,
    ctx: TemplateContext,
    /// Set on port-defining templates when another app holds the port
    port_owner: Option<String>,
    engine: Arc<TemplateEngine>,
}

impl RenderJob {
    fn run(self) -> Result<RenderAction> {
        if fs::exists(&self.dest)? {
            debug!(path = %self.dest.display(), "File already exists, skipping");
            return Ok(RenderAction::Skipped(self.dest));
        }

        if let Some(owner) = self.port_owner {
            return Err(Error::PortConflict {
                port: self.ctx.port,
                owner,
                requested_by: self.ctx.name,
            });
        }

        let rendered = self
            .engine
            .render(self.entry.name(), self.entry.body(), &self.ctx)?;
        fs::ensure_dir(fs::parent_dir(&self.dest))?;
        if !fs::create_new_atomic(&self.dest, rendered.as_bytes())? {
            debug!(path = %self.dest.display(), "File appeared concurrently, skipping");
            return Ok(RenderAction::Skipped(self.dest));
        }

        info!(path = %self.dest.display(), template = self.entry.name(), "File created successfully");
        Ok(RenderAction::Written(self.dest))
    }
}

/// `/`-separated path from `from` to `to`, as written into the application's
/// kustomization. Both directories must exist.
async fn base_reference(from: &Path, to: &Path) -> Result<String> {
    let from = tokio::fs::canonicalize(from).await.at(from)?;
    let canonical_to = tokio::fs::canonicalize(to).await.at(to)?;
    let rel = relative_path(&from, &canonical_to).unwrap_or_else(|| to.to_path_buf());
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Lexical relative path between two absolute paths. `None` when they share
/// no root (e.g. different drive prefixes).
fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    if from.first() != to.first() {
        return None;
    }

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for c in &to[common..] {
        rel.push(c.as_os_str());
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    Some(rel)
}

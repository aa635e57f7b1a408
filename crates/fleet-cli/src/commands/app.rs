//! `app:create`: scaffold the manifests of one application

use clap::Args;
use tracing::{info, warn};

use fleet_common::{AppDescriptor, TemplateCatalog};

use crate::config::FleetConfig;
use crate::Result;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Application name
    #[arg(short = 'a', long)]
    pub app: String,
    /// Environment (e.g. staging, production)
    #[arg(short = 'e', long)]
    pub env: String,
    /// Container port; allocated from the port ledger when omitted
    #[arg(short = 'p', long)]
    pub port: Option<u16>,
    /// Number of replicas
    #[arg(short = 'r', long, default_value_t = 1)]
    pub replicas: u32,
    /// Full image reference (defaults to <image_host>/<app>:latest)
    #[arg(long)]
    pub image: Option<String>,
    /// Namespace (defaults to the environment)
    #[arg(long)]
    pub namespace: Option<String>,
}

pub async fn run(args: CreateArgs, config: &FleetConfig) -> Result<()> {
    let renderer = config.renderer();
    let placeholder = *renderer.registry().range().start();

    let mut app = AppDescriptor::new(
        &args.app,
        &args.env,
        args.port.unwrap_or(placeholder),
        TemplateCatalog::builtin()?,
    )
    .with_image_host(&config.image_host)
    .with_replicas(args.replicas);
    if let Some(image) = args.image {
        app = app.with_image(image);
    }
    if let Some(namespace) = args.namespace {
        app = app.with_namespace(namespace);
    }
    app.validate()?;

    if args.port.is_none() {
        app = app.with_port(renderer.registry().allocate(&args.app)?);
    }
    let port = app.port();

    let target = config.env_dir(&args.env);
    info!(app = %args.app, env = %args.env, port, target = %target.display(), "Creating app");

    let report = renderer.render(&app, &target).await?;
    for path in report.skipped() {
        warn!(path = %path.display(), "File already exists, left unchanged");
    }
    let written = report.written().len();
    report.into_result()?;

    info!(app = %args.app, files = written, "App successfully created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_in(root: &Path) -> FleetConfig {
        FleetConfig {
            base_path: root.join("base"),
            apps_path: root.join("apps"),
            ports_file: root.join("ports.txt"),
            ..FleetConfig::default()
        }
    }

    fn args(app: &str, port: Option<u16>) -> CreateArgs {
        CreateArgs {
            app: app.to_string(),
            env: "staging".to_string(),
            port,
            replicas: 2,
            image: None,
            namespace: None,
        }
    }

    #[tokio::test]
    async fn test_create_with_explicit_port() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        run(args("api", Some(8080)), &config).await.unwrap();

        let deployment =
            std::fs::read_to_string(dir.path().join("apps/staging/api/deployment.yaml")).unwrap();
        assert!(deployment.contains("replicas: 2"));
        assert!(deployment.contains("ghcr.io/africhild/api:latest"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ports.txt")).unwrap(),
            "api: 8080\n"
        );
    }

    #[tokio::test]
    async fn test_create_allocates_port_when_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("ports.txt"), "foo: 8000\n").unwrap();

        run(args("api", None), &config).await.unwrap();

        let service =
            std::fs::read_to_string(dir.path().join("base/api/service.yaml")).unwrap();
        assert!(service.contains("targetPort: 8001"));
    }

    #[tokio::test]
    async fn test_create_conflicting_port_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("ports.txt"), "foo: 8080\n").unwrap();

        let err = run(args("api", Some(8080)), &config).await.unwrap_err();
        assert!(matches!(err, crate::Error::Common(e) if e.is_port_conflict()));
    }

    #[tokio::test]
    async fn test_invalid_app_leaves_ledger_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let err = run(args("Bad_Name", None), &config).await.unwrap_err();
        assert!(matches!(err, crate::Error::Common(fleet_common::Error::Validation { .. })));
        assert!(!dir.path().join("ports.txt").exists());
        assert!(!dir.path().join("base").exists());
    }

    #[tokio::test]
    async fn test_invalid_app_keeps_existing_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(dir.path().join("ports.txt"), "foo: 8000\n").unwrap();

        let mut create = args("api", None);
        create.replicas = 0;
        run(create, &config).await.unwrap_err();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ports.txt")).unwrap(),
            "foo: 8000\n"
        );
    }
}

//! Core of fleet: manifest rendering, the port ledger and ingress reconciliation

#![deny(missing_docs)]

pub mod app;
pub mod error;
pub mod fs;
pub mod ingress;
pub mod ports;
pub mod render;
pub mod template;

pub use app::AppDescriptor;
pub use error::Error;
pub use ingress::{IngressReconciler, RuleAction, RuleChange, RuleMatch};
pub use ports::{PortEntry, PortRegistry};
pub use render::{ManifestRenderer, RenderAction, RenderReport};
pub use template::TemplateCatalog;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default root for Base resources, relative to the repository root
pub const DEFAULT_BASE_PATH: &str = "base";

/// Default root for per-environment resources, relative to the repository root
pub const DEFAULT_APPS_PATH: &str = "apps";

/// Default root domain for ingress hosts
pub const DEFAULT_ROOT_DOMAIN: &str = "stage.example.com";

//! Values available to template placeholders

use serde::Serialize;

/// Fields substituted into manifest templates.
///
/// Each field is addressable by name, e.g. `{{ name }}` or `{{ port }}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TemplateContext {
    /// Application name
    pub name: String,
    /// Kubernetes namespace
    pub namespace: String,
    /// Environment tag
    pub env: String,
    /// Container port
    pub port: u16,
    /// Full image reference
    pub image: String,
    /// Registry host the image is pulled from
    pub image_host: String,
    /// Replica count
    pub replicas: u32,
    /// Path from the application directory to its base directory, as
    /// referenced from the application's kustomization
    pub base_ref: String,
}

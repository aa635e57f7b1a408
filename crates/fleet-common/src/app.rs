//! Application descriptor
//!
//! The immutable input to a render: who the application is, where it runs and
//! which templates make up its manifest tree.

use crate::template::{TemplateCatalog, TemplateContext};
use crate::{Error, Result};

/// Registry host used when no image host is configured
pub const DEFAULT_IMAGE_HOST: &str = "ghcr.io/africhild";

/// Maximum length of a DNS-1123 label
const MAX_LABEL_LEN: usize = 63;

/// An application to scaffold
#[derive(Clone, Debug)]
pub struct AppDescriptor {
    name: String,
    namespace: String,
    env: String,
    port: u16,
    image_host: String,
    image: Option<String>,
    replicas: u32,
    templates: TemplateCatalog,
}

impl AppDescriptor {
    /// Describe `name` in environment `env` listening on `port`.
    ///
    /// The namespace defaults to the environment, replicas to 1 and the image
    /// to `<image-host>/<name>:latest`.
    pub fn new(
        name: impl Into<String>,
        env: impl Into<String>,
        port: u16,
        templates: TemplateCatalog,
    ) -> Self {
        let env = env.into();
        Self {
            name: name.into(),
            namespace: env.clone(),
            env,
            port,
            image_host: DEFAULT_IMAGE_HOST.to_string(),
            image: None,
            replicas: 1,
            templates,
        }
    }

    /// Override the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the registry host used to derive the default image
    pub fn with_image_host(mut self, host: impl Into<String>) -> Self {
        self.image_host = host.into();
        self
    }

    /// Use an explicit image reference
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the container port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Application name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kubernetes namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Environment tag
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Requested port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replica count
    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    /// Image reference, derived from the image host when not set explicitly
    pub fn image(&self) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!(
                "{}/{}:latest",
                self.image_host.trim_end_matches('/'),
                self.name
            ),
        }
    }

    /// Templates to render
    pub fn templates(&self) -> &TemplateCatalog {
        &self.templates
    }

    /// Check the descriptor before anything touches the filesystem
    pub fn validate(&self) -> Result<()> {
        validate_label("application name", &self.name)?;
        validate_label("environment", &self.env)?;
        validate_label("namespace", &self.namespace)?;
        if self.port == 0 {
            return Err(Error::validation("port must be between 1 and 65535"));
        }
        if self.replicas == 0 {
            return Err(Error::validation("replicas must be at least 1"));
        }
        if self.image().trim().is_empty() {
            return Err(Error::validation("image must not be empty"));
        }
        Ok(())
    }

    /// Placeholder values for this application
    pub fn context(&self, base_ref: impl Into<String>) -> TemplateContext {
        TemplateContext {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            env: self.env.clone(),
            port: self.port,
            image: self.image(),
            image_host: self.image_host.clone(),
            replicas: self.replicas,
            base_ref: base_ref.into(),
        }
    }
}

/// Names end up as directory names and Kubernetes resource names, so they
/// must be DNS-1123 labels.
fn validate_label(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{what} '{value}' must be a lowercase DNS-1123 label (a-z, 0-9, '-', max {MAX_LABEL_LEN} chars)"
        )))
    }
}

//! Template catalog
//!
//! The fixed set of manifests fleet scaffolds for an application. Each entry
//! pairs a name with a raw body and a [`ResourceCategory`] that decides where
//! the rendered file lands:
//!
//! | Category      | Destination                          |
//! |---------------|--------------------------------------|
//! | `Base`        | `<base-root>/<app>/<name>.yaml`      |
//! | `Application` | `<target-root>/<app>/<name>.yaml`    |
//! | `Common`      | `<target-root>/common/<name>.yaml`   |

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Extension appended to every rendered template name
pub const MANIFEST_EXTENSION: &str = "yaml";

/// Directory under the target root that holds per-environment shared manifests
pub const COMMON_DIR: &str = "common";

/// Base templates that define the workload's network port. Rendering one of
/// these consults and updates the port registry.
const PORT_DEFINING_TEMPLATES: &[&str] = &["deployment", "service"];

/// Where a template's output belongs in the manifest tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    /// Shared across environments, rendered once per application
    Base,
    /// Environment-specific overrides for one application
    Application,
    /// Shared by every application within one environment
    Common,
}

impl ResourceCategory {
    /// Parse a category tag as written in a template definition
    pub fn parse(tag: &str, template: &str) -> Result<Self> {
        match tag {
            "Base" => Ok(Self::Base),
            "Application" => Ok(Self::Application),
            "Common" => Ok(Self::Common),
            other => Err(Error::InvalidCategory {
                template: template.to_string(),
                category: other.to_string(),
            }),
        }
    }

    /// The tag used in template definitions
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::Application => "Application",
            Self::Common => "Common",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static template definition with an untyped category tag
#[derive(Clone, Copy, Debug)]
pub struct RawTemplate {
    /// Template name, `/`-separated when nested
    pub name: &'static str,
    /// Raw template body
    pub body: &'static str,
    /// Category tag (`Base`, `Application` or `Common`)
    pub category: &'static str,
}

/// A validated template
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateEntry {
    name: String,
    body: String,
    category: ResourceCategory,
}

impl TemplateEntry {
    /// Create and validate a template entry
    pub fn new(
        name: impl Into<String>,
        body: impl Into<String>,
        category: ResourceCategory,
    ) -> Result<Self> {
        let entry = Self {
            name: name.into(),
            body: body.into(),
            category,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw template body
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Resource category
    pub fn category(&self) -> ResourceCategory {
        self.category
    }

    /// Whether rendering this template claims the application's port
    pub fn defines_port(&self) -> bool {
        self.category == ResourceCategory::Base && PORT_DEFINING_TEMPLATES.contains(&self.name())
    }

    /// Path of the rendered file relative to its category root.
    ///
    /// `common/ingress` becomes `common/ingress.yaml`.
    pub fn relative_path(&self) -> PathBuf {
        let (dirs, file) = match self.name.rsplit_once('/') {
            Some((dirs, file)) => (dirs, file),
            None => ("", self.name.as_str()),
        };
        let mut path: PathBuf = dirs.split('/').filter(|s| !s.is_empty()).collect();
        path.push(format!("{file}.{MANIFEST_EXTENSION}"));
        path
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("template name must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(Error::validation(format!(
                "template {} has an empty body",
                self.name
            )));
        }
        let segments_ok = self
            .name
            .split('/')
            .all(|s| !s.is_empty() && s != "." && s != "..");
        if !segments_ok {
            return Err(Error::validation(format!(
                "template name {} must be a relative path without '.' or '..' segments",
                self.name
            )));
        }
        Ok(())
    }
}

/// Ordered, validated set of templates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateCatalog {
    entries: Vec<TemplateEntry>,
}

impl TemplateCatalog {
    /// Build a catalog from validated entries.
    ///
    /// Two entries may not render to the same file.
    pub fn new(entries: Vec<TemplateEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert((entry.category, entry.relative_path())) {
                return Err(Error::validation(format!(
                    "duplicate {} template {}",
                    entry.category, entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parse and validate static template definitions
    pub fn from_raw(raw: &[RawTemplate]) -> Result<Self> {
        let entries = raw
            .iter()
            .map(|t| {
                let category = ResourceCategory::parse(t.category, t.name)?;
                TemplateEntry::new(t.name, t.body, category)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(entries)
    }

    /// The manifests fleet scaffolds for every application
    pub fn builtin() -> Result<Self> {
        Self::from_raw(BUILTIN_TEMPLATES)
    }

    /// Entries in render order
    pub fn iter(&self) -> impl Iterator<Item = &TemplateEntry> {
        self.entries.iter()
    }

    /// Number of templates
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no templates
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const BASE_DEPLOYMENT: &str = r#"
# Shared deployment; environments patch image and replicas on top of it.
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ name }}
  labels:
    app: {{ name }}
  namespace: default
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {{ name }}
  template:
    metadata:
      labels:
        app: {{ name }}
    spec:
      containers:
      - name: {{ name }}
        ports:
        - containerPort: {{ port }}
"#;

const BASE_SERVICE: &str = r#"
apiVersion: v1
kind: Service
metadata:
  name: {{ name }}
  labels:
    app: {{ name }}
  namespace: default
spec:
  selector:
    app: {{ name }}
  ports:
  - protocol: TCP
    port: 80
    targetPort: {{ port }}
  type: ClusterIP
"#;

const BASE_KUSTOMIZATION: &str = r#"
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
- deployment.yaml
- service.yaml
"#;

const APP_DEPLOYMENT: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ name }}
spec:
  replicas: {{ replicas }}
  selector:
    matchLabels:
      app: {{ name }}
  template:
    spec:
      containers:
      - name: {{ name }}
        image: {{ image }}
      imagePullSecrets:
        - name: registry-secret
"#;

const APP_KUSTOMIZATION: &str = r#"
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
namespace: {{ namespace }}
resources:
- {{ base_ref }}
patches:
  - path: deployment.yaml
"#;

const COMMON_NAMESPACE: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: {{ namespace }}
"#;

const COMMON_KUSTOMIZATION: &str = r#"
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
namespace: {{ namespace }}
resources:
- namespace.yaml
- ingress.yaml
"#;

const COMMON_INGRESS: &str = r#"
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {{ namespace }}-ingress
  namespace: {{ namespace }}
  annotations:
    nginx.ingress.kubernetes.io/rewrite-target: /
spec:
  ingressClassName: nginx
  rules: []
"#;

/// Built-in template definitions, in render order
pub const BUILTIN_TEMPLATES: &[RawTemplate] = &[
    RawTemplate {
        name: "deployment",
        body: BASE_DEPLOYMENT,
        category: "Base",
    },
    RawTemplate {
        name: "service",
        body: BASE_SERVICE,
        category: "Base",
    },
    RawTemplate {
        name: "kustomization",
        body: BASE_KUSTOMIZATION,
        category: "Base",
    },
    RawTemplate {
        name: "deployment",
        body: APP_DEPLOYMENT,
        category: "Application",
    },
    RawTemplate {
        name: "kustomization",
        body: APP_KUSTOMIZATION,
        category: "Application",
    },
    RawTemplate {
        name: "namespace",
        body: COMMON_NAMESPACE,
        category: "Common",
    },
    RawTemplate {
        name: "kustomization",
        body: COMMON_KUSTOMIZATION,
        category: "Common",
    },
    RawTemplate {
        name: "ingress",
        body: COMMON_INGRESS,
        category: "Common",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = TemplateCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), BUILTIN_TEMPLATES.len());
    }

    #[test]
    fn test_only_base_deployment_and_service_define_ports() {
        let catalog = TemplateCatalog::builtin().unwrap();
        let defining: Vec<_> = catalog
            .iter()
            .filter(|t| t.defines_port())
            .map(|t| (t.category(), t.name().to_string()))
            .collect();
        assert_eq!(
            defining,
            vec![
                (ResourceCategory::Base, "deployment".to_string()),
                (ResourceCategory::Base, "service".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let raw = [RawTemplate {
            name: "configmap",
            body: "kind: ConfigMap",
            category: "Cluster",
        }];
        let err = TemplateCatalog::from_raw(&raw).unwrap_err();
        match err {
            Error::InvalidCategory { template, category } => {
                assert_eq!(template, "configmap");
                assert_eq!(category, "Cluster");
            }
            other => panic!("expected InvalidCategory, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_name_and_body_are_rejected() {
        assert!(TemplateEntry::new("", "kind: X", ResourceCategory::Base).is_err());
        assert!(TemplateEntry::new("x", "  \n", ResourceCategory::Base).is_err());
    }

    #[test]
    fn test_escaping_names_are_rejected() {
        for name in ["../evil", "/abs", "a//b", "a/./b"] {
            assert!(
                TemplateEntry::new(name, "kind: X", ResourceCategory::Common).is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_duplicate_destination_is_rejected() {
        let a = TemplateEntry::new("deployment", "a: 1", ResourceCategory::Base).unwrap();
        let b = TemplateEntry::new("deployment", "b: 2", ResourceCategory::Base).unwrap();
        assert!(TemplateCatalog::new(vec![a, b]).is_err());
    }

    #[test]
    fn test_same_name_in_different_categories_is_allowed() {
        let a = TemplateEntry::new("deployment", "a: 1", ResourceCategory::Base).unwrap();
        let b = TemplateEntry::new("deployment", "b: 2", ResourceCategory::Application).unwrap();
        assert_eq!(TemplateCatalog::new(vec![a, b]).unwrap().len(), 2);
    }

    #[test]
    fn test_relative_path_appends_extension_to_last_segment() {
        let entry = TemplateEntry::new("common/ingress", "kind: Ingress", ResourceCategory::Common)
            .unwrap();
        assert_eq!(entry.relative_path(), PathBuf::from("common/ingress.yaml"));
    }

    #[test]
    fn test_relative_path_keeps_dots_in_name() {
        let entry = TemplateEntry::new("api.v1", "kind: X", ResourceCategory::Base).unwrap();
        assert_eq!(entry.relative_path(), PathBuf::from("api.v1.yaml"));
    }

    #[test]
    fn test_category_round_trip() {
        for category in [
            ResourceCategory::Base,
            ResourceCategory::Application,
            ResourceCategory::Common,
        ] {
            assert_eq!(
                ResourceCategory::parse(category.as_str(), "t").unwrap(),
                category
            );
        }
    }
}

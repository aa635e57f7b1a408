//! Ingress routing document reconciler
//!
//! Adds or removes one host rule in an on-disk `networking.k8s.io/v1` Ingress.
//! The document is parsed into typed structs; keys fleet does not model
//! (annotations, TLS blocks, extra path fields) are carried through flattened
//! maps and written back unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::error::IoResultExt;
use crate::{fs, Error, Result};

/// Subdomain that addresses the root domain itself
pub const ROOT_SUBDOMAIN: &str = "@";

/// Backend port used for rules created by [`IngressReconciler::update_rule`]
pub const DEFAULT_BACKEND_PORT: u16 = 80;

/// Key/value pairs fleet does not interpret
pub type Passthrough = BTreeMap<String, serde_yaml::Value>;

/// An Ingress resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressDocument {
    /// API version (networking.k8s.io/v1)
    pub api_version: String,
    /// Resource kind (Ingress)
    pub kind: String,
    /// Resource metadata
    pub metadata: IngressMetadata,
    /// Ingress specification
    pub spec: IngressSpec,
    /// Unmodelled top-level keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Ingress metadata
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressMetadata {
    /// Resource name
    pub name: String,
    /// Resource namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels, annotations and anything else
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Ingress spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// IngressClass handling this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Host rules, in document order
    #[serde(default, deserialize_with = "null_as_empty")]
    pub rules: Vec<IngressRule>,
    /// TLS, default backend and other keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// One host routing rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressRule {
    /// Fully qualified host name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// HTTP paths for the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRuleValue>,
    /// Unmodelled rule keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// HTTP routing for a rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HttpRuleValue {
    /// Path matchers
    #[serde(default, deserialize_with = "null_as_empty")]
    pub paths: Vec<HttpPath>,
    /// Unmodelled keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// A path matcher and the backend it routes to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPath {
    /// Request path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// How `path` is matched
    pub path_type: PathType,
    /// Target backend
    pub backend: IngressBackend,
    /// Unmodelled keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Path matching mode
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PathType {
    /// Match on path prefix split by `/`
    Prefix,
    /// Match the exact path
    Exact,
    /// Left to the IngressClass
    ImplementationSpecific,
}

/// Backend of a path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IngressBackend {
    /// Service backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceBackend>,
    /// Resource backends and other keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// A Service and port to route to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceBackend {
    /// Service name
    pub name: String,
    /// Service port
    pub port: ServiceBackendPort,
    /// Other service keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

/// Service port, by number or by name
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServiceBackendPort {
    /// Port number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u16>,
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Other port keys
    #[serde(flatten)]
    pub extra: Passthrough,
}

impl IngressRule {
    /// A rule routing every path on `host` to `service` on `port`
    pub fn for_service(host: impl Into<String>, service: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            http: Some(HttpRuleValue {
                paths: vec![HttpPath {
                    path: Some("/".to_string()),
                    path_type: PathType::Prefix,
                    backend: IngressBackend {
                        service: Some(ServiceBackend {
                            name: service.into(),
                            port: ServiceBackendPort {
                                number: Some(port),
                                name: None,
                                extra: Passthrough::new(),
                            },
                            extra: Passthrough::new(),
                        }),
                        extra: Passthrough::new(),
                    },
                    extra: Passthrough::new(),
                }],
                extra: Passthrough::new(),
            }),
            extra: Passthrough::new(),
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// How an existing rule is matched against a subdomain
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleMatch {
    /// The rule's host equals the derived host
    #[default]
    #[serde(rename = "exact")]
    ExactHost,
    /// The rule's host starts with `<subdomain>.`
    #[serde(rename = "prefix")]
    SubdomainPrefix,
}

/// Requested change to the rule list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleAction {
    /// Ensure a rule exists for the host
    Add,
    /// Ensure no rule exists for the host
    Remove,
}

/// What [`IngressReconciler::update_rule`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleChange {
    /// A rule was appended
    Added,
    /// A rule was removed
    Removed,
    /// Add requested but a matching rule exists
    AlreadyPresent,
    /// Remove requested but no rule matched
    Absent,
}

impl RuleChange {
    /// Whether the document was rewritten
    pub fn modified(&self) -> bool {
        matches!(self, Self::Added | Self::Removed)
    }
}

impl fmt::Display for RuleChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::AlreadyPresent => "already present",
            Self::Absent => "absent",
        })
    }
}

/// Adds and removes host rules in ingress documents under one root domain
#[derive(Clone, Debug)]
pub struct IngressReconciler {
    root_domain: String,
    rule_match: RuleMatch,
}

impl IngressReconciler {
    /// Reconciler for hosts under `root_domain`, matching rules by exact host
    pub fn new(root_domain: impl Into<String>) -> Self {
        Self {
            root_domain: root_domain.into(),
            rule_match: RuleMatch::default(),
        }
    }

    /// Change how existing rules are matched
    pub fn with_rule_match(mut self, rule_match: RuleMatch) -> Self {
        self.rule_match = rule_match;
        self
    }

    /// Host name for `subdomain`; `@` is the root domain itself
    pub fn host_for(&self, subdomain: &str) -> String {
        if subdomain == ROOT_SUBDOMAIN {
            self.root_domain.clone()
        } else {
            format!("{subdomain}.{}", self.root_domain)
        }
    }

    /// Add or remove the rule for `subdomain` in the document at `path`.
    ///
    /// The file is only rewritten when the rule list changes.
    pub fn update_rule(
        &self,
        path: &Path,
        service: &str,
        subdomain: &str,
        action: RuleAction,
    ) -> Result<RuleChange> {
        if !fs::exists(path)? {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).at(path)?;
        let mut doc: IngressDocument =
            serde_yaml::from_str(&raw).map_err(|e| Error::parse(path, e.to_string()))?;

        let host = self.host_for(subdomain);
        let existing = self.find_rule(&doc, subdomain, &host);

        let change = match (action, existing) {
            (RuleAction::Add, Some(_)) => RuleChange::AlreadyPresent,
            (RuleAction::Add, None) => {
                doc.spec
                    .rules
                    .push(IngressRule::for_service(&host, service, DEFAULT_BACKEND_PORT));
                RuleChange::Added
            }
            (RuleAction::Remove, Some(index)) => {
                doc.spec.rules.remove(index);
                RuleChange::Removed
            }
            (RuleAction::Remove, None) => RuleChange::Absent,
        };

        if !change.modified() {
            debug!(host = %host, change = %change, "Ingress unchanged");
            return Ok(change);
        }

        let out = serde_yaml::to_string(&doc).map_err(|e| Error::parse(path, e.to_string()))?;
        fs::write_atomic(path, out.as_bytes())?;
        info!(path = %path.display(), host = %host, service, change = %change, "Ingress updated");
        Ok(change)
    }

    fn find_rule(&self, doc: &IngressDocument, subdomain: &str, host: &str) -> Option<usize> {
        let prefix = format!("{subdomain}.");
        doc.spec.rules.iter().position(|rule| {
            let Some(rule_host) = rule.host.as_deref() else {
                return false;
            };
            match self.rule_match {
                RuleMatch::SubdomainPrefix if subdomain != ROOT_SUBDOMAIN => {
                    rule_host.starts_with(&prefix)
                }
                _ => rule_host == host,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const EMPTY: &str = r#"apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: staging-ingress
  namespace: staging
  annotations:
    cert-manager.io/cluster-issuer: letsencrypt
spec:
  ingressClassName: nginx
  tls:
    - hosts:
        - stage.example.com
      secretName: stage-tls
  rules: []
"#;

    fn write_doc(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ingress.yaml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn load(path: &Path) -> IngressDocument {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn reconciler() -> IngressReconciler {
        IngressReconciler::new("stage.example.com")
    }

    #[test]
    fn test_add_root_domain_rule() {
        let (_dir, path) = write_doc(EMPTY);
        let change = reconciler()
            .update_rule(&path, "api", "@", RuleAction::Add)
            .unwrap();
        assert_eq!(change, RuleChange::Added);

        let doc = load(&path);
        assert_eq!(doc.spec.rules.len(), 1);
        let rule = &doc.spec.rules[0];
        assert_eq!(rule.host.as_deref(), Some("stage.example.com"));
        let http_path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(http_path.path.as_deref(), Some("/"));
        assert_eq!(http_path.path_type, PathType::Prefix);
        let svc = http_path.backend.service.as_ref().unwrap();
        assert_eq!(svc.name, "api");
        assert_eq!(svc.port.number, Some(80));
    }

    #[test]
    fn test_add_is_idempotent() {
        let (_dir, path) = write_doc(EMPTY);
        let r = reconciler();
        assert_eq!(
            r.update_rule(&path, "web", "app", RuleAction::Add).unwrap(),
            RuleChange::Added
        );
        let after_first = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            r.update_rule(&path, "web", "app", RuleAction::Add).unwrap(),
            RuleChange::AlreadyPresent
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), after_first);
        assert_eq!(load(&path).spec.rules.len(), 1);
    }

    #[test]
    fn test_root_domain_add_is_idempotent() {
        let (_dir, path) = write_doc(EMPTY);
        let r = reconciler();
        r.update_rule(&path, "api", "@", RuleAction::Add).unwrap();
        assert_eq!(
            r.update_rule(&path, "api", "@", RuleAction::Add).unwrap(),
            RuleChange::AlreadyPresent
        );
    }

    #[test]
    fn test_add_remove_round_trip() {
        let (_dir, path) = write_doc(EMPTY);
        let r = reconciler();
        r.update_rule(&path, "api", "api", RuleAction::Add).unwrap();
        let before = load(&path).spec.rules;

        r.update_rule(&path, "web", "web", RuleAction::Add).unwrap();
        assert_eq!(
            r.update_rule(&path, "web", "web", RuleAction::Remove).unwrap(),
            RuleChange::Removed
        );
        assert_eq!(load(&path).spec.rules, before);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let (_dir, path) = write_doc(EMPTY);
        let change = reconciler()
            .update_rule(&path, "api", "api", RuleAction::Remove)
            .unwrap();
        assert_eq!(change, RuleChange::Absent);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), EMPTY);
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let existing = r#"  rules:
    - host: web.stage.example.com
      http:
        paths:
          - path: /
            pathType: Prefix
            backend:
              service:
                name: web
                extraSvcKey: kept
                port:
                  number: 80
                  extraPortKey: 7
"#;
        let (_dir, path) = write_doc(&EMPTY.replace("  rules: []\n", existing));
        assert_eq!(
            reconciler()
                .update_rule(&path, "api", "api", RuleAction::Add)
                .unwrap(),
            RuleChange::Added
        );

        let value: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value["metadata"]["annotations"]["cert-manager.io/cluster-issuer"].as_str(),
            Some("letsencrypt")
        );
        assert_eq!(value["spec"]["tls"][0]["secretName"].as_str(), Some("stage-tls"));
        assert_eq!(value["spec"]["ingressClassName"].as_str(), Some("nginx"));

        let service = &value["spec"]["rules"][0]["http"]["paths"][0]["backend"]["service"];
        assert_eq!(service["extraSvcKey"].as_str(), Some("kept"));
        assert_eq!(service["port"]["extraPortKey"].as_u64(), Some(7));
        assert_eq!(value["spec"]["rules"].as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn test_exact_match_distinguishes_similar_subdomains() {
        let (_dir, path) = write_doc(EMPTY);
        let r = reconciler();
        r.update_rule(&path, "foo", "foo", RuleAction::Add).unwrap();
        assert_eq!(
            r.update_rule(&path, "foobar", "foobar", RuleAction::Add).unwrap(),
            RuleChange::Added
        );
        assert_eq!(
            r.update_rule(&path, "foo", "foo", RuleAction::Remove).unwrap(),
            RuleChange::Removed
        );
        let hosts: Vec<_> = load(&path)
            .spec
            .rules
            .into_iter()
            .filter_map(|r| r.host)
            .collect();
        assert_eq!(hosts, vec!["foobar.stage.example.com".to_string()]);
    }

    #[test]
    fn test_prefix_match_mode() {
        let doc = EMPTY.replace(
            "rules: []",
            "rules:\n    - host: api.other.example.com\n      http:\n        paths: []",
        );
        let (_dir, path) = write_doc(&doc);
        let r = reconciler().with_rule_match(RuleMatch::SubdomainPrefix);
        assert_eq!(
            r.update_rule(&path, "api", "api", RuleAction::Add).unwrap(),
            RuleChange::AlreadyPresent
        );

        let exact = reconciler();
        assert_eq!(
            exact.update_rule(&path, "api", "api", RuleAction::Add).unwrap(),
            RuleChange::Added
        );
    }

    #[test]
    fn test_null_rules_are_empty() {
        let (_dir, path) = write_doc(&EMPTY.replace("rules: []", "rules:"));
        assert_eq!(
            reconciler()
                .update_rule(&path, "api", "@", RuleAction::Add)
                .unwrap(),
            RuleChange::Added
        );
    }

    #[test]
    fn test_missing_document() {
        let dir = tempdir().unwrap();
        let err = reconciler()
            .update_rule(&dir.path().join("nope.yaml"), "api", "@", RuleAction::Add)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_malformed_document() {
        let (_dir, path) = write_doc("apiVersion: v1\nkind: Ingress\nspec: [1, 2]\n");
        let err = reconciler()
            .update_rule(&path, "api", "@", RuleAction::Add)
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}

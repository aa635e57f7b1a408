//! End-to-end scaffold of two applications sharing one environment

use std::path::Path;

use fleet_common::{
    AppDescriptor, IngressReconciler, ManifestRenderer, PortRegistry, RuleAction, RuleChange,
    TemplateCatalog,
};

fn app(name: &str, port: u16) -> AppDescriptor {
    AppDescriptor::new(name, "staging", port, TemplateCatalog::builtin().unwrap())
}

#[tokio::test]
async fn scaffold_then_route() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let registry = PortRegistry::new(root.join("ports.txt"));
    let renderer = ManifestRenderer::new(root.join("base"), registry.clone());
    let target = root.join("apps").join("staging");

    let api_port = registry.allocate("api").unwrap();
    assert_eq!(api_port, 8000);
    renderer
        .render(&app("api", api_port), &target)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let web_port = registry.allocate("web").unwrap();
    assert_eq!(web_port, 8001);
    renderer
        .render(&app("web", web_port), &target)
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let ledger = std::fs::read_to_string(root.join("ports.txt")).unwrap();
    assert_eq!(ledger, "api: 8000\nweb: 8001\n");

    let ingress = target.join("common").join("ingress.yaml");
    let reconciler = IngressReconciler::new("stage.example.com");
    assert_eq!(
        reconciler
            .update_rule(&ingress, "api", "@", RuleAction::Add)
            .unwrap(),
        RuleChange::Added
    );
    assert_eq!(
        reconciler
            .update_rule(&ingress, "web", "www", RuleAction::Add)
            .unwrap(),
        RuleChange::Added
    );

    let doc: serde_yaml::Value =
        serde_yaml::from_str(&std::fs::read_to_string(&ingress).unwrap()).unwrap();
    let hosts: Vec<&str> = doc["spec"]["rules"]
        .as_sequence()
        .unwrap()
        .iter()
        .filter_map(|r| r["host"].as_str())
        .collect();
    assert_eq!(hosts, ["stage.example.com", "www.stage.example.com"]);
}

#[tokio::test]
async fn stolen_port_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let registry = PortRegistry::new(root.join("ports.txt"));
    let renderer = ManifestRenderer::new(root.join("base"), registry.clone());
    let target = root.join("apps").join("staging");

    registry.record("api", 8100).unwrap();
    let err = renderer
        .render(&app("web", 8100), &target)
        .await
        .unwrap()
        .into_result()
        .unwrap_err();
    assert!(err.is_port_conflict());
    assert!(!Path::new(&root.join("base/web/deployment.yaml")).exists());
}

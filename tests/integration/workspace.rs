//! End-to-end workspace tests over the scripted repository provider

use semver::Version;
use std::path::PathBuf;
use std::sync::Arc;
use swiftpack::config::WorkspaceLocation;
use swiftpack::manifest::{
    DependencyLocation, DependencyRequirement, JsonManifestLoader, Manifest, PackageDependency,
    ToolsVersion,
};
use swiftpack::package::PackageIdentity;
use swiftpack::repository::memory::{InMemoryRepositoryProvider, ScriptedRepository};
use swiftpack::repository::RepositorySpecifier;
use swiftpack::state::CheckoutState;
use swiftpack::workspace::{HighestVersionResolver, Workspace, WorkspaceConfiguration};

const DEP_URL: &str = "https://example.com/dep.git";

fn manifest_source(body: &str) -> Vec<u8> {
    format!("// swift-tools-version:5.5\n{body}").into_bytes()
}

fn provider() -> InMemoryRepositoryProvider {
    let provider = InMemoryRepositoryProvider::new();
    let mut dep = ScriptedRepository::new();
    dep.add_tag("1.0.0", "r1").add_tag("1.4.0", "r2");
    dep.add_file("r1", "Package.swift", manifest_source(r#"{ "name": "dep" }"#));
    dep.add_file("r2", "Package.swift", manifest_source(r#"{ "name": "dep" }"#));
    dep.add_file("r2", "Sources/Dep/dep.swift", b"// dep".to_vec());
    provider.add(&RepositorySpecifier::Url(DEP_URL.to_string()), dep);
    provider
}

fn root_manifest() -> Manifest {
    Manifest {
        display_name: "Root".to_string(),
        identity: PackageIdentity::plain("root"),
        path: PathBuf::from("Package.swift"),
        platforms: vec![],
        tools_version: ToolsVersion::new(5, 5, 0),
        dependencies: vec![PackageDependency {
            identity: PackageIdentity::plain("dep"),
            location: DependencyLocation::SourceControl(DEP_URL.to_string()),
            requirement: DependencyRequirement::up_to_next_major(Version::new(1, 0, 0)),
        }],
        products: vec![],
        targets: vec![],
        version: None,
    }
}

async fn workspace(
    dir: &tempfile::TempDir,
    provider: InMemoryRepositoryProvider,
) -> Workspace {
    let mut config = WorkspaceConfiguration::new(WorkspaceLocation::new(dir.path().join("root")));
    config.shared_cache_dir = None;
    Workspace::new(
        config,
        Arc::new(provider),
        Arc::new(JsonManifestLoader),
        Arc::new(HighestVersionResolver),
        None,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn resolve_writes_pins_state_and_checkout() {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace(&dir, provider()).await;

    let pins = ws.resolve(&root_manifest()).await.unwrap();
    let pin = pins.get(&PackageIdentity::plain("dep")).unwrap();
    assert_eq!(
        pin.state,
        CheckoutState::Version {
            version: Version::new(1, 4, 0),
            revision: "r2".to_string(),
        }
    );

    let location = ws.location();
    assert!(location.pins_file().exists());
    assert!(location.workspace_state_file().exists());
    assert!(location
        .checkouts_dir()
        .join("dep/Sources/Dep/dep.swift")
        .exists());
}

#[tokio::test]
async fn resolve_is_idempotent_across_workspace_instances() {
    let dir = tempfile::tempdir().unwrap();
    let repo_provider = provider();
    let specifier = RepositorySpecifier::Url(DEP_URL.to_string());

    let first = workspace(&dir, repo_provider.clone()).await;
    let pins_before = first.resolve(&root_manifest()).await.unwrap();
    assert_eq!(repo_provider.fetch_count(&specifier), 1);

    // A fresh workspace over the same tree reuses the managed clone
    let second = workspace(&dir, repo_provider.clone()).await;
    let pins_after = second.resolve(&root_manifest()).await.unwrap();
    assert_eq!(pins_after, pins_before);
    assert_eq!(repo_provider.fetch_count(&specifier), 1);
}

#[tokio::test]
async fn pins_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let repo_provider = provider();

    let ws = workspace(&dir, repo_provider.clone()).await;
    let written = ws.resolve(&root_manifest()).await.unwrap();

    let reopened = workspace(&dir, repo_provider).await;
    assert_eq!(reopened.pins().await.unwrap(), written);
}

//! Container dispatch
//!
//! Maps a package reference to the container implementation matching its
//! kind, materializing local clones through the repository manager on the
//! way. Containers are cached by identity.

use crate::container::{PackageContainer, SourceControlPackageContainer};
use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::{
    select_manifest, ManifestLoader, PackageDependency, ProductFilter, ToolsVersion,
};
use crate::package::{PackageIdentity, PackageKind, PackageReference};
use crate::repository::{RepositoryManager, RepositorySpecifier};
use async_trait::async_trait;
use semver::Version;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Identity → container dispatch with a per-identity cache
pub struct ContainerProvider {
    repository_manager: Arc<RepositoryManager>,
    manifest_loader: Arc<dyn ManifestLoader>,
    current_tools_version: ToolsVersion,
    containers: Mutex<HashMap<PackageIdentity, Arc<dyn PackageContainer>>>,
}

impl ContainerProvider {
    pub fn new(
        repository_manager: Arc<RepositoryManager>,
        manifest_loader: Arc<dyn ManifestLoader>,
        current_tools_version: ToolsVersion,
    ) -> Self {
        Self {
            repository_manager,
            manifest_loader,
            current_tools_version,
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the container for a package reference.
    ///
    /// Source-control kinds materialize a bare clone through the
    /// repository manager; root and file-system kinds read from disk;
    /// registry kinds are handled by an external client and are rejected
    /// here.
    pub async fn get_container(
        &self,
        reference: &PackageReference,
        skip_update: bool,
    ) -> SwiftpackResult<Arc<dyn PackageContainer>> {
        if let Some(container) = self.containers.lock().unwrap().get(&reference.identity) {
            return Ok(Arc::clone(container));
        }

        let container: Arc<dyn PackageContainer> = match &reference.kind {
            PackageKind::LocalSourceControl(path) => {
                self.source_control(reference, RepositorySpecifier::Path(path.clone()), skip_update)
                    .await?
            }
            PackageKind::RemoteSourceControl(url) => {
                self.source_control(reference, RepositorySpecifier::Url(url.clone()), skip_update)
                    .await?
            }
            PackageKind::Root(path) | PackageKind::FileSystem(path) => {
                Arc::new(FileSystemPackageContainer {
                    reference: reference.clone(),
                    path: path.clone(),
                    manifest_loader: Arc::clone(&self.manifest_loader),
                    current_tools_version: self.current_tools_version,
                })
            }
            PackageKind::Registry(_) => {
                return Err(SwiftpackError::UnsupportedPackageKind {
                    identity: reference.identity.to_string(),
                    kind: reference.kind.name().to_string(),
                })
            }
        };

        self.containers
            .lock()
            .unwrap()
            .insert(reference.identity.clone(), Arc::clone(&container));
        Ok(container)
    }

    async fn source_control(
        &self,
        reference: &PackageReference,
        specifier: RepositorySpecifier,
        skip_update: bool,
    ) -> SwiftpackResult<Arc<dyn PackageContainer>> {
        let handle = self
            .repository_manager
            .lookup(&specifier, skip_update)
            .await?;
        let repository = self.repository_manager.open(&handle).await?;
        Ok(Arc::new(SourceControlPackageContainer::new(
            reference.clone(),
            specifier,
            repository,
            Arc::clone(&self.manifest_loader),
            self.current_tools_version,
        )))
    }
}

/// Container over an unversioned local package
struct FileSystemPackageContainer {
    reference: PackageReference,
    path: PathBuf,
    manifest_loader: Arc<dyn ManifestLoader>,
    current_tools_version: ToolsVersion,
}

impl FileSystemPackageContainer {
    fn unsupported(&self) -> SwiftpackError {
        SwiftpackError::UnsupportedPackageKind {
            identity: self.reference.identity.to_string(),
            kind: self.reference.kind.name().to_string(),
        }
    }
}

#[async_trait]
impl PackageContainer for FileSystemPackageContainer {
    fn package_reference(&self) -> &PackageReference {
        &self.reference
    }

    async fn versions_descending(&self) -> SwiftpackResult<Vec<Version>> {
        Ok(Vec::new())
    }

    async fn appropriate_versions_descending(&self) -> SwiftpackResult<Vec<Version>> {
        Ok(Vec::new())
    }

    async fn get_revision(&self, _tag: &str) -> SwiftpackResult<String> {
        Err(self.unsupported())
    }

    async fn tag_for_version(&self, _version: &Version) -> SwiftpackResult<String> {
        Err(self.unsupported())
    }

    async fn dependencies_at_version(
        &self,
        _version: &Version,
        _filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        Err(self.unsupported())
    }

    async fn dependencies_at_revision(
        &self,
        _revision: &str,
        _filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        Err(self.unsupported())
    }

    async fn dependencies_at_branch(
        &self,
        _branch: &str,
        _filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        Err(self.unsupported())
    }

    async fn unversioned_dependencies(
        &self,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", self.path.display()), e))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| SwiftpackError::io("reading directory entry", e))?
        {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }

        let name = select_manifest(
            entries.iter().map(String::as_str),
            &self.current_tools_version,
        )
        .ok_or_else(|| SwiftpackError::ManifestNotFound(self.path.clone()))?;

        let manifest_path = self.path.join(&name);
        let contents = tokio::fs::read(&manifest_path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", manifest_path.display()), e))?;
        let tools = ToolsVersion::parse_manifest(&contents)?;
        if !tools.is_supported_by(&self.current_tools_version) {
            return Err(SwiftpackError::UnsupportedToolsVersion {
                package: self.reference.identity.to_string(),
                required: tools,
                minimum: ToolsVersion::MINIMUM_SUPPORTED,
                current: self.current_tools_version,
            });
        }

        let manifest = self
            .manifest_loader
            .load(
                &self.reference.identity,
                &self.reference.kind,
                manifest_path,
                &contents,
                tools,
                None,
            )
            .await?;
        Ok(manifest.dependencies_required(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::JsonManifestLoader;
    use crate::repository::manager::RepositoryManagerConfig;
    use crate::repository::memory::{InMemoryRepositoryProvider, ScriptedRepository};

    const URL: &str = "https://example.com/dep.git";

    fn manifest(tools: &str, body: &str) -> Vec<u8> {
        format!("// swift-tools-version:{tools}\n{body}").into_bytes()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        provider: ContainerProvider,
        reference: PackageReference,
    }

    async fn fixture_with(
        scripted: ScriptedRepository,
        current: ToolsVersion,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo_provider = InMemoryRepositoryProvider::new();
        let specifier = RepositorySpecifier::Url(URL.to_string());
        repo_provider.add(&specifier, scripted);

        let config = RepositoryManagerConfig::new(
            dir.path().join("repositories"),
            dir.path().join("checkouts-state.json"),
        );
        let manager =
            Arc::new(crate::repository::RepositoryManager::new(config, Arc::new(repo_provider), None).await);
        let provider = ContainerProvider::new(manager, Arc::new(JsonManifestLoader), current);
        Fixture {
            _dir: dir,
            provider,
            reference: PackageReference::remote_source_control(URL),
        }
    }

    fn versions(raw: &[&str]) -> Vec<Version> {
        raw.iter().map(|v| Version::parse(v).unwrap()).collect()
    }

    #[tokio::test]
    async fn v_prefixed_tags_descending() {
        let mut repo = ScriptedRepository::new();
        for tag in ["v1.0.0", "v1.0.1", "v1.0.2", "v1.0.3", "v2.0.3"] {
            repo.add_tag(tag, "rev");
        }
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert_eq!(
            container.appropriate_versions_descending().await.unwrap(),
            versions(&["2.0.3", "1.0.3", "1.0.2", "1.0.1", "1.0.0"])
        );
    }

    #[tokio::test]
    async fn tools_version_filters_versions() {
        let mut repo = ScriptedRepository::new();
        for (tag, revision, tools) in [
            ("1.0.0", "r0", "3.1"),
            ("1.0.1", "r1", "4.0"),
            ("1.0.2", "r2", "4.2"),
            ("1.0.3", "r3", "4.2"),
        ] {
            repo.add_tag(tag, revision);
            repo.add_file(revision, "Package.swift", manifest(tools, r#"{ "name": "dep" }"#));
        }

        let fx = fixture_with(repo, ToolsVersion::new(4, 2, 0)).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert_eq!(
            container.appropriate_versions_descending().await.unwrap(),
            versions(&["1.0.3", "1.0.2", "1.0.1"])
        );
    }

    #[tokio::test]
    async fn old_host_admits_nothing() {
        let mut repo = ScriptedRepository::new();
        for (tag, revision, tools) in [
            ("1.0.0", "r0", "3.1"),
            ("1.0.1", "r1", "4.0"),
            ("1.0.2", "r2", "4.2"),
        ] {
            repo.add_tag(tag, revision);
            repo.add_file(revision, "Package.swift", manifest(tools, r#"{ "name": "dep" }"#));
        }

        let fx = fixture_with(repo, ToolsVersion::new(3, 0, 0)).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert!(container
            .appropriate_versions_descending()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn prereleases_are_included_and_ordered() {
        let mut repo = ScriptedRepository::new();
        for tag in [
            "1.0.0-alpha.1",
            "1.0.0-beta.1",
            "1.0.0",
            "1.0.1",
            "1.0.2-dev",
            "1.0.2-dev.2",
            "1.0.4-alpha",
        ] {
            repo.add_tag(tag, "rev");
        }
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert_eq!(
            container.appropriate_versions_descending().await.unwrap(),
            versions(&[
                "1.0.4-alpha",
                "1.0.2-dev.2",
                "1.0.2-dev",
                "1.0.1",
                "1.0.0",
                "1.0.0-beta.1",
                "1.0.0-alpha.1",
            ])
        );
    }

    #[tokio::test]
    async fn equivalent_tags_emit_each_version_once() {
        let mut repo = ScriptedRepository::new();
        for tag in [
            "v1.0.0", "1.0.0", "v1.1.0", "1.1.0", "1.1", "1.2", "1.3", "1.3.0", "1.0.1",
            "v1.0.2", "1.0.4", "v2.0.1",
        ] {
            repo.add_tag(tag, "rev");
        }
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert_eq!(
            container.appropriate_versions_descending().await.unwrap(),
            versions(&[
                "2.0.1", "1.3.0", "1.2.0", "1.1.0", "1.0.4", "1.0.2", "1.0.1", "1.0.0",
            ])
        );
    }

    const FILTERED_MANIFEST: &str = r#"{
  "name": "dep",
  "dependencies": [
    { "identity": "tool-dep",
      "location": { "sourceControl": "https://example.com/tool-dep.git" },
      "requirement": { "range": { "lower": "1.0.0", "upper": "2.0.0" } } }
  ],
  "products": [ { "name": "P", "targets": ["T"] } ],
  "targets": [ { "name": "T", "dependencies": [ { "byName": "tool-dep" } ] } ]
}"#;

    #[tokio::test]
    async fn dependency_cache_is_keyed_by_product_filter() {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev");
        repo.add_file("rev", "Package.swift", manifest("5.5", FILTERED_MANIFEST));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();
        let version = Version::new(1, 0, 0);

        // Prime the cache with one filter, then ask with another; a cache
        // keyed by version alone would hand back stale results here.
        let with_product = container
            .dependencies_at_version(&version, &ProductFilter::specific(["P"]))
            .await
            .unwrap();
        let empty_filter = container
            .dependencies_at_version(&version, &ProductFilter::specific(Vec::<String>::new()))
            .await
            .unwrap();
        let everything = container
            .dependencies_at_version(&version, &ProductFilter::Everything)
            .await
            .unwrap();

        assert_eq!(with_product.len(), 1);
        assert!(empty_filter.is_empty());
        assert_eq!(everything, with_product);

        // Asking again in reverse order yields identical answers
        assert!(container
            .dependencies_at_version(&version, &ProductFilter::specific(Vec::<String>::new()))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            container
                .dependencies_at_version(&version, &ProductFilter::specific(["P"]))
                .await
                .unwrap(),
            with_product
        );
    }

    #[tokio::test]
    async fn missing_branch_suggests_closest() {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev");
        repo.add_branch("main", "rev");
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();

        let err = container
            .dependencies_at_branch("master", &ProductFilter::Everything)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("master"));
        assert!(message.contains("main"));
    }

    #[tokio::test]
    async fn missing_revision_is_a_distinct_error() {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev");
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();

        let err = container
            .dependencies_at_revision("deadbeef", &ProductFilter::Everything)
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftpackError::NoSuchRevision(r) if r == "deadbeef"));
    }

    #[tokio::test]
    async fn unreadable_tools_version_surfaces_wrapped() {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev");
        repo.add_file("rev", "Package.swift", manifest("9.0", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let container = fx.provider.get_container(&fx.reference, true).await.unwrap();

        let err = container
            .dependencies_at_version(&Version::new(1, 0, 0), &ProductFilter::Everything)
            .await
            .unwrap_err();
        match err {
            SwiftpackError::GetDependencies { repository, source, .. } => {
                assert_eq!(repository, URL);
                assert!(matches!(
                    *source,
                    SwiftpackError::UnsupportedToolsVersion { .. }
                ));
            }
            other => panic!("expected GetDependencies, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registry_references_are_rejected() {
        let repo = ScriptedRepository::new();
        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;

        let reference = PackageReference::registry("scope.name");
        let err = match fx.provider.get_container(&reference, true).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, SwiftpackError::UnsupportedPackageKind { .. }));
    }

    #[tokio::test]
    async fn containers_are_cached_by_identity() {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev");
        repo.add_file("rev", "Package.swift", manifest("5.5", r#"{ "name": "dep" }"#));

        let fx = fixture_with(repo, ToolsVersion::CURRENT).await;
        let first = fx.provider.get_container(&fx.reference, true).await.unwrap();
        let second = fx.provider.get_container(&fx.reference, true).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn file_system_container_reads_local_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("local-pkg");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("Package.swift"), manifest("5.5", FILTERED_MANIFEST)).unwrap();

        let repo_provider = InMemoryRepositoryProvider::new();
        let config = RepositoryManagerConfig::new(
            dir.path().join("repositories"),
            dir.path().join("checkouts-state.json"),
        );
        let manager = Arc::new(
            crate::repository::RepositoryManager::new(config, Arc::new(repo_provider), None).await,
        );
        let provider =
            ContainerProvider::new(manager, Arc::new(JsonManifestLoader), ToolsVersion::CURRENT);

        let reference = PackageReference::file_system(&pkg);
        let container = provider.get_container(&reference, true).await.unwrap();

        assert!(container.versions_descending().await.unwrap().is_empty());
        let deps = container
            .unversioned_dependencies(&ProductFilter::Everything)
            .await
            .unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].identity, PackageIdentity::plain("tool-dep"));
    }
}

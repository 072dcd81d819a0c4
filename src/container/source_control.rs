//! Source-control package container
//!
//! Versions come from tags: a tag is a candidate when it parses as a
//! semantic version (optional `v` prefix, one to three components), and a
//! candidate is admitted when the manifest at its revision declares a
//! readable tools version. Both the admission verdicts and the dependency
//! projections are memoized; the dependency cache is keyed by revision
//! *and* product filter.

use crate::container::PackageContainer;
use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::{
    select_manifest, ManifestLoader, PackageDependency, ProductFilter, ToolsVersion,
};
use crate::package::PackageReference;
use crate::repository::{Repository, RepositorySpecifier};
use async_trait::async_trait;
use semver::Version;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

/// Parse a source-control tag as a version.
///
/// An optional `v` prefix is stripped and missing minor/patch components
/// default to zero, so `1.1`, `1.1.0`, and `v1.1.0` all denote the same
/// version.
pub fn parse_tag(tag: &str) -> Option<Version> {
    let text = tag.strip_prefix('v').unwrap_or(tag);
    if let Ok(version) = Version::parse(text) {
        return Some(version);
    }

    let split = text.find(['-', '+']).unwrap_or(text.len());
    let (base, rest) = text.split_at(split);
    let padded = match base.matches('.').count() {
        0 => format!("{base}.0.0"),
        1 => format!("{base}.0"),
        _ => return None,
    };
    Version::parse(&format!("{padded}{rest}")).ok()
}

/// Number of numeric components spelled out in a tag
fn tag_component_count(tag: &str) -> usize {
    let text = tag.strip_prefix('v').unwrap_or(tag);
    let split = text.find(['-', '+']).unwrap_or(text.len());
    text[..split].matches('.').count() + 1
}

/// The closest branch name within an edit distance of two.
///
/// The `master`/`main` pair is far beyond that distance but is by far the
/// most common mismatch after the default-branch rename, so it is mapped
/// explicitly.
fn closest_branch(name: &str, branches: &[String]) -> Option<String> {
    let renamed = match name {
        "master" => Some("main"),
        "main" => Some("master"),
        _ => None,
    };
    if let Some(renamed) = renamed {
        if branches.iter().any(|b| b == renamed) {
            return Some(renamed.to_string());
        }
    }

    branches
        .iter()
        .filter(|b| b.as_str() != name)
        .map(|b| (strsim::levenshtein(name, b), b))
        .filter(|(distance, _)| *distance <= 2)
        .min_by_key(|(distance, b)| (*distance, b.len(), (*b).clone()))
        .map(|(_, b)| b.clone())
}

type DependencyCacheKey = (String, ProductFilter);

/// Container over a managed bare clone
pub struct SourceControlPackageContainer {
    reference: PackageReference,
    specifier: RepositorySpecifier,
    repository: Box<dyn Repository>,
    manifest_loader: Arc<dyn ManifestLoader>,
    current_tools_version: ToolsVersion,
    known_versions: OnceCell<BTreeMap<Version, String>>,
    admission: Mutex<HashMap<Version, bool>>,
    dependencies: Mutex<HashMap<DependencyCacheKey, Vec<PackageDependency>>>,
}

impl SourceControlPackageContainer {
    pub fn new(
        reference: PackageReference,
        specifier: RepositorySpecifier,
        repository: Box<dyn Repository>,
        manifest_loader: Arc<dyn ManifestLoader>,
        current_tools_version: ToolsVersion,
    ) -> Self {
        Self {
            reference,
            specifier,
            repository,
            manifest_loader,
            current_tools_version,
            known_versions: OnceCell::new(),
            admission: Mutex::new(HashMap::new()),
            dependencies: Mutex::new(HashMap::new()),
        }
    }

    /// Version → tag map over all parsable tags.
    ///
    /// When several tags parse to the same version, the most explicit
    /// spelling wins (more components, then the unprefixed form).
    async fn known_versions(&self) -> SwiftpackResult<&BTreeMap<Version, String>> {
        self.known_versions
            .get_or_try_init(|| async {
                let tags = self.repository.tags().await?;
                let mut known: BTreeMap<Version, String> = BTreeMap::new();
                for tag in tags {
                    let Some(version) = parse_tag(&tag) else {
                        continue;
                    };
                    let replace = match known.get(&version) {
                        Some(existing) => prefer_tag(&tag, existing),
                        None => true,
                    };
                    if replace {
                        known.insert(version, tag);
                    }
                }
                Ok(known)
            })
            .await
    }

    /// Whether the manifest at `tag`'s revision declares a readable tools
    /// version, memoized per candidate version
    async fn is_admitted(&self, version: &Version, tag: &str) -> SwiftpackResult<bool> {
        if let Some(verdict) = self.admission.lock().unwrap().get(version) {
            return Ok(*verdict);
        }

        let verdict = match self.tools_version_at_tag(tag).await {
            Ok(tools) => tools.is_supported_by(&self.current_tools_version),
            Err(e) => {
                debug!("Skipping {}@{version}: {e}", self.reference.identity);
                false
            }
        };
        self.admission
            .lock()
            .unwrap()
            .insert(version.clone(), verdict);
        Ok(verdict)
    }

    async fn tools_version_at_tag(&self, tag: &str) -> SwiftpackResult<ToolsVersion> {
        let revision = self.repository.resolve_revision(tag).await?;
        let (_, contents) = self.manifest_bytes(&revision).await?;
        ToolsVersion::parse_manifest(&contents)
    }

    /// Locate and read the manifest to use at `revision`
    async fn manifest_bytes(&self, revision: &str) -> SwiftpackResult<(PathBuf, Vec<u8>)> {
        let entries = self.repository.list_directory(revision, Path::new("")).await?;
        let name = select_manifest(
            entries.iter().map(String::as_str),
            &self.current_tools_version,
        )
        .ok_or_else(|| SwiftpackError::ManifestNotFound(PathBuf::from(revision)))?;
        let path = PathBuf::from(name);
        let contents = self.repository.read_file(revision, &path).await?;
        Ok((path, contents))
    }

    async fn dependencies_at(
        &self,
        revision: &str,
        filter: &ProductFilter,
        version: Option<Version>,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        let key = (revision.to_string(), filter.clone());
        if let Some(cached) = self.dependencies.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let projected = self
            .load_dependencies(revision, filter, version)
            .await
            .map_err(|e| {
                SwiftpackError::get_dependencies(self.specifier.location(), revision, e)
            })?;
        self.dependencies
            .lock()
            .unwrap()
            .insert(key, projected.clone());
        Ok(projected)
    }

    async fn load_dependencies(
        &self,
        revision: &str,
        filter: &ProductFilter,
        version: Option<Version>,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        let (path, contents) = self.manifest_bytes(revision).await?;
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
                path,
                &contents,
                tools,
                version,
            )
            .await?;
        Ok(manifest.dependencies_required(filter))
    }
}

/// Whether `candidate` should replace `existing` as the spelling of a
/// version both tags parse to
fn prefer_tag(candidate: &str, existing: &str) -> bool {
    let candidate_rank = (
        tag_component_count(candidate),
        !candidate.starts_with('v') as usize,
    );
    let existing_rank = (
        tag_component_count(existing),
        !existing.starts_with('v') as usize,
    );
    candidate_rank > existing_rank
}

#[async_trait]
impl PackageContainer for SourceControlPackageContainer {
    fn package_reference(&self) -> &PackageReference {
        &self.reference
    }

    async fn versions_descending(&self) -> SwiftpackResult<Vec<Version>> {
        Ok(self
            .known_versions()
            .await?
            .keys()
            .rev()
            .cloned()
            .collect())
    }

    async fn appropriate_versions_descending(&self) -> SwiftpackResult<Vec<Version>> {
        let known = self.known_versions().await?;
        let mut admitted = Vec::new();
        for (version, tag) in known.iter().rev() {
            if self.is_admitted(version, tag).await? {
                admitted.push(version.clone());
            }
        }
        Ok(admitted)
    }

    async fn get_revision(&self, tag: &str) -> SwiftpackResult<String> {
        let tags = self.repository.tags().await?;
        if !tags.iter().any(|t| t == tag) {
            return Err(SwiftpackError::NoSuchTag(tag.to_string()));
        }
        self.repository.resolve_revision(tag).await
    }

    async fn tag_for_version(&self, version: &Version) -> SwiftpackResult<String> {
        self.known_versions()
            .await?
            .get(version)
            .cloned()
            .ok_or_else(|| SwiftpackError::UnknownVersion {
                package: self.reference.identity.to_string(),
                version: version.to_string(),
            })
    }

    async fn dependencies_at_version(
        &self,
        version: &Version,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        let tag = self.tag_for_version(version).await?;
        let revision = self.repository.resolve_revision(&tag).await?;
        self.dependencies_at(&revision, filter, Some(version.clone()))
            .await
    }

    async fn dependencies_at_revision(
        &self,
        revision: &str,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        if !self.repository.has_revision(revision).await? {
            return Err(SwiftpackError::NoSuchRevision(revision.to_string()));
        }
        self.dependencies_at(revision, filter, None).await
    }

    async fn dependencies_at_branch(
        &self,
        branch: &str,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        let branches = self.repository.branches().await?;
        if !branches.iter().any(|b| b == branch) {
            return Err(SwiftpackError::NoSuchBranch {
                name: branch.to_string(),
                suggestion: closest_branch(branch, &branches),
            });
        }
        let revision = self.repository.resolve_revision(branch).await?;
        self.dependencies_at(&revision, filter, None).await
    }

    async fn unversioned_dependencies(
        &self,
        _filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>> {
        Err(SwiftpackError::UnsupportedPackageKind {
            identity: self.reference.identity.to_string(),
            kind: self.reference.kind.name().to_string(),
        })
    }
}

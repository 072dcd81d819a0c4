//! Package containers
//!
//! A container is the per-package view resolution works against: the
//! versions a package offers, the revision a tag resolves to, and the
//! dependency constraints its manifest declares at a given position,
//! projected under a product filter.

pub mod provider;
pub mod source_control;

pub use provider::ContainerProvider;
pub use source_control::SourceControlPackageContainer;

use crate::error::SwiftpackResult;
use crate::manifest::{PackageDependency, ProductFilter};
use crate::package::PackageReference;
use async_trait::async_trait;
use semver::Version;

/// Per-package view over versions, revisions, and dependency constraints
#[async_trait]
pub trait PackageContainer: Send + Sync {
    fn package_reference(&self) -> &PackageReference;

    /// Every version a tag parses to, descending, without the tools gate
    async fn versions_descending(&self) -> SwiftpackResult<Vec<Version>>;

    /// Versions whose manifests are readable under the current tools
    /// version, descending. Pre-releases are included.
    async fn appropriate_versions_descending(&self) -> SwiftpackResult<Vec<Version>>;

    /// Resolve a tag to a revision id
    async fn get_revision(&self, tag: &str) -> SwiftpackResult<String>;

    /// The tag a known version was parsed from
    async fn tag_for_version(&self, version: &Version) -> SwiftpackResult<String>;

    /// Dependency constraints declared at a released version
    async fn dependencies_at_version(
        &self,
        version: &Version,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>>;

    /// Dependency constraints declared at a bare revision
    async fn dependencies_at_revision(
        &self,
        revision: &str,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>>;

    /// Dependency constraints declared at the tip of a branch
    async fn dependencies_at_branch(
        &self,
        branch: &str,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>>;

    /// Dependency constraints of an unversioned (local) package
    async fn unversioned_dependencies(
        &self,
        filter: &ProductFilter,
    ) -> SwiftpackResult<Vec<PackageDependency>>;
}

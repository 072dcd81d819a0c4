//! Manifest model and loader seam
//!
//! The manifest grammar itself is not interpreted here; an external
//! [`ManifestLoader`] turns manifest bytes into the [`Manifest`] model.
//! This module owns the model, the product-filter projection over declared
//! dependencies, and a JSON-bodied loader used by tooling and tests.

pub mod tools_version;

pub use tools_version::{select_manifest, ToolsVersion, MANIFEST_FILENAME};

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::package::{PackageIdentity, PackageKind};
use async_trait::async_trait;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Restriction on which products of a dependency are in scope.
///
/// The filter participates in dependency-cache keys; see
/// [`crate::container::source_control`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProductFilter {
    /// All products are in scope
    Everything,
    /// Only the named products are in scope
    Specific(BTreeSet<String>),
}

impl ProductFilter {
    pub fn specific<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Specific(names.into_iter().map(Into::into).collect())
    }
}

/// Version requirement of a declared dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyRequirement {
    /// Half-open range `lower ..< upper`
    Range { lower: Version, upper: Version },
    Exact(Version),
    Branch(String),
    Revision(String),
    /// Local packages have no version requirement
    Unversioned,
}

impl DependencyRequirement {
    /// `from ..< (from.major + 1).0.0`
    pub fn up_to_next_major(from: Version) -> Self {
        let upper = Version::new(from.major + 1, 0, 0);
        Self::Range { lower: from, upper }
    }

    /// Whether a concrete version satisfies this requirement
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            Self::Range { lower, upper } => version >= lower && version < upper,
            Self::Exact(v) => version == v,
            Self::Branch(_) | Self::Revision(_) | Self::Unversioned => false,
        }
    }
}

/// Where a declared dependency lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependencyLocation {
    FileSystem(PathBuf),
    SourceControl(String),
    Registry(String),
}

/// A dependency declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDependency {
    pub identity: PackageIdentity,
    pub location: DependencyLocation,
    pub requirement: DependencyRequirement,
}

/// A product advertised by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDescription {
    pub name: String,
    /// Names of the targets composing this product
    pub targets: Vec<String>,
}

/// Reference from a target to something it builds against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetDependency {
    /// Another target in the same package
    Target(String),
    /// A product, optionally qualified with the declaring package
    Product {
        name: String,
        package: Option<String>,
    },
    /// Either a local target or a same-named external package
    ByName(String),
}

/// A target declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescription {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<TargetDependency>,
}

/// Supported platform declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescription {
    pub name: String,
    pub version: String,
}

/// The loaded manifest model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub display_name: String,
    pub identity: PackageIdentity,
    /// Path of the manifest file this model was loaded from
    pub path: PathBuf,
    pub platforms: Vec<PlatformDescription>,
    pub tools_version: ToolsVersion,
    pub dependencies: Vec<PackageDependency>,
    pub products: Vec<ProductDescription>,
    pub targets: Vec<TargetDescription>,
    /// Release version, when loaded from a tagged revision
    pub version: Option<Version>,
}

impl Manifest {
    /// Project the declared dependencies under a product filter.
    ///
    /// With `Everything`, all declared dependencies participate. With a
    /// specific filter, only dependencies reachable from the targets of the
    /// kept products do: the target closure is walked, and every product or
    /// by-name reference that resolves to a declared dependency keeps it.
    pub fn dependencies_required(&self, filter: &ProductFilter) -> Vec<PackageDependency> {
        let products = match filter {
            ProductFilter::Everything => return self.dependencies.clone(),
            ProductFilter::Specific(names) => names,
        };

        let mut required: BTreeSet<PackageIdentity> = BTreeSet::new();
        for target in self.target_closure(products) {
            for dep in &target.dependencies {
                match dep {
                    TargetDependency::Target(_) => {}
                    TargetDependency::Product { package, name } => {
                        let key = package.as_deref().unwrap_or(name);
                        if let Some(found) = self.declared_dependency(key) {
                            required.insert(found.identity.clone());
                        }
                    }
                    TargetDependency::ByName(name) => {
                        if self.target(name).is_none() {
                            if let Some(found) = self.declared_dependency(name) {
                                required.insert(found.identity.clone());
                            }
                        }
                    }
                }
            }
        }

        self.dependencies
            .iter()
            .filter(|d| required.contains(&d.identity))
            .cloned()
            .collect()
    }

    /// Targets reachable from the given products, in declaration order
    fn target_closure(&self, products: &BTreeSet<String>) -> Vec<&TargetDescription> {
        let mut pending: Vec<&str> = self
            .products
            .iter()
            .filter(|p| products.contains(&p.name))
            .flat_map(|p| p.targets.iter().map(String::as_str))
            .collect();
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut closure = Vec::new();

        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(target) = self.target(name) else {
                continue;
            };
            closure.push(target);
            for dep in &target.dependencies {
                match dep {
                    TargetDependency::Target(t) => pending.push(t),
                    TargetDependency::ByName(n) if self.target(n).is_some() => pending.push(n),
                    _ => {}
                }
            }
        }
        closure
    }

    fn target(&self, name: &str) -> Option<&TargetDescription> {
        self.targets.iter().find(|t| t.name == name)
    }

    fn declared_dependency(&self, name: &str) -> Option<&PackageDependency> {
        let identity = PackageIdentity::plain(name);
        self.dependencies.iter().find(|d| d.identity == identity)
    }
}

/// Turns manifest bytes into the manifest model.
///
/// Implementations interpret the manifest grammar; the workspace core only
/// hands them the bytes read at a concrete revision plus the already-parsed
/// tools version.
#[async_trait]
pub trait ManifestLoader: Send + Sync {
    async fn load(
        &self,
        identity: &PackageIdentity,
        kind: &PackageKind,
        path: PathBuf,
        contents: &[u8],
        tools_version: ToolsVersion,
        version: Option<Version>,
    ) -> SwiftpackResult<Manifest>;
}

/// Manifest body as parsed by [`JsonManifestLoader`]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawManifest {
    name: String,
    #[serde(default)]
    platforms: Vec<PlatformDescription>,
    #[serde(default)]
    dependencies: Vec<PackageDependency>,
    #[serde(default)]
    products: Vec<ProductDescription>,
    #[serde(default)]
    targets: Vec<TargetDescription>,
}

/// Loader for manifests whose body (everything after the tools-version
/// line) is a JSON document.
///
/// Evaluating real manifests requires the toolchain; this loader covers
/// tooling and the test suites, which is all the core needs in-tree.
#[derive(Debug, Default)]
pub struct JsonManifestLoader;

#[async_trait]
impl ManifestLoader for JsonManifestLoader {
    async fn load(
        &self,
        identity: &PackageIdentity,
        _kind: &PackageKind,
        path: PathBuf,
        contents: &[u8],
        tools_version: ToolsVersion,
        version: Option<Version>,
    ) -> SwiftpackResult<Manifest> {
        let text =
            std::str::from_utf8(contents).map_err(|_| SwiftpackError::ManifestInvalid {
                identity: identity.to_string(),
                reason: "manifest is not valid UTF-8".to_string(),
            })?;
        let body = match text.find('\n') {
            Some(idx) => &text[idx + 1..],
            None => "",
        };

        let raw: RawManifest =
            serde_json::from_str(body).map_err(|e| SwiftpackError::ManifestInvalid {
                identity: identity.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Manifest {
            display_name: raw.name,
            identity: identity.clone(),
            path,
            platforms: raw.platforms,
            tools_version,
            dependencies: raw.dependencies,
            products: raw.products,
            targets: raw.targets,
            version,
        })
    }
}

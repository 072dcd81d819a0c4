//! Dependency resolution seam
//!
//! The version solver proper is an external collaborator; the workspace
//! consumes it through [`DependencyResolver`] as an oracle that turns
//! constraints into bindings. [`HighestVersionResolver`] is the built-in
//! oracle used by the CLI and the test suites: first-come-wins,
//! highest-admissible-version, no backtracking.

use crate::container::ContainerProvider;
use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::{
    DependencyLocation, DependencyRequirement, PackageDependency, ProductFilter,
};
use crate::package::{PackageIdentity, PackageReference};
use async_trait::async_trait;
use semver::Version;
use std::collections::{BTreeMap, VecDeque};

/// One requirement handed to the resolver
#[derive(Debug, Clone)]
pub struct DependencyConstraint {
    pub package_ref: PackageReference,
    pub requirement: DependencyRequirement,
    pub products: ProductFilter,
}

/// The position a package was bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundVersion {
    Version(Version),
    Branch(String),
    Revision(String),
    /// Local packages resolve without a version
    Unversioned,
}

/// One package's resolution outcome
#[derive(Debug, Clone)]
pub struct ResolutionBinding {
    pub package_ref: PackageReference,
    pub binding: BoundVersion,
    pub products: ProductFilter,
}

/// Oracle turning constraints into bindings
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve(
        &self,
        containers: &ContainerProvider,
        constraints: Vec<DependencyConstraint>,
    ) -> SwiftpackResult<Vec<ResolutionBinding>>;
}

/// Build a constraint from a declared dependency
pub fn constraint_for(dependency: &PackageDependency, products: ProductFilter) -> DependencyConstraint {
    let package_ref = match &dependency.location {
        DependencyLocation::FileSystem(path) => PackageReference::file_system(path.clone()),
        DependencyLocation::SourceControl(location) => {
            if location.starts_with('/') {
                PackageReference::local_source_control(location)
            } else {
                PackageReference::remote_source_control(location.clone())
            }
        }
        DependencyLocation::Registry(identity) => PackageReference::registry(identity.clone()),
    };
    DependencyConstraint {
        package_ref,
        requirement: dependency.requirement.clone(),
        products,
    }
}

/// Breadth-first, highest-version, no-backtracking resolver.
///
/// Good enough to drive the workspace and its tooling; a real SAT-style
/// solver plugs in through the same trait.
#[derive(Debug, Default)]
pub struct HighestVersionResolver;

#[async_trait]
impl DependencyResolver for HighestVersionResolver {
    async fn resolve(
        &self,
        containers: &ContainerProvider,
        constraints: Vec<DependencyConstraint>,
    ) -> SwiftpackResult<Vec<ResolutionBinding>> {
        let mut queue: VecDeque<DependencyConstraint> = constraints.into();
        let mut resolved: BTreeMap<PackageIdentity, ResolutionBinding> = BTreeMap::new();

        while let Some(constraint) = queue.pop_front() {
            let identity = constraint.package_ref.identity.clone();

            if let Some(existing) = resolved.get(&identity) {
                check_compatible(existing, &constraint)?;
                continue;
            }

            let container = containers.get_container(&constraint.package_ref, true).await?;
            let (binding, dependencies) = match &constraint.requirement {
                DependencyRequirement::Range { .. } | DependencyRequirement::Exact(_) => {
                    let versions = container.appropriate_versions_descending().await?;
                    let Some(version) = versions
                        .into_iter()
                        .find(|v| constraint.requirement.satisfies(v))
                    else {
                        return Err(SwiftpackError::ResolutionFailed {
                            package: identity.to_string(),
                            reason: format!(
                                "no admissible version satisfies {:?}",
                                constraint.requirement
                            ),
                        });
                    };
                    let dependencies = container
                        .dependencies_at_version(&version, &constraint.products)
                        .await?;
                    (BoundVersion::Version(version), dependencies)
                }
                DependencyRequirement::Branch(branch) => {
                    let dependencies = container
                        .dependencies_at_branch(branch, &constraint.products)
                        .await?;
                    (BoundVersion::Branch(branch.clone()), dependencies)
                }
                DependencyRequirement::Revision(revision) => {
                    let dependencies = container
                        .dependencies_at_revision(revision, &constraint.products)
                        .await?;
                    (BoundVersion::Revision(revision.clone()), dependencies)
                }
                DependencyRequirement::Unversioned => {
                    let dependencies = container
                        .unversioned_dependencies(&constraint.products)
                        .await?;
                    (BoundVersion::Unversioned, dependencies)
                }
            };

            resolved.insert(
                identity,
                ResolutionBinding {
                    package_ref: constraint.package_ref.clone(),
                    binding,
                    products: constraint.products.clone(),
                },
            );
            for dependency in &dependencies {
                queue.push_back(constraint_for(dependency, ProductFilter::Everything));
            }
        }

        Ok(resolved.into_values().collect())
    }
}

/// A later constraint must accept the binding the first one produced
fn check_compatible(
    existing: &ResolutionBinding,
    constraint: &DependencyConstraint,
) -> SwiftpackResult<()> {
    let compatible = match (&existing.binding, &constraint.requirement) {
        (BoundVersion::Version(bound), requirement) => requirement.satisfies(bound),
        (BoundVersion::Branch(bound), DependencyRequirement::Branch(wanted)) => bound == wanted,
        (BoundVersion::Revision(bound), DependencyRequirement::Revision(wanted)) => {
            bound == wanted
        }
        (BoundVersion::Unversioned, DependencyRequirement::Unversioned) => true,
        _ => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(SwiftpackError::ResolutionFailed {
            package: existing.package_ref.identity.to_string(),
            reason: format!(
                "already bound to {:?}, which does not satisfy {:?}",
                existing.binding, constraint.requirement
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_builds_reference_from_location() {
        let dependency = PackageDependency {
            identity: PackageIdentity::plain("dep"),
            location: DependencyLocation::SourceControl("https://example.com/dep.git".to_string()),
            requirement: DependencyRequirement::up_to_next_major(Version::new(1, 0, 0)),
        };
        let constraint = constraint_for(&dependency, ProductFilter::Everything);
        assert_eq!(constraint.package_ref.identity, PackageIdentity::plain("dep"));
        assert!(matches!(
            constraint.package_ref.kind,
            crate::package::PackageKind::RemoteSourceControl(_)
        ));

        let local = PackageDependency {
            identity: PackageIdentity::plain("local"),
            location: DependencyLocation::SourceControl("/srv/git/local".to_string()),
            requirement: DependencyRequirement::Unversioned,
        };
        assert!(matches!(
            constraint_for(&local, ProductFilter::Everything).package_ref.kind,
            crate::package::PackageKind::LocalSourceControl(_)
        ));
    }

    #[test]
    fn compatibility_check() {
        let binding = ResolutionBinding {
            package_ref: PackageReference::remote_source_control("https://example.com/dep.git"),
            binding: BoundVersion::Version(Version::new(1, 2, 0)),
            products: ProductFilter::Everything,
        };

        let satisfied = DependencyConstraint {
            package_ref: binding.package_ref.clone(),
            requirement: DependencyRequirement::up_to_next_major(Version::new(1, 0, 0)),
            products: ProductFilter::Everything,
        };
        assert!(check_compatible(&binding, &satisfied).is_ok());

        let conflicting = DependencyConstraint {
            package_ref: binding.package_ref.clone(),
            requirement: DependencyRequirement::Exact(Version::new(1, 0, 0)),
            products: ProductFilter::Everything,
        };
        assert!(matches!(
            check_compatible(&binding, &conflicting),
            Err(SwiftpackError::ResolutionFailed { .. })
        ));
    }
}

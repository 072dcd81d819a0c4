//! Workspace facade
//!
//! Binds storage, the repository manager, the container provider, and the
//! plugin machinery into the operations callers drive: resolve the root
//! package's dependencies into checkouts and pins, materialize individual
//! checkouts, and purge or reset the on-disk tree.

pub mod resolver;

pub use resolver::{
    constraint_for, BoundVersion, DependencyConstraint, DependencyResolver,
    HighestVersionResolver, ResolutionBinding,
};

use crate::config::{MirrorConfiguration, WorkspaceLocation};
use crate::container::ContainerProvider;
use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::{Manifest, ManifestLoader, ProductFilter, ToolsVersion};
use crate::package::{PackageIdentity, PackageKind, PackageReference};
use crate::plugin::{PluginScriptCompiler, PluginScriptRunner, ToolchainConfig};
use crate::repository::manager::RepositoryManagerConfig;
use crate::repository::{
    RepositoryManager, RepositoryManagerDelegate, RepositoryProvider, RepositorySpecifier,
};
use crate::state::dependencies::{ManagedDependency, ManagedDependencyState};
use crate::state::{CheckoutState, Pin, PinsStorage, WorkspaceStateStorage};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Construction parameters of a [`Workspace`]
#[derive(Debug, Clone)]
pub struct WorkspaceConfiguration {
    pub location: WorkspaceLocation,

    /// Shared repository cache root; `None` disables the second tier
    pub shared_cache_dir: Option<PathBuf>,

    /// Shared mirrors file, applied when the local set is empty
    pub shared_mirrors_file: Option<PathBuf>,

    pub current_tools_version: ToolsVersion,

    /// Return known clones as-is instead of refreshing them
    pub skip_update: bool,
}

impl WorkspaceConfiguration {
    pub fn new(location: WorkspaceLocation) -> Self {
        Self {
            location,
            shared_cache_dir: crate::config::default_shared_cache_dir(),
            shared_mirrors_file: None,
            current_tools_version: ToolsVersion::CURRENT,
            skip_update: false,
        }
    }
}

/// The bound workspace
pub struct Workspace {
    location: WorkspaceLocation,
    mirrors: MirrorConfiguration,
    repository_manager: Arc<RepositoryManager>,
    container_provider: ContainerProvider,
    resolver: Arc<dyn DependencyResolver>,
    pins_storage: PinsStorage,
    state_storage: WorkspaceStateStorage,
    skip_update: bool,
}

impl Workspace {
    pub async fn new(
        config: WorkspaceConfiguration,
        provider: Arc<dyn RepositoryProvider>,
        manifest_loader: Arc<dyn ManifestLoader>,
        resolver: Arc<dyn DependencyResolver>,
        delegate: Option<Arc<dyn RepositoryManagerDelegate>>,
    ) -> SwiftpackResult<Self> {
        let mut manager_config = RepositoryManagerConfig::new(
            config.location.repositories_dir(),
            config.location.repository_state_file(),
        );
        manager_config.cache_path = config.shared_cache_dir.clone();
        let repository_manager =
            Arc::new(RepositoryManager::new(manager_config, provider, delegate).await);

        let local_mirrors =
            crate::config::DependencyMirrors::load(&config.location.mirrors_file()).await?;
        let shared_mirrors = match &config.shared_mirrors_file {
            Some(path) => crate::config::DependencyMirrors::load(path).await?,
            None => Default::default(),
        };

        let container_provider = ContainerProvider::new(
            Arc::clone(&repository_manager),
            manifest_loader,
            config.current_tools_version,
        );

        Ok(Self {
            pins_storage: PinsStorage::new(config.location.pins_file()),
            state_storage: WorkspaceStateStorage::new(config.location.workspace_state_file()),
            mirrors: MirrorConfiguration {
                local: local_mirrors,
                shared: shared_mirrors,
            },
            location: config.location,
            repository_manager,
            container_provider,
            resolver,
            skip_update: config.skip_update,
        })
    }

    pub fn location(&self) -> &WorkspaceLocation {
        &self.location
    }

    pub fn repository_manager(&self) -> &Arc<RepositoryManager> {
        &self.repository_manager
    }

    pub fn container_provider(&self) -> &ContainerProvider {
        &self.container_provider
    }

    pub fn mirrors(&self) -> &MirrorConfiguration {
        &self.mirrors
    }

    /// Plugin compiler over this workspace's plugin cache
    pub fn plugin_compiler(&self, toolchain: ToolchainConfig) -> PluginScriptCompiler {
        PluginScriptCompiler::new(toolchain, self.location.plugins_cache_dir())
    }

    /// Plugin runner over this workspace's plugin cache
    pub fn plugin_runner(&self, enable_sandbox: bool) -> PluginScriptRunner {
        PluginScriptRunner::new(self.location.plugins_cache_dir(), enable_sandbox)
    }

    /// Resolve the root manifest's dependency graph.
    ///
    /// Mirrors are applied to the root constraints, the resolver oracle
    /// produces bindings, each source-control binding is checked out, and
    /// the pins and workspace state files are rewritten.
    pub async fn resolve(
        &self,
        root: &Manifest,
    ) -> SwiftpackResult<BTreeMap<PackageIdentity, Pin>> {
        let constraints = root
            .dependencies
            .iter()
            .map(|dependency| {
                let mut dependency = dependency.clone();
                let mirrored = match &dependency.location {
                    crate::manifest::DependencyLocation::SourceControl(location) => {
                        Some(self.mirrors.apply(location))
                    }
                    _ => None,
                };
                if let Some(location) = mirrored {
                    dependency.location =
                        crate::manifest::DependencyLocation::SourceControl(location);
                }
                constraint_for(&dependency, ProductFilter::Everything)
            })
            .collect();

        let bindings = self
            .resolver
            .resolve(&self.container_provider, constraints)
            .await?;

        let mut pins = BTreeMap::new();
        let mut state = self.state_storage.load().await?;

        for binding in bindings {
            match &binding.binding {
                BoundVersion::Unversioned => {
                    state.add_dependency(ManagedDependency {
                        subpath: PathBuf::from(binding.package_ref.identity.as_str()),
                        package_ref: binding.package_ref,
                        state: ManagedDependencyState::FileSystem,
                    });
                }
                bound => {
                    let checkout_state = self.check_out(&binding.package_ref, bound).await?;
                    state.add_dependency(ManagedDependency {
                        subpath: PathBuf::from(binding.package_ref.identity.as_str()),
                        package_ref: binding.package_ref.clone(),
                        state: ManagedDependencyState::SourceControlCheckout(
                            checkout_state.clone(),
                        ),
                    });
                    pins.insert(
                        binding.package_ref.identity.clone(),
                        Pin {
                            package_ref: binding.package_ref,
                            state: checkout_state,
                        },
                    );
                }
            }
        }

        self.pins_storage.save(&pins).await?;
        self.state_storage.save(&state).await?;
        info!("Resolved {} pinned dependencies", pins.len());
        Ok(pins)
    }

    /// Materialize a working copy for a source-control binding and return
    /// the exact position checked out
    pub async fn check_out(
        &self,
        package_ref: &PackageReference,
        bound: &BoundVersion,
    ) -> SwiftpackResult<CheckoutState> {
        let specifier = match &package_ref.kind {
            PackageKind::LocalSourceControl(path) => RepositorySpecifier::Path(path.clone()),
            PackageKind::RemoteSourceControl(url) => RepositorySpecifier::Url(url.clone()),
            other => {
                return Err(SwiftpackError::UnsupportedPackageKind {
                    identity: package_ref.identity.to_string(),
                    kind: other.name().to_string(),
                })
            }
        };

        let handle = self
            .repository_manager
            .lookup(&specifier, self.skip_update)
            .await?;
        let repository = self.repository_manager.open(&handle).await?;

        let checkout_state = match bound {
            BoundVersion::Version(version) => {
                let container = self
                    .container_provider
                    .get_container(package_ref, true)
                    .await?;
                let tag = container.tag_for_version(version).await?;
                let revision = container.get_revision(&tag).await?;
                CheckoutState::Version {
                    version: version.clone(),
                    revision,
                }
            }
            BoundVersion::Branch(name) => {
                let revision = repository.resolve_revision(name).await?;
                CheckoutState::Branch {
                    name: name.clone(),
                    revision,
                }
            }
            BoundVersion::Revision(revision) => CheckoutState::Revision {
                revision: revision.clone(),
            },
            BoundVersion::Unversioned => {
                return Err(SwiftpackError::Internal(
                    "unversioned packages are not checked out".to_string(),
                ))
            }
        };

        let checkout_path = self
            .location
            .checkouts_dir()
            .join(package_ref.identity.as_str());
        let working_copy = if self
            .repository_manager
            .is_valid_directory(&checkout_path)
            .await
            .unwrap_or(false)
        {
            self.repository_manager
                .open_working_copy(&checkout_path)
                .await?
        } else {
            tokio::fs::create_dir_all(self.location.checkouts_dir())
                .await
                .map_err(|e| SwiftpackError::io("creating checkouts directory", e))?;
            self.repository_manager
                .create_working_copy(&handle, &checkout_path, false)
                .await?
        };
        working_copy.check_out(checkout_state.revision()).await?;

        Ok(checkout_state)
    }

    /// Currently pinned dependencies
    pub async fn pins(&self) -> SwiftpackResult<BTreeMap<PackageIdentity, Pin>> {
        self.pins_storage.load().await
    }

    /// Current managed-dependencies state
    pub async fn state(&self) -> SwiftpackResult<crate::state::dependencies::WorkspaceState> {
        self.state_storage.load().await
    }

    /// Delete every clone in the shared repository cache
    pub async fn purge_cache(&self) -> SwiftpackResult<()> {
        self.repository_manager.purge_cache().await
    }

    /// Drop all managed state and delete the scratch directory
    pub async fn reset(&self) -> SwiftpackResult<()> {
        self.repository_manager.reset().await?;
        match tokio::fs::remove_dir_all(&self.location.build_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SwiftpackError::io(
                format!("removing {}", self.location.build_dir.display()),
                e,
            )),
        }
    }
}

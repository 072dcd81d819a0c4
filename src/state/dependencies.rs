//! Managed dependencies and artifacts state (`workspace-state.json`)
//!
//! Records what the workspace has materialized on disk: checkouts of
//! resolved dependencies, registry downloads, edited packages, and
//! downloaded binary artifacts.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::package::{PackageIdentity, PackageReference};
use crate::state::{CheckoutState, FileLock, StoredPackageRef};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_SCHEMA: u32 = 1;

/// How a managed dependency is materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ManagedDependencyState {
    /// Checked out from a managed bare clone
    SourceControlCheckout(CheckoutState),
    /// Downloaded from a registry at a released version
    RegistryDownload(Version),
    /// Taken out of the workspace's control, optionally living at an
    /// unmanaged path
    Edited(Option<PathBuf>),
    /// A plain local package
    FileSystem,
    /// Provided by a custom mechanism
    #[serde(rename_all = "camelCase")]
    Custom { version: Version, path: PathBuf },
}

/// A dependency the workspace owns on disk
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedDependency {
    pub package_ref: PackageReference,
    pub state: ManagedDependencyState,
    /// Path of the working copy, relative to the checkouts directory
    pub subpath: PathBuf,
}

/// Where a downloaded artifact came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactSource {
    #[serde(rename_all = "camelCase")]
    Remote { url: String, checksum: String },
    #[serde(rename_all = "camelCase")]
    Local { checksum: String },
}

/// A binary artifact tracked for a target
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedArtifact {
    pub package_ref: PackageReference,
    pub target_name: String,
    pub source: ArtifactSource,
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    object: StateObject,
}

#[derive(Debug, Serialize, Deserialize)]
struct StateObject {
    dependencies: Vec<DependencyRep>,
    #[serde(default)]
    artifacts: Vec<ArtifactRep>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DependencyRep {
    #[serde(rename = "packageRef")]
    package_ref: StoredPackageRef,
    state: ManagedDependencyState,
    subpath: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactRep {
    package_ref: StoredPackageRef,
    target_name: String,
    source: ArtifactSource,
    path: String,
}

/// The in-memory view of `workspace-state.json`
#[derive(Debug, Default, Clone, PartialEq)]
pub struct WorkspaceState {
    pub dependencies: BTreeMap<PackageIdentity, ManagedDependency>,
    pub artifacts: Vec<ManagedArtifact>,
}

impl WorkspaceState {
    pub fn add_dependency(&mut self, dependency: ManagedDependency) {
        self.dependencies
            .insert(dependency.package_ref.identity.clone(), dependency);
    }

    pub fn remove_dependency(&mut self, identity: &PackageIdentity) -> Option<ManagedDependency> {
        self.dependencies.remove(identity)
    }

    pub fn dependency(&self, identity: &PackageIdentity) -> Option<&ManagedDependency> {
        self.dependencies.get(identity)
    }
}

/// Load/save of the workspace state file
#[derive(Debug)]
pub struct WorkspaceStateStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

impl WorkspaceStateStorage {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; an absent file yields an empty state
    pub async fn load(&self) -> SwiftpackResult<WorkspaceState> {
        if !self.path.exists() {
            return Ok(WorkspaceState::default());
        }

        let _lock = FileLock::shared(&self.lock_path).await?;
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", self.path.display()), e))?;
        let file: StateFile = serde_json::from_str(&content)?;

        if file.version != STATE_SCHEMA {
            return Err(SwiftpackError::StateVersionUnknown {
                path: self.path.clone(),
                version: file.version,
            });
        }

        let mut state = WorkspaceState::default();
        for rep in file.object.dependencies {
            state.add_dependency(ManagedDependency {
                package_ref: rep.package_ref.into(),
                state: rep.state,
                subpath: PathBuf::from(rep.subpath),
            });
        }
        state.artifacts = file
            .object
            .artifacts
            .into_iter()
            .map(|rep| ManagedArtifact {
                package_ref: rep.package_ref.into(),
                target_name: rep.target_name,
                source: rep.source,
                path: PathBuf::from(rep.path),
            })
            .collect();
        Ok(state)
    }

    /// Save the state under an exclusive lock
    pub async fn save(&self, state: &WorkspaceState) -> SwiftpackResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = StateFile {
            version: STATE_SCHEMA,
            object: StateObject {
                dependencies: state
                    .dependencies
                    .values()
                    .map(|dep| DependencyRep {
                        package_ref: StoredPackageRef::from(&dep.package_ref),
                        state: dep.state.clone(),
                        subpath: dep.subpath.display().to_string(),
                    })
                    .collect(),
                artifacts: state
                    .artifacts
                    .iter()
                    .map(|artifact| ArtifactRep {
                        package_ref: StoredPackageRef::from(&artifact.package_ref),
                        target_name: artifact.target_name.clone(),
                        source: artifact.source.clone(),
                        path: artifact.path.display().to_string(),
                    })
                    .collect(),
            },
        };
        let content = serde_json::to_string_pretty(&file)?;

        let _lock = FileLock::exclusive(&self.lock_path).await?;
        fs::write(&self.path, content)
            .await
            .map_err(|e| SwiftpackError::StatePersist {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }
}

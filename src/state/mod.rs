//! Durable workspace state
//!
//! Every persisted file is schema-versioned JSON with an integer
//! `version` field; loading an unknown version is a hard error. Writes
//! happen under exclusive advisory locks, reads under shared ones.

pub mod dependencies;
pub mod pins;

pub use dependencies::{ArtifactSource, ManagedArtifact, ManagedDependency, WorkspaceStateStorage};
pub use pins::{Pin, PinsStorage};

use crate::error::{SwiftpackError, SwiftpackResult};
use fs2::FileExt;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// An exact source-control position a dependency is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CheckoutStateRep", into = "CheckoutStateRep")]
pub enum CheckoutState {
    /// A released version and the revision its tag resolved to at pin time
    Version { version: Version, revision: String },
    /// A branch and the revision it pointed at
    Branch { name: String, revision: String },
    /// A bare revision
    Revision { revision: String },
}

impl CheckoutState {
    /// The revision this state points at
    pub fn revision(&self) -> &str {
        match self {
            Self::Version { revision, .. }
            | Self::Branch { revision, .. }
            | Self::Revision { revision } => revision,
        }
    }
}

/// Wire representation shared by the pins file and the workspace state
#[derive(Debug, Serialize, Deserialize)]
struct CheckoutStateRep {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    revision: String,
}

impl From<CheckoutState> for CheckoutStateRep {
    fn from(state: CheckoutState) -> Self {
        match state {
            CheckoutState::Version { version, revision } => Self {
                version: Some(version),
                branch: None,
                revision,
            },
            CheckoutState::Branch { name, revision } => Self {
                version: None,
                branch: Some(name),
                revision,
            },
            CheckoutState::Revision { revision } => Self {
                version: None,
                branch: None,
                revision,
            },
        }
    }
}

impl TryFrom<CheckoutStateRep> for CheckoutState {
    type Error = String;

    fn try_from(rep: CheckoutStateRep) -> Result<Self, Self::Error> {
        match (rep.version, rep.branch) {
            (Some(version), None) => Ok(Self::Version {
                version,
                revision: rep.revision,
            }),
            (None, Some(name)) => Ok(Self::Branch {
                name,
                revision: rep.revision,
            }),
            (None, None) => Ok(Self::Revision {
                revision: rep.revision,
            }),
            (Some(_), Some(_)) => Err("state carries both version and branch".to_string()),
        }
    }
}

/// Package reference as persisted by the pins file and the workspace
/// state: identity, kind name, and location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredPackageRef {
    pub identity: crate::package::PackageIdentity,
    pub kind: StoredPackageKind,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) enum StoredPackageKind {
    Root,
    FileSystem,
    LocalSourceControl,
    RemoteSourceControl,
    Registry,
}

impl From<&crate::package::PackageReference> for StoredPackageRef {
    fn from(reference: &crate::package::PackageReference) -> Self {
        use crate::package::PackageKind;
        let kind = match &reference.kind {
            PackageKind::Root(_) => StoredPackageKind::Root,
            PackageKind::FileSystem(_) => StoredPackageKind::FileSystem,
            PackageKind::LocalSourceControl(_) => StoredPackageKind::LocalSourceControl,
            PackageKind::RemoteSourceControl(_) => StoredPackageKind::RemoteSourceControl,
            PackageKind::Registry(_) => StoredPackageKind::Registry,
        };
        Self {
            identity: reference.identity.clone(),
            kind,
            location: reference.location(),
        }
    }
}

impl From<StoredPackageRef> for crate::package::PackageReference {
    fn from(stored: StoredPackageRef) -> Self {
        use crate::package::PackageKind;
        let kind = match stored.kind {
            StoredPackageKind::Root => PackageKind::Root(stored.location.into()),
            StoredPackageKind::FileSystem => PackageKind::FileSystem(stored.location.into()),
            StoredPackageKind::LocalSourceControl => {
                PackageKind::LocalSourceControl(stored.location.into())
            }
            StoredPackageKind::RemoteSourceControl => {
                PackageKind::RemoteSourceControl(stored.location)
            }
            StoredPackageKind::Registry => PackageKind::Registry(stored.location),
        };
        Self {
            identity: stored.identity,
            kind,
        }
    }
}

/// Advisory file lock over a lock file next to the guarded resource.
///
/// The lock is released on drop. Acquisition blocks on a worker thread so
/// async callers are not stalled.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`
    pub async fn exclusive(path: &Path) -> SwiftpackResult<Self> {
        Self::acquire(path, true).await
    }

    /// Acquire a shared lock on `path`
    pub async fn shared(path: &Path) -> SwiftpackResult<Self> {
        Self::acquire(path, false).await
    }

    async fn acquire(path: &Path, exclusive: bool) -> SwiftpackResult<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| SwiftpackError::io(format!("opening lock {}", path.display()), e))?;
            if exclusive {
                file.lock_exclusive()
            } else {
                file.lock_shared()
            }
            .map_err(|e| SwiftpackError::io(format!("locking {}", path.display()), e))?;
            Ok(Self { file, path })
        })
        .await
        .map_err(|e| SwiftpackError::Internal(format!("lock task failed: {e}")))?
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

//! Repository manager state persistence
//!
//! ```json
//! { "version": 1, "object": { "repositories": {
//!   "<location>": { "repositoryURL": "...", "subpath": "..." } } } }
//! ```
//!
//! The file lists exactly the specifiers whose bare clones under the
//! manager's working directory are ready to use.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::repository::{RepositoryHandle, RepositorySpecifier};
use crate::state::FileLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STORAGE_SCHEMA: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    object: StorageObject,
}

#[derive(Debug, Serialize, Deserialize)]
struct StorageObject {
    repositories: BTreeMap<String, StoredRepository>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRepository {
    #[serde(rename = "repositoryURL")]
    repository_url: String,
    subpath: String,
}

/// Load/save/reset of the manager's state file
#[derive(Debug)]
pub struct RepositoryManagerStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

impl RepositoryManagerStorage {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored handles; an absent file yields an empty map
    pub async fn load(&self) -> SwiftpackResult<BTreeMap<String, RepositoryHandle>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let _lock = FileLock::shared(&self.lock_path).await?;
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", self.path.display()), e))?;
        let file: StorageFile = serde_json::from_str(&content)?;

        if file.version != STORAGE_SCHEMA {
            return Err(SwiftpackError::StateVersionUnknown {
                path: self.path.clone(),
                version: file.version,
            });
        }

        Ok(file
            .object
            .repositories
            .into_iter()
            .map(|(location, stored)| {
                let handle = RepositoryHandle {
                    specifier: RepositorySpecifier::from_location(&stored.repository_url),
                    subpath: PathBuf::from(stored.subpath),
                };
                (location, handle)
            })
            .collect())
    }

    /// Save the handles under an exclusive lock, creating the parent
    /// directory if missing
    pub async fn save(
        &self,
        handles: &BTreeMap<String, RepositoryHandle>,
    ) -> SwiftpackResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = StorageFile {
            version: STORAGE_SCHEMA,
            object: StorageObject {
                repositories: handles
                    .iter()
                    .map(|(location, handle)| {
                        (
                            location.clone(),
                            StoredRepository {
                                repository_url: handle.specifier.location(),
                                subpath: handle.subpath.display().to_string(),
                            },
                        )
                    })
                    .collect(),
            },
        };
        let content = serde_json::to_string_pretty(&file)?;

        let _lock = FileLock::exclusive(&self.lock_path).await?;
        fs::write(&self.path, content).await.map_err(|e| {
            SwiftpackError::StatePersist {
                path: self.path.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Delete the state file
    pub async fn reset(&self) -> SwiftpackResult<()> {
        let _lock = FileLock::exclusive(&self.lock_path).await?;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SwiftpackError::io(
                format!("removing {}", self.path.display()),
                e,
            )),
        }
    }
}

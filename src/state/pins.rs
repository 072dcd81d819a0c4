//! Pins file (`Package.resolved`)
//!
//! A totally ordered mapping from package identity to the exact position
//! resolution bound it to:
//!
//! ```json
//! { "version": 2, "object": { "pins": [
//!   { "identity": "dep", "kind": "remoteSourceControl",
//!     "location": "https://example.com/dep.git",
//!     "state": { "version": "1.2.0", "revision": "<id>" } } ] } }
//! ```
//!
//! Schema versions 1 and 2 share this shape; version 2 is written.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::package::{PackageIdentity, PackageReference};
use crate::state::{CheckoutState, FileLock, StoredPackageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const WRITTEN_SCHEMA: u32 = 2;
const READABLE_SCHEMAS: [u32; 2] = [1, 2];

/// A package bound to an exact version, branch, or revision
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub package_ref: PackageReference,
    pub state: CheckoutState,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinsFile {
    version: u32,
    object: PinsObject,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinsObject {
    pins: Vec<PinRep>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinRep {
    #[serde(flatten)]
    package_ref: StoredPackageRef,
    state: CheckoutState,
}

/// Load/save of the pins file
#[derive(Debug)]
pub struct PinsStorage {
    path: PathBuf,
    lock_path: PathBuf,
}

impl PinsStorage {
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("resolved.lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the pins; an absent file yields an empty map
    pub async fn load(&self) -> SwiftpackResult<BTreeMap<PackageIdentity, Pin>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let _lock = FileLock::shared(&self.lock_path).await?;
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", self.path.display()), e))?;
        let file: PinsFile = serde_json::from_str(&content)?;

        if !READABLE_SCHEMAS.contains(&file.version) {
            return Err(SwiftpackError::StateVersionUnknown {
                path: self.path.clone(),
                version: file.version,
            });
        }

        Ok(file
            .object
            .pins
            .into_iter()
            .map(|rep| {
                let package_ref: PackageReference = rep.package_ref.into();
                let pin = Pin {
                    package_ref,
                    state: rep.state,
                };
                (pin.package_ref.identity.clone(), pin)
            })
            .collect())
    }

    /// Save the pins sorted by identity
    pub async fn save(&self, pins: &BTreeMap<PackageIdentity, Pin>) -> SwiftpackResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = PinsFile {
            version: WRITTEN_SCHEMA,
            object: PinsObject {
                pins: pins
                    .values()
                    .map(|pin| PinRep {
                        package_ref: StoredPackageRef::from(&pin.package_ref),
                        state: pin.state.clone(),
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

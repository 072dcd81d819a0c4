//! Dependency mirrors
//!
//! A mirrors file maps original package locations to substitute locations.
//! The file is schema-versioned JSON:
//!
//! ```json
//! { "version": 1, "object": [ { "original": "...", "mirror": "..." } ] }
//! ```

use crate::error::{SwiftpackError, SwiftpackResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

const MIRRORS_SCHEMA: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct MirrorsFile {
    version: u32,
    object: Vec<MirrorEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MirrorEntry {
    original: String,
    mirror: String,
}

/// A set of mirror substitutions, keyed by original location
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyMirrors {
    mirrors: BTreeMap<String, String>,
}

impl DependencyMirrors {
    /// Load mirrors from a file; an absent file yields an empty set
    pub async fn load(path: &Path) -> SwiftpackResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading mirrors from {}", path.display()), e))?;
        let file: MirrorsFile = serde_json::from_str(&content)?;

        if file.version != MIRRORS_SCHEMA {
            return Err(SwiftpackError::StateVersionUnknown {
                path: path.to_path_buf(),
                version: file.version,
            });
        }

        let mirrors = file
            .object
            .into_iter()
            .map(|e| (e.original, e.mirror))
            .collect();
        Ok(Self { mirrors })
    }

    /// Save mirrors, creating the parent directory if needed
    pub async fn save(&self, path: &Path) -> SwiftpackResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = MirrorsFile {
            version: MIRRORS_SCHEMA,
            object: self
                .mirrors
                .iter()
                .map(|(original, mirror)| MirrorEntry {
                    original: original.clone(),
                    mirror: mirror.clone(),
                })
                .collect(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        fs::write(path, content)
            .await
            .map_err(|e| SwiftpackError::io(format!("writing mirrors to {}", path.display()), e))
    }

    /// Register a mirror for an original location
    pub fn set(&mut self, original: impl Into<String>, mirror: impl Into<String>) {
        self.mirrors.insert(original.into(), mirror.into());
    }

    /// Remove the mirror for an original location
    pub fn unset(&mut self, original: &str) -> Option<String> {
        self.mirrors.remove(original)
    }

    /// The mirror registered for `original`, if any
    pub fn mirror(&self, original: &str) -> Option<&str> {
        self.mirrors.get(original).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }
}

/// Local and shared mirror sets with the override rule applied.
///
/// A non-empty local set overrides the shared set entirely; an empty
/// local set defers to the shared one.
#[derive(Debug, Clone, Default)]
pub struct MirrorConfiguration {
    pub local: DependencyMirrors,
    pub shared: DependencyMirrors,
}

impl MirrorConfiguration {
    /// The mirror set in effect
    pub fn effective(&self) -> &DependencyMirrors {
        if self.local.is_empty() {
            &self.shared
        } else {
            &self.local
        }
    }

    /// Substitute `location` if a mirror applies, otherwise return it unchanged
    pub fn apply(&self, location: &str) -> String {
        self.effective()
            .mirror(location)
            .map(str::to_string)
            .unwrap_or_else(|| location.to_string())
    }
}

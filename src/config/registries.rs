//! Registry configuration
//!
//! ```json
//! { "version": 1, "registries": { "[default]": { "url": "..." } } }
//! ```
//!
//! The shared file is merged first; local entries override per scope.

use crate::error::{SwiftpackError, SwiftpackResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

const REGISTRIES_SCHEMA: u32 = 1;

/// Scope name of the catch-all registry
pub const DEFAULT_SCOPE: &str = "[default]";

/// A single registry endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    /// Registry base URL
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistriesFile {
    version: u32,
    registries: BTreeMap<String, Registry>,
}

/// Registries by scope, with `[default]` as the fallback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfiguration {
    registries: BTreeMap<String, Registry>,
}

impl RegistryConfiguration {
    /// Load a registries file; an absent file yields an empty configuration
    pub async fn load(path: &Path) -> SwiftpackResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            SwiftpackError::io(format!("reading registries from {}", path.display()), e)
        })?;
        let file: RegistriesFile = serde_json::from_str(&content)?;

        if file.version != REGISTRIES_SCHEMA {
            return Err(SwiftpackError::StateVersionUnknown {
                path: path.to_path_buf(),
                version: file.version,
            });
        }

        Ok(Self {
            registries: file.registries,
        })
    }

    /// Save the configuration, creating the parent directory if needed
    pub async fn save(&self, path: &Path) -> SwiftpackResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }

        let file = RegistriesFile {
            version: REGISTRIES_SCHEMA,
            registries: self.registries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        fs::write(path, content)
            .await
            .map_err(|e| SwiftpackError::io(format!("writing registries to {}", path.display()), e))
    }

    /// Merge `shared` and `local`: shared entries first, local overrides
    pub fn merged(shared: Self, local: Self) -> Self {
        let mut registries = shared.registries;
        registries.extend(local.registries);
        Self { registries }
    }

    /// Register a registry for a scope
    pub fn set(&mut self, scope: impl Into<String>, registry: Registry) {
        self.registries.insert(scope.into(), registry);
    }

    /// The registry for `scope`, falling back to `[default]`
    pub fn registry(&self, scope: &str) -> Option<&Registry> {
        self.registries
            .get(scope)
            .or_else(|| self.registries.get(DEFAULT_SCOPE))
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }
}

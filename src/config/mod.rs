//! Workspace locations and environment knobs

pub mod mirrors;
pub mod registries;

pub use mirrors::{DependencyMirrors, MirrorConfiguration};
pub use registries::RegistryConfiguration;

use std::path::{Path, PathBuf};

/// On-disk layout of a workspace rooted at a package directory.
///
/// ```text
/// <root>/
///   Package.resolved
///   .build/
///     repositories/
///     checkouts/
///     checkouts-state.json
///     workspace-state.json
///     artifacts/
///     plugins/
/// ```
#[derive(Debug, Clone)]
pub struct WorkspaceLocation {
    /// Package root directory
    pub root: PathBuf,

    /// Scratch directory, `.build` by default
    pub build_dir: PathBuf,
}

impl WorkspaceLocation {
    /// Create a layout rooted at `root` with the default `.build` scratch dir
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let build_dir = root.join(".build");
        Self { root, build_dir }
    }

    /// Bare clones, one subdirectory per repository subpath
    pub fn repositories_dir(&self) -> PathBuf {
        self.build_dir.join("repositories")
    }

    /// Checked-out working copies of resolved dependencies
    pub fn checkouts_dir(&self) -> PathBuf {
        self.build_dir.join("checkouts")
    }

    /// Downloaded binary artifacts
    pub fn artifacts_dir(&self) -> PathBuf {
        self.build_dir.join("artifacts")
    }

    /// Compiled plugin executables and their sidecar files
    pub fn plugins_cache_dir(&self) -> PathBuf {
        self.build_dir.join("plugins")
    }

    /// Repository manager state file
    pub fn repository_state_file(&self) -> PathBuf {
        self.build_dir.join("checkouts-state.json")
    }

    /// Managed dependencies and artifacts state file
    pub fn workspace_state_file(&self) -> PathBuf {
        self.build_dir.join("workspace-state.json")
    }

    /// Pins file at the package root
    pub fn pins_file(&self) -> PathBuf {
        self.root.join("Package.resolved")
    }

    /// Local mirrors configuration
    pub fn mirrors_file(&self) -> PathBuf {
        self.build_dir.join("mirrors.json")
    }

    /// Local registries configuration
    pub fn registries_file(&self) -> PathBuf {
        self.build_dir.join("registries.json")
    }
}

/// Default shared repository cache, under the OS cache directory
pub fn default_shared_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("swiftpack").join("repositories"))
}

/// Module cache override for plugin compilation.
///
/// `SWIFTPM_MODULECACHE_OVERRIDE` wins; `SWIFTPM_TESTS_MODULECACHE` is
/// honored for test harnesses.
pub fn module_cache_override() -> Option<PathBuf> {
    std::env::var_os("SWIFTPM_MODULECACHE_OVERRIDE")
        .or_else(|| std::env::var_os("SWIFTPM_TESTS_MODULECACHE"))
        .map(PathBuf::from)
}

/// Whether local packages should also go through the shared repository cache.
///
/// Set via `SWIFTPM_TESTS_PACKAGECACHE=1`.
pub fn cache_local_packages() -> bool {
    std::env::var("SWIFTPM_TESTS_PACKAGECACHE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Find the package root by walking up from `start` looking for a manifest
pub fn find_package_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(crate::manifest::MANIFEST_FILENAME).exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

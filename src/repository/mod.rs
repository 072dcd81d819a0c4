//! Source-control repository access
//!
//! The manager keeps bare clones under its working directory and hands out
//! [`RepositoryHandle`]s. Actual source-control operations go through the
//! [`RepositoryProvider`] seam; `git.rs` implements it over the `git` CLI
//! and `memory.rs` provides a scripted implementation for tests.

pub mod git;
pub mod manager;
pub mod memory;
pub mod storage;

pub use manager::RepositoryManager;

use crate::error::SwiftpackResult;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identifies a repository by local path or remote URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RepositorySpecifier {
    Path(PathBuf),
    Url(String),
}

impl RepositorySpecifier {
    /// Reconstruct a specifier from a persisted location string
    pub fn from_location(location: &str) -> Self {
        if location.starts_with('/') {
            Self::Path(PathBuf::from(location))
        } else {
            Self::Url(location.to_string())
        }
    }

    /// The location string of this specifier
    pub fn location(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Path(_))
    }

    /// A stable single-component directory name for this specifier.
    ///
    /// The sanitized basename keeps clone directories recognizable; the
    /// hash suffix keeps them unique across locations sharing a basename.
    pub fn file_system_identifier(&self) -> String {
        let location = self.location();
        let basename = location
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&location);
        let basename = basename.strip_suffix(".git").unwrap_or(basename);
        let sanitized: String = basename
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();

        let digest = Sha256::digest(location.as_bytes());
        format!("{}-{}", sanitized.to_lowercase(), &hex::encode(digest)[..12])
    }
}

impl fmt::Display for RepositorySpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location())
    }
}

/// A repository known to the manager.
///
/// The subpath equals the specifier's filesystem identifier and indexes
/// the bare clone under the manager's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    pub specifier: RepositorySpecifier,
    pub subpath: PathBuf,
}

impl RepositoryHandle {
    pub fn new(specifier: RepositorySpecifier) -> Self {
        let subpath = PathBuf::from(specifier.file_system_identifier());
        Self { specifier, subpath }
    }
}

/// Outcome details of a repository fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchDetails {
    /// The clone was produced from the shared cache
    pub from_cache: bool,
    /// The shared cache was refreshed as part of the fetch
    pub updated_cache: bool,
}

/// A unit of fetch progress, forwarded from the underlying tool
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub text: String,
}

/// Sink for fetch progress callbacks
pub type ProgressSink = dyn Fn(FetchProgress) + Send + Sync;

/// Source-control backend seam.
///
/// Implementations fetch, open, and copy bare repositories and produce
/// working copies from them.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Clone `specifier` into `path` as a bare repository
    async fn fetch(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
        progress: Option<&ProgressSink>,
    ) -> SwiftpackResult<()>;

    /// Open the bare repository at `path`
    async fn open(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
    ) -> SwiftpackResult<Box<dyn Repository>>;

    /// Copy the bare repository at `from` to `to`
    async fn copy(&self, from: &Path, to: &Path) -> SwiftpackResult<()>;

    /// Create a working copy of `specifier` at `path` from the bare clone
    /// at `source`
    async fn create_working_copy(
        &self,
        specifier: &RepositorySpecifier,
        source: &Path,
        path: &Path,
        editable: bool,
    ) -> SwiftpackResult<Box<dyn WorkingCopy>>;

    /// Open an existing working copy
    async fn open_working_copy(&self, path: &Path) -> SwiftpackResult<Box<dyn WorkingCopy>>;

    /// Whether `path` holds a valid repository
    async fn is_valid_directory(&self, path: &Path) -> SwiftpackResult<bool>;

    /// Whether `reference` is a well-formed ref name
    fn is_valid_ref_format(&self, reference: &str) -> bool;
}

/// An opened bare repository
#[async_trait]
pub trait Repository: Send + Sync {
    /// All tag names
    async fn tags(&self) -> SwiftpackResult<Vec<String>>;

    /// All branch names
    async fn branches(&self) -> SwiftpackResult<Vec<String>>;

    /// Resolve a tag or branch name to a revision id
    async fn resolve_revision(&self, reference: &str) -> SwiftpackResult<String>;

    /// Whether `revision` exists in this repository
    async fn has_revision(&self, revision: &str) -> SwiftpackResult<bool>;

    /// Update from the origin
    async fn fetch(&self, progress: Option<&ProgressSink>) -> SwiftpackResult<()>;

    /// Read a file blob at a revision
    async fn read_file(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<u8>>;

    /// List the entry names of a tree at a revision (`path` empty for root)
    async fn list_directory(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<String>>;
}

/// A checked-out working tree
#[async_trait]
pub trait WorkingCopy: Send + Sync {
    fn path(&self) -> &Path;

    /// Force-checkout the given revision
    async fn check_out(&self, revision: &str) -> SwiftpackResult<()>;

    /// Revision currently checked out
    async fn current_revision(&self) -> SwiftpackResult<String>;
}

/// Observer of repository manager activity.
///
/// For any specifier, `fetching_will_begin` precedes all progress
/// callbacks, which precede `fetching_did_finish`, which precedes the
/// lookup's completion.
pub trait RepositoryManagerDelegate: Send + Sync {
    fn fetching_will_begin(&self, handle: &RepositoryHandle);

    fn fetching_did_finish(
        &self,
        handle: &RepositoryHandle,
        error: Option<&crate::error::SwiftpackError>,
        duration: Duration,
    );

    fn fetch_progress(&self, _handle: &RepositoryHandle, _progress: &FetchProgress) {}

    fn handle_will_update(&self, handle: &RepositoryHandle);

    fn handle_did_update(&self, handle: &RepositoryHandle, duration: Duration);
}

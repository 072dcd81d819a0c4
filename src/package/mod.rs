//! Package identities and references
//!
//! A `PackageIdentity` is the canonical, case-folded name a package is
//! known by, derived from its location. Two references with different
//! URLs that canonicalize to the same identity denote the same package.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Canonical package identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageIdentity(String);

impl PackageIdentity {
    /// Derive an identity from a URL or a filesystem path
    pub fn new(location: &str) -> Self {
        if location.starts_with('/') || location.starts_with("file://") {
            Self::from_path(Path::new(
                location.strip_prefix("file://").unwrap_or(location),
            ))
        } else {
            Self::from_url(location)
        }
    }

    /// Derive an identity from a source-control URL.
    ///
    /// The scheme, user-info, host, and port are dropped; a trailing
    /// `.git` suffix and slashes are stripped; the last path component is
    /// case-folded.
    pub fn from_url(url: &str) -> Self {
        let mut rest = url;
        if let Some(idx) = rest.find("://") {
            rest = &rest[idx + 3..];
        } else if let Some(idx) = rest.find('@') {
            // scp-style: git@host:path
            rest = &rest[idx + 1..];
            if let Some(colon) = rest.find(':') {
                rest = &rest[colon + 1..];
            }
        }

        let rest = rest.trim_end_matches('/');
        let last = rest.rsplit('/').next().unwrap_or(rest);
        let last = last.rsplit(':').next().unwrap_or(last);
        let last = last.strip_suffix(".git").unwrap_or(last);
        Self(last.to_lowercase())
    }

    /// Derive an identity from a filesystem path
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(&name);
        Self(name.to_lowercase())
    }

    /// Create an identity from an already-canonical string
    pub fn plain(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a package is obtained
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PackageKind {
    /// The root package of the workspace
    Root(PathBuf),

    /// An unversioned local package referenced by path
    FileSystem(PathBuf),

    /// A source-control repository on the local filesystem
    LocalSourceControl(PathBuf),

    /// A source-control repository at a remote URL
    RemoteSourceControl(String),

    /// A registry package, identified by its scoped identity
    Registry(String),
}

impl PackageKind {
    /// Stable name used in persisted state
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::FileSystem(_) => "fileSystem",
            Self::LocalSourceControl(_) => "localSourceControl",
            Self::RemoteSourceControl(_) => "remoteSourceControl",
            Self::Registry(_) => "registry",
        }
    }

    /// The location string for this kind
    pub fn location(&self) -> String {
        match self {
            Self::Root(path) | Self::FileSystem(path) | Self::LocalSourceControl(path) => {
                path.display().to_string()
            }
            Self::RemoteSourceControl(url) => url.clone(),
            Self::Registry(identity) => identity.clone(),
        }
    }

    pub fn is_source_control(&self) -> bool {
        matches!(
            self,
            Self::LocalSourceControl(_) | Self::RemoteSourceControl(_)
        )
    }
}

/// A package reference: identity plus how to obtain it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageReference {
    pub identity: PackageIdentity,
    pub kind: PackageKind,
}

impl PackageReference {
    pub fn root(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            identity: PackageIdentity::from_path(&path),
            kind: PackageKind::Root(path),
        }
    }

    pub fn file_system(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            identity: PackageIdentity::from_path(&path),
            kind: PackageKind::FileSystem(path),
        }
    }

    pub fn local_source_control(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            identity: PackageIdentity::from_path(&path),
            kind: PackageKind::LocalSourceControl(path),
        }
    }

    pub fn remote_source_control(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            identity: PackageIdentity::from_url(&url),
            kind: PackageKind::RemoteSourceControl(url),
        }
    }

    pub fn registry(scoped_identity: impl Into<String>) -> Self {
        let scoped = scoped_identity.into();
        Self {
            identity: PackageIdentity::plain(scoped.clone()),
            kind: PackageKind::Registry(scoped),
        }
    }

    pub fn location(&self) -> String {
        self.kind.location()
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)
    }
}

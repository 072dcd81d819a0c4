//! Tools-version declarations
//!
//! Every manifest opens with a comment line declaring the toolchain
//! features it relies on:
//!
//! ```swift
//! // swift-tools-version:5.5
//! ```
//!
//! A manifest is readable iff its declared tools version is at least
//! [`ToolsVersion::MINIMUM_SUPPORTED`] and at most the current tools
//! version of the host.

use crate::error::{SwiftpackError, SwiftpackResult};
use serde::{Deserialize, Serialize};
use std::fmt;

const PREFIX: &str = "swift-tools-version";

/// A declared tools version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolsVersion {
    /// Oldest tools version manifests may still declare
    pub const MINIMUM_SUPPORTED: Self = Self::new(4, 0, 0);

    /// Tools version of this host
    pub const CURRENT: Self = Self::new(5, 9, 0);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Whether a manifest declaring this version is readable under `current`
    pub fn is_supported_by(&self, current: &ToolsVersion) -> bool {
        *self >= Self::MINIMUM_SUPPORTED && *self <= *current
    }

    /// Parse `"5"`, `"5.5"`, or `"5.5.1"`
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(Self::new(major, minor, patch))
    }

    /// Extract the declared tools version from manifest source bytes.
    ///
    /// Only the first line is considered; it must be a `//` comment
    /// containing `swift-tools-version:<version>`.
    pub fn parse_manifest(contents: &[u8]) -> SwiftpackResult<Self> {
        let text = std::str::from_utf8(contents).map_err(|_| SwiftpackError::ManifestInvalid {
            identity: String::new(),
            reason: "manifest is not valid UTF-8".to_string(),
        })?;
        let first_line = text
            .trim_start_matches('\u{feff}')
            .lines()
            .next()
            .unwrap_or_default();

        let comment = first_line
            .trim()
            .strip_prefix("//")
            .ok_or_else(|| invalid_declaration(first_line))?
            .trim();
        let rest = comment
            .strip_prefix(PREFIX)
            .ok_or_else(|| invalid_declaration(first_line))?
            .trim_start();
        let version_text = rest
            .strip_prefix(':')
            .ok_or_else(|| invalid_declaration(first_line))?;

        // Anything after the version (e.g. ";" directives) is ignored
        let version_text = version_text
            .split(|c: char| c == ';' || c.is_whitespace())
            .next()
            .unwrap_or_default();

        Self::parse(version_text).ok_or_else(|| invalid_declaration(first_line))
    }
}

fn invalid_declaration(line: &str) -> SwiftpackError {
    SwiftpackError::ManifestInvalid {
        identity: String::new(),
        reason: format!("invalid tools-version declaration: '{}'", line.trim()),
    }
}

impl fmt::Display for ToolsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.patch == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
        }
    }
}

/// Filename of the regular manifest
pub const MANIFEST_FILENAME: &str = "Package.swift";

/// Pick the manifest filename to read for `current` from the files present
/// at a revision root.
///
/// A tag may carry version-specific manifests such as
/// `Package@swift-5.swift` or `Package@swift-5.5.swift`; the variant with
/// the highest encoded version not exceeding `current` wins, falling back
/// to `Package.swift`.
pub fn select_manifest<'a, I>(files: I, current: &ToolsVersion) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut regular = false;
    let mut best: Option<(ToolsVersion, &str)> = None;

    for name in files {
        if name == MANIFEST_FILENAME {
            regular = true;
            continue;
        }
        let Some(version) = versioned_manifest_version(name) else {
            continue;
        };
        if version > *current {
            continue;
        }
        if best.map(|(v, _)| version > v).unwrap_or(true) {
            best = Some((version, name));
        }
    }

    match best {
        Some((_, name)) => Some(name.to_string()),
        None if regular => Some(MANIFEST_FILENAME.to_string()),
        None => None,
    }
}

/// Parse `Package@swift-<version>.swift` into its encoded version
fn versioned_manifest_version(name: &str) -> Option<ToolsVersion> {
    let rest = name.strip_prefix("Package@swift-")?;
    let version_text = rest.strip_suffix(".swift")?;
    ToolsVersion::parse(version_text)
}

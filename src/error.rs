//! Error types for Swiftpack
//!
//! All modules use `SwiftpackResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

use crate::manifest::tools_version::ToolsVersion;
use crate::plugin::compiler::PluginCompilationResult;

/// Result type alias for Swiftpack operations
pub type SwiftpackResult<T> = Result<T, SwiftpackError>;

/// All errors that can occur in Swiftpack
#[derive(Error, Debug)]
pub enum SwiftpackError {
    // Repository errors
    #[error("failed to fetch {specifier}: {reason}")]
    RepositoryFetch { specifier: String, reason: String },

    #[error("no repository registered for {0}")]
    UnknownRepository(String),

    #[error("{path} is not a valid repository")]
    InvalidRepository { path: PathBuf },

    #[error("couldn't find branch '{name}'{}", suggestion_suffix(.suggestion))]
    NoSuchBranch {
        name: String,
        suggestion: Option<String>,
    },

    #[error("couldn't find commit '{0}'")]
    NoSuchRevision(String),

    #[error("couldn't find tag '{0}'")]
    NoSuchTag(String),

    #[error("{package} has no released version {version}")]
    UnknownVersion { package: String, version: String },

    // Storage errors
    #[error("unknown schema version {version} in {path}")]
    StateVersionUnknown { path: PathBuf, version: u32 },

    #[error("state persistence failed for {path}: {reason}")]
    StatePersist { path: PathBuf, reason: String },

    // Manifest errors
    #[error("manifest not found at {0}")]
    ManifestNotFound(PathBuf),

    #[error("invalid manifest for {identity}: {reason}")]
    ManifestInvalid { identity: String, reason: String },

    #[error(
        "package '{package}' requires tools version {required} \
         (supported range is {minimum} to {current})"
    )]
    UnsupportedToolsVersion {
        package: String,
        required: ToolsVersion,
        minimum: ToolsVersion,
        current: ToolsVersion,
    },

    #[error("failed to read dependencies of {reference} from {repository}")]
    GetDependencies {
        repository: String,
        reference: String,
        #[source]
        source: Box<SwiftpackError>,
    },

    #[error("package kind {kind} is not supported for {identity}")]
    UnsupportedPackageKind { identity: String, kind: String },

    #[error("dependency resolution failed for {package}: {reason}")]
    ResolutionFailed { package: String, reason: String },

    // Plugin errors
    #[error("plugin compilation failed for {}", .0.compiled_executable.display())]
    PluginCompilationFailed(Box<PluginCompilationResult>),

    #[error("invalid plugin message payload size: {0}")]
    PluginInvalidPayloadSize(u64),

    #[error("truncated plugin message header ({got} of 8 bytes)")]
    PluginTruncatedHeader { got: usize },

    #[error("truncated plugin message payload ({got} of {expected} bytes)")]
    PluginTruncatedPayload { expected: u64, got: usize },

    #[error("malformed plugin message: {0}")]
    PluginInvalidMessage(String),

    #[error("plugin ended by uncaught signal {0}")]
    PluginEndedBySignal(i32),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!("; did you mean '{s}'?"),
        None => String::new(),
    }
}

impl SwiftpackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap an error from a container dependency query with its context
    pub fn get_dependencies(
        repository: impl Into<String>,
        reference: impl Into<String>,
        source: SwiftpackError,
    ) -> Self {
        Self::GetDependencies {
            repository: repository.into(),
            reference: reference.into(),
            source: Box::new(source),
        }
    }

    /// Whether the caller may reasonably retry the operation
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RepositoryFetch { .. } | Self::CommandFailed { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::RepositoryFetch { .. } => Some("Check the URL and your network connection"),
            Self::UnsupportedToolsVersion { .. } => {
                Some("Update your toolchain or pick an older package version")
            }
            Self::StateVersionUnknown { .. } => {
                Some("The state file was written by a newer version of swiftpack")
            }
            _ => None,
        }
    }
}

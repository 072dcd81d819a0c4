//! Build-plugin compilation and execution
//!
//! Plugins are user-authored programs distributed as source. The
//! compiler caches their compiled executables by input hash; the runner
//! drives a compiled plugin as a sandboxed child process over a framed
//! JSON protocol, surfacing diagnostics, defined commands, and
//! build/test/symbol-graph requests to a delegate.

pub mod compiler;
pub mod messages;
pub mod runner;
pub mod sandbox;

pub use compiler::{PluginCompilationResult, PluginScriptCompiler, ToolchainConfig};
pub use runner::{PluginInvocationResult, PluginScriptRunner};
pub use sandbox::SandboxProfile;

use crate::error::{SwiftpackError, SwiftpackResult};
use async_trait::async_trait;
use messages::{
    BuildParameters, BuildResult, BuildSubset, CommandConfiguration, DiagnosticSeverity,
    SymbolGraphOptions, SymbolGraphResult, TestParameters, TestResult, TestSubset,
};
use std::path::{Path, PathBuf};

/// Receiver of everything a plugin invocation produces.
///
/// The notification methods fire in the order the child produced the
/// corresponding messages. The request methods re-enter the workspace and
/// may take arbitrarily long; their results are sent back to the plugin
/// on the serialized writer.
#[async_trait]
pub trait PluginInvocationDelegate: Send + Sync {
    /// Free-form output the plugin wrote to stderr
    fn plugin_emitted_output(&self, chunk: &[u8]);

    /// A structured diagnostic from the plugin
    fn plugin_emitted_diagnostic(
        &self,
        severity: DiagnosticSeverity,
        message: &str,
        file: Option<&Path>,
        line: Option<u32>,
    );

    fn plugin_defined_build_command(
        &self,
        _configuration: &CommandConfiguration,
        _input_files: &[PathBuf],
        _output_files: &[PathBuf],
    ) {
    }

    fn plugin_defined_prebuild_command(
        &self,
        _configuration: &CommandConfiguration,
        _output_directory: &Path,
    ) {
    }

    async fn build_requested(
        &self,
        _subset: BuildSubset,
        _parameters: BuildParameters,
    ) -> SwiftpackResult<BuildResult> {
        Err(SwiftpackError::Internal(
            "host does not support build requests".to_string(),
        ))
    }

    async fn test_requested(
        &self,
        _subset: TestSubset,
        _parameters: TestParameters,
    ) -> SwiftpackResult<TestResult> {
        Err(SwiftpackError::Internal(
            "host does not support test requests".to_string(),
        ))
    }

    async fn symbol_graph_requested(
        &self,
        _target_name: String,
        _options: SymbolGraphOptions,
    ) -> SwiftpackResult<SymbolGraphResult> {
        Err(SwiftpackError::Internal(
            "host does not support symbol graph requests".to_string(),
        ))
    }
}

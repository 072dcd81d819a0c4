//! Plugin script compilation
//!
//! Plugin sources compile to a host executable cached under the plugin
//! cache directory. The cache key is a SHA-256 over the full command
//! line, the environment, and the source bytes, stored in a
//! `<name>.inputhash` sidecar; the compiled binary is reused iff the
//! sidecar matches byte-for-byte.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::manifest::ToolsVersion;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info};

/// Host toolchain used to compile plugin scripts
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Compiler executable (`swiftc`)
    pub compiler_path: PathBuf,

    /// Import search path for the plugin API module
    pub plugin_api_path: PathBuf,

    /// Library search path holding the plugin API library, if linked
    /// dynamically
    pub plugin_library_path: Option<PathBuf>,

    /// SDK root, where the host needs one
    pub sdk_root: Option<PathBuf>,

    /// Explicit target triple
    pub target_triple: Option<String>,

    /// Module cache override
    pub module_cache_path: Option<PathBuf>,

    /// Additional flags appended verbatim
    pub extra_flags: Vec<String>,
}

impl ToolchainConfig {
    pub fn new(compiler_path: impl Into<PathBuf>, plugin_api_path: impl Into<PathBuf>) -> Self {
        Self {
            compiler_path: compiler_path.into(),
            plugin_api_path: plugin_api_path.into(),
            plugin_library_path: None,
            sdk_root: None,
            target_triple: None,
            module_cache_path: crate::config::module_cache_override(),
            extra_flags: Vec::new(),
        }
    }
}

/// Outcome of one compile request
#[derive(Debug, Clone)]
pub struct PluginCompilationResult {
    pub succeeded: bool,
    /// The full command line, first element being the compiler
    pub command: Vec<String>,
    /// Exit status of the compiler; `None` on a cache hit
    pub exit_status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub diagnostics_file: PathBuf,
    pub compiled_executable: PathBuf,
    pub was_cached: bool,
}

/// Input-hash keyed compiler invoker
pub struct PluginScriptCompiler {
    toolchain: ToolchainConfig,
    cache_dir: PathBuf,
}

impl PluginScriptCompiler {
    pub fn new(toolchain: ToolchainConfig, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            toolchain,
            cache_dir: cache_dir.into(),
        }
    }

    /// Compile plugin sources rooted at `sources_root`, reusing a cached
    /// executable when the input hash matches.
    pub async fn compile(
        &self,
        sources_root: &Path,
        sources: &[PathBuf],
        tools_version: ToolsVersion,
    ) -> SwiftpackResult<PluginCompilationResult> {
        let exec_name = mangle(
            &sources_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "plugin".to_string()),
        );
        let compiled_executable = self.cache_dir.join(&exec_name);
        let diagnostics_file = self.cache_dir.join(format!("{exec_name}.dia"));
        let hash_file = self.cache_dir.join(format!("{exec_name}.inputhash"));

        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", self.cache_dir.display()), e))?;

        let command = self.command_line(
            sources,
            tools_version,
            &compiled_executable,
            &diagnostics_file,
        );
        let input_hash = compute_input_hash(&command, sources).await;

        if let Some(hash) = &input_hash {
            if compiled_executable.is_file() {
                if let Ok(stored) = fs::read_to_string(&hash_file).await {
                    if stored == *hash {
                        debug!("Reusing cached plugin executable {exec_name}");
                        return Ok(PluginCompilationResult {
                            succeeded: true,
                            command,
                            exit_status: None,
                            stdout: String::new(),
                            stderr: String::new(),
                            diagnostics_file,
                            compiled_executable,
                            was_cached: true,
                        });
                    }
                }
            }
        }

        info!("Compiling plugin {exec_name}");
        let output = Command::new(&command[0])
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| SwiftpackError::command_failed(command[0].clone(), e))?;

        let result = PluginCompilationResult {
            succeeded: output.status.success(),
            command,
            exit_status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            diagnostics_file,
            compiled_executable: compiled_executable.clone(),
            was_cached: false,
        };

        if result.succeeded {
            match &input_hash {
                Some(hash) => {
                    fs::write(&hash_file, hash)
                        .await
                        .map_err(|e| SwiftpackError::io("writing input hash", e))?;
                }
                None => {
                    let _ = fs::remove_file(&hash_file).await;
                }
            }
            Ok(result)
        } else {
            // Never leave a stale executable behind a failed compile
            let _ = fs::remove_file(&compiled_executable).await;
            let _ = fs::remove_file(&hash_file).await;
            Err(SwiftpackError::PluginCompilationFailed(Box::new(result)))
        }
    }

    fn command_line(
        &self,
        sources: &[PathBuf],
        tools_version: ToolsVersion,
        exec_file: &Path,
        diagnostics_file: &Path,
    ) -> Vec<String> {
        let mut command = vec![
            self.toolchain.compiler_path.display().to_string(),
            "-parse-as-library".to_string(),
        ];
        command.extend(sources.iter().map(|s| s.display().to_string()));
        command.push("-I".to_string());
        command.push(self.toolchain.plugin_api_path.display().to_string());
        if let Some(library_path) = &self.toolchain.plugin_library_path {
            command.push("-L".to_string());
            command.push(library_path.display().to_string());
            command.push("-lPackagePlugin".to_string());
        }
        if let Some(triple) = &self.toolchain.target_triple {
            command.push("-target".to_string());
            command.push(triple.clone());
        }
        if let Some(sdk) = &self.toolchain.sdk_root {
            command.push("-sdk".to_string());
            command.push(sdk.display().to_string());
        }
        if let Some(module_cache) = &self.toolchain.module_cache_path {
            command.push("-module-cache-path".to_string());
            command.push(module_cache.display().to_string());
        }
        command.push("-swift-version".to_string());
        command.push(tools_version.major.to_string());
        command.push("-package-description-version".to_string());
        command.push(tools_version.to_string());
        command.extend(self.toolchain.extra_flags.iter().cloned());
        command.push("-serialize-diagnostics-path".to_string());
        command.push(diagnostics_file.display().to_string());
        command.push("-o".to_string());
        command.push(exec_file.display().to_string());
        command
    }
}

/// Map a plugin name to a valid C identifier
fn mangle(name: &str) -> String {
    let mut mangled: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if mangled.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        mangled.insert(0, '_');
    }
    if mangled.is_empty() {
        mangled.push('_');
    }
    mangled
}

/// SHA-256 over command line, sorted environment, and source bytes.
///
/// `None` when any source can't be read; the caller treats that as a
/// cache miss.
async fn compute_input_hash(command: &[String], sources: &[PathBuf]) -> Option<String> {
    let mut hasher = Sha256::new();
    for argument in command {
        hasher.update(argument.as_bytes());
        hasher.update([0]);
    }

    let mut environment: Vec<(String, String)> = std::env::vars().collect();
    environment.sort();
    for (key, value) in environment {
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }

    for source in sources {
        let contents = fs::read(source).await.ok()?;
        hasher.update(&contents);
    }
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_produces_c_identifiers() {
        assert_eq!(mangle("MyPlugin"), "MyPlugin");
        assert_eq!(mangle("my-plugin"), "my_plugin");
        assert_eq!(mangle("1plugin"), "_1plugin");
        assert_eq!(mangle("a b.c"), "a_b_c");
        assert_eq!(mangle(""), "_");
    }

    #[cfg(unix)]
    mod with_fake_compiler {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_fake_compiler(dir: &Path, script_body: &str) -> PathBuf {
            let path = dir.join("fake-swiftc");
            std::fs::write(&path, format!("#!/bin/sh\n{script_body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        /// A compiler that writes a fixed byte sequence to the -o path
        const OK_COMPILER: &str = r#"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
printf 'compiled-binary' > "$out"
"#;

        struct Fixture {
            _dir: tempfile::TempDir,
            compiler: PluginScriptCompiler,
            sources_root: PathBuf,
            sources: Vec<PathBuf>,
        }

        fn fixture(script_body: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let compiler_path = write_fake_compiler(dir.path(), script_body);

            let sources_root = dir.path().join("MyPlugin");
            std::fs::create_dir_all(&sources_root).unwrap();
            let source = sources_root.join("plugin.swift");
            std::fs::write(&source, "// plugin body\n").unwrap();

            let toolchain = ToolchainConfig::new(compiler_path, dir.path().join("api"));
            let compiler = PluginScriptCompiler::new(toolchain, dir.path().join("plugins"));
            Fixture {
                compiler,
                sources_root,
                sources: vec![source],
                _dir: dir,
            }
        }

        #[tokio::test]
        async fn cache_hit_on_identical_inputs() {
            let fx = fixture(OK_COMPILER);

            let first = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            assert!(!first.was_cached);
            assert!(first.succeeded);
            let binary = std::fs::read(&first.compiled_executable).unwrap();

            let second = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            assert!(second.was_cached);
            assert!(second.succeeded);
            assert_eq!(second.exit_status, None);
            assert_eq!(std::fs::read(&second.compiled_executable).unwrap(), binary);
        }

        #[tokio::test]
        async fn source_change_invalidates_cache() {
            let fx = fixture(OK_COMPILER);

            let first = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            assert!(!first.was_cached);

            std::fs::write(&fx.sources[0], "// changed body\n").unwrap();
            let second = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            assert!(!second.was_cached);
        }

        #[tokio::test]
        async fn corrupt_hash_sidecar_misses() {
            let fx = fixture(OK_COMPILER);

            let first = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            let hash_file = first
                .compiled_executable
                .with_file_name("MyPlugin.inputhash");
            std::fs::write(&hash_file, "bogus").unwrap();

            let second = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();
            assert!(!second.was_cached);
        }

        #[tokio::test]
        async fn failure_carries_output_and_cleans_artifacts() {
            let fx = fixture("echo 'stdout noise'\necho 'type error' >&2\nexit 1\n");

            let err = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap_err();
            let SwiftpackError::PluginCompilationFailed(result) = err else {
                panic!("expected PluginCompilationFailed");
            };
            assert!(!result.succeeded);
            assert_eq!(result.exit_status, Some(1));
            assert!(result.stdout.contains("stdout noise"));
            assert!(result.stderr.contains("type error"));
            assert!(!result.compiled_executable.exists());
            assert!(!result
                .compiled_executable
                .with_file_name("MyPlugin.inputhash")
                .exists());
        }

        #[tokio::test]
        async fn command_line_shape() {
            let fx = fixture(OK_COMPILER);
            let result = fx
                .compiler
                .compile(&fx.sources_root, &fx.sources, ToolsVersion::new(5, 5, 0))
                .await
                .unwrap();

            let command = &result.command;
            assert!(command.contains(&"-parse-as-library".to_string()));
            assert!(command.contains(&"-swift-version".to_string()));
            assert!(command.contains(&"-package-description-version".to_string()));
            assert!(command.contains(&"5.5".to_string()));
            assert!(command.contains(&"-serialize-diagnostics-path".to_string()));
            let o = command.iter().position(|a| a == "-o").unwrap();
            assert_eq!(command[o + 1], result.compiled_executable.display().to_string());
        }
    }
}

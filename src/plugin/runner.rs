//! Plugin invocation
//!
//! Runs a compiled plugin as a sandboxed child process and drives the
//! framed message loop until it exits: stdout carries structured
//! messages, stderr is free-form text forwarded to the delegate, and
//! every reply to the plugin goes through one serialized writer task.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::plugin::messages::{
    read_message, write_message, HostToPluginMessage, PluginToHostMessage,
};
use crate::plugin::sandbox::SandboxProfile;
use crate::plugin::PluginInvocationDelegate;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// Outcome of one plugin invocation
#[derive(Debug)]
pub struct PluginInvocationResult {
    /// Whether the plugin exited with code zero
    pub succeeded: bool,

    /// Everything the plugin wrote to stderr
    pub captured_stderr: String,
}

/// Compiled-plugin process driver
pub struct PluginScriptRunner {
    cache_dir: PathBuf,
    enable_sandbox: bool,
}

impl PluginScriptRunner {
    pub fn new(cache_dir: impl Into<PathBuf>, enable_sandbox: bool) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            enable_sandbox,
        }
    }

    /// Run `executable` until it exits, exchanging framed messages.
    ///
    /// The sandbox denies network access and confines writes to
    /// `writable_directories` plus the plugin cache directory. Delegate
    /// callbacks are delivered in the order the child produced them.
    pub async fn invoke(
        &self,
        executable: &Path,
        writable_directories: &[PathBuf],
        readable_directories: &[PathBuf],
        input: serde_json::Value,
        delegate: Arc<dyn PluginInvocationDelegate>,
    ) -> SwiftpackResult<PluginInvocationResult> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", self.cache_dir.display()), e))?;

        let profile = if self.enable_sandbox {
            SandboxProfile::new(&self.cache_dir, writable_directories, readable_directories)
        } else {
            SandboxProfile::disabled()
        };
        let argv = profile.apply(vec![executable.display().to_string()]);
        debug!("Invoking plugin: {argv:?}");

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&self.cache_dir)
            .spawn()
            .map_err(|e| SwiftpackError::command_failed(argv[0].clone(), e))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SwiftpackError::Internal("plugin stdin not captured".to_string()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SwiftpackError::Internal("plugin stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SwiftpackError::Internal("plugin stderr not captured".to_string()))?;

        // Every write to the plugin goes through this one task, so
        // replies can never interleave.
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<HostToPluginMessage>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(message) = reply_rx.recv().await {
                if write_message(&mut stdin, &message).await.is_err() {
                    break;
                }
            }
        });

        reply_tx
            .send(HostToPluginMessage::PerformAction { input })
            .map_err(|_| SwiftpackError::Internal("plugin writer ended early".to_string()))?;

        let error_diagnostic_seen = Arc::new(AtomicBool::new(false));

        let mut stdout_task = {
            let delegate = Arc::clone(&delegate);
            let reply_tx = reply_tx.clone();
            let error_seen = Arc::clone(&error_diagnostic_seen);
            tokio::spawn(async move {
                loop {
                    match read_message::<_, PluginToHostMessage>(&mut stdout).await {
                        Ok(Some(message)) => {
                            handle_plugin_message(message, &delegate, &reply_tx, &error_seen)
                        }
                        Ok(None) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                }
            })
        };

        let mut stderr_task = {
            let delegate = Arc::clone(&delegate);
            tokio::spawn(async move {
                let mut captured = Vec::new();
                let mut buffer = [0u8; 4096];
                loop {
                    match stderr.read(&mut buffer).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            delegate.plugin_emitted_output(&buffer[..n]);
                            captured.extend_from_slice(&buffer[..n]);
                        }
                    }
                }
                captured
            })
        };

        // Wait for exit, killing the child if it violates the protocol so
        // a blocked pipe can't wedge the invocation.
        let mut stdout_result: Option<SwiftpackResult<()>> = None;
        let status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status.map_err(|e| SwiftpackError::command_failed("plugin", e))?;
                }
                joined = &mut stdout_task, if stdout_result.is_none() => {
                    let result = joined
                        .map_err(|e| SwiftpackError::Internal(format!("stdout reader failed: {e}")))?;
                    if result.is_err() {
                        let _ = child.start_kill();
                    }
                    stdout_result = Some(result);
                }
            }
        };
        drop(reply_tx);

        // Drain remaining output before classifying the exit
        let stdout_result = match stdout_result {
            Some(result) => result,
            None => stdout_task
                .await
                .map_err(|e| SwiftpackError::Internal(format!("stdout reader failed: {e}")))?,
        };
        let captured = (&mut stderr_task)
            .await
            .map_err(|e| SwiftpackError::Internal(format!("stderr reader failed: {e}")))?;
        let captured_stderr = String::from_utf8_lossy(&captured).into_owned();

        stdout_result?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Err(SwiftpackError::PluginEndedBySignal(signal));
            }
        }

        let succeeded = status.success();
        if !succeeded && !error_diagnostic_seen.load(Ordering::SeqCst) {
            // The plugin failed without saying why; give the caller
            // something to report.
            let message = match status.code() {
                Some(code) => format!("plugin ended with a nonzero exit code: {code}"),
                None => "plugin ended abnormally".to_string(),
            };
            delegate.plugin_emitted_diagnostic(
                crate::plugin::messages::DiagnosticSeverity::Error,
                &message,
                None,
                None,
            );
        }

        Ok(PluginInvocationResult {
            succeeded,
            captured_stderr,
        })
    }
}

/// Dispatch one plugin message to the delegate, queueing any reply on the
/// serialized writer
fn handle_plugin_message(
    message: PluginToHostMessage,
    delegate: &Arc<dyn PluginInvocationDelegate>,
    reply_tx: &mpsc::UnboundedSender<HostToPluginMessage>,
    error_seen: &Arc<AtomicBool>,
) {
    match message {
        PluginToHostMessage::EmitDiagnostic {
            severity,
            message,
            file,
            line,
        } => {
            if severity == crate::plugin::messages::DiagnosticSeverity::Error {
                error_seen.store(true, Ordering::SeqCst);
            }
            delegate.plugin_emitted_diagnostic(severity, &message, file.as_deref(), line);
        }
        PluginToHostMessage::DefineBuildCommand {
            configuration,
            input_files,
            output_files,
        } => {
            delegate.plugin_defined_build_command(&configuration, &input_files, &output_files);
        }
        PluginToHostMessage::DefinePrebuildCommand {
            configuration,
            output_files_directory,
        } => {
            delegate.plugin_defined_prebuild_command(&configuration, &output_files_directory);
        }
        PluginToHostMessage::BuildOperationRequest { subset, parameters } => {
            let delegate = Arc::clone(delegate);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = match delegate.build_requested(subset, parameters).await {
                    Ok(result) => HostToPluginMessage::BuildOperationResponse { result },
                    Err(e) => HostToPluginMessage::ErrorResponse {
                        error: e.to_string(),
                    },
                };
                let _ = reply_tx.send(reply);
            });
        }
        PluginToHostMessage::TestOperationRequest { subset, parameters } => {
            let delegate = Arc::clone(delegate);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = match delegate.test_requested(subset, parameters).await {
                    Ok(result) => HostToPluginMessage::TestOperationResponse { result },
                    Err(e) => HostToPluginMessage::ErrorResponse {
                        error: e.to_string(),
                    },
                };
                let _ = reply_tx.send(reply);
            });
        }
        PluginToHostMessage::SymbolGraphRequest {
            target_name,
            options,
        } => {
            let delegate = Arc::clone(delegate);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let reply = match delegate.symbol_graph_requested(target_name, options).await {
                    Ok(result) => HostToPluginMessage::SymbolGraphResponse { result },
                    Err(e) => HostToPluginMessage::ErrorResponse {
                        error: e.to_string(),
                    },
                };
                let _ = reply_tx.send(reply);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::messages::{
        encode_message, BuildParameters, BuildResult, BuildSubset, DiagnosticSeverity,
        SymbolGraphOptions, SymbolGraphResult, TestParameters, TestResult, TestSubset,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingDelegate {
        diagnostics: Mutex<Vec<(DiagnosticSeverity, String)>>,
        commands: Mutex<Vec<String>>,
        output: Mutex<Vec<u8>>,
        fail_builds: bool,
    }

    #[async_trait]
    impl PluginInvocationDelegate for RecordingDelegate {
        fn plugin_emitted_output(&self, chunk: &[u8]) {
            self.output.lock().unwrap().extend_from_slice(chunk);
        }

        fn plugin_emitted_diagnostic(
            &self,
            severity: DiagnosticSeverity,
            message: &str,
            _file: Option<&Path>,
            _line: Option<u32>,
        ) {
            self.diagnostics
                .lock()
                .unwrap()
                .push((severity, message.to_string()));
        }

        fn plugin_defined_build_command(
            &self,
            configuration: &crate::plugin::messages::CommandConfiguration,
            _input_files: &[PathBuf],
            _output_files: &[PathBuf],
        ) {
            self.commands
                .lock()
                .unwrap()
                .push(configuration.executable.display().to_string());
        }

        async fn build_requested(
            &self,
            _subset: BuildSubset,
            _parameters: BuildParameters,
        ) -> SwiftpackResult<BuildResult> {
            if self.fail_builds {
                return Err(SwiftpackError::Internal("build broke".to_string()));
            }
            Ok(BuildResult {
                succeeded: true,
                log_text: "built".to_string(),
                built_artifacts: vec![],
            })
        }

        async fn test_requested(
            &self,
            _subset: TestSubset,
            _parameters: TestParameters,
        ) -> SwiftpackResult<TestResult> {
            Ok(TestResult {
                succeeded: true,
                code_coverage_data_file: None,
            })
        }

        async fn symbol_graph_requested(
            &self,
            _target_name: String,
            _options: SymbolGraphOptions,
        ) -> SwiftpackResult<SymbolGraphResult> {
            Ok(SymbolGraphResult {
                directory_path: PathBuf::from("/tmp/symbols"),
            })
        }
    }

    #[tokio::test]
    async fn build_request_gets_a_response() {
        let delegate: Arc<dyn PluginInvocationDelegate> = Arc::new(RecordingDelegate::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let error_seen = Arc::new(AtomicBool::new(false));

        handle_plugin_message(
            PluginToHostMessage::BuildOperationRequest {
                subset: BuildSubset::All {
                    including_tests: false,
                },
                parameters: BuildParameters {
                    configuration: crate::plugin::messages::BuildConfiguration::Debug,
                    echo_logs: false,
                    other_flags: vec![],
                },
            },
            &delegate,
            &tx,
            &error_seen,
        );

        match rx.recv().await.unwrap() {
            HostToPluginMessage::BuildOperationResponse { result } => {
                assert!(result.succeeded);
                assert_eq!(result.log_text, "built");
            }
            other => panic!("expected build response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_build_request_gets_an_error_response() {
        let delegate: Arc<dyn PluginInvocationDelegate> = Arc::new(RecordingDelegate {
            fail_builds: true,
            ..Default::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let error_seen = Arc::new(AtomicBool::new(false));

        handle_plugin_message(
            PluginToHostMessage::BuildOperationRequest {
                subset: BuildSubset::Product("Lib".to_string()),
                parameters: BuildParameters {
                    configuration: crate::plugin::messages::BuildConfiguration::Release,
                    echo_logs: false,
                    other_flags: vec![],
                },
            },
            &delegate,
            &tx,
            &error_seen,
        );

        match rx.recv().await.unwrap() {
            HostToPluginMessage::ErrorResponse { error } => {
                assert!(error.contains("build broke"));
            }
            other => panic!("expected error response, got {other:?}"),
        }
    }

    #[cfg(unix)]
    mod with_child_process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        struct Fixture {
            _dir: tempfile::TempDir,
            runner: PluginScriptRunner,
            plugin: PathBuf,
        }

        /// A plugin whose body is a shell script
        fn fixture(script_body: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let plugin = dir.path().join("plugin.sh");
            std::fs::write(&plugin, format!("#!/bin/sh\n{script_body}")).unwrap();
            std::fs::set_permissions(&plugin, std::fs::Permissions::from_mode(0o755)).unwrap();

            let runner = PluginScriptRunner::new(dir.path().join("plugins"), false);
            Fixture {
                runner,
                plugin,
                _dir: dir,
            }
        }

        fn write_frames(dir: &Path, messages: &[PluginToHostMessage]) -> PathBuf {
            let mut bytes = Vec::new();
            for message in messages {
                bytes.extend_from_slice(&encode_message(message).unwrap());
            }
            let path = dir.join("frames.bin");
            std::fs::write(&path, bytes).unwrap();
            path
        }

        async fn invoke(
            fx: &Fixture,
        ) -> (SwiftpackResult<PluginInvocationResult>, Arc<RecordingDelegate>) {
            let delegate = Arc::new(RecordingDelegate::default());
            let result = fx
                .runner
                .invoke(
                    &fx.plugin,
                    &[],
                    &[],
                    serde_json::json!({ "action": "createBuildToolCommands" }),
                    Arc::clone(&delegate) as Arc<dyn PluginInvocationDelegate>,
                )
                .await;
            (result, delegate)
        }

        #[tokio::test]
        async fn messages_are_dispatched_in_order() {
            let fx = fixture("");
            let frames = write_frames(
                fx._dir.path(),
                &[
                    PluginToHostMessage::EmitDiagnostic {
                        severity: DiagnosticSeverity::Warning,
                        message: "heads up".to_string(),
                        file: None,
                        line: None,
                    },
                    PluginToHostMessage::DefineBuildCommand {
                        configuration: crate::plugin::messages::CommandConfiguration {
                            display_name: None,
                            executable: PathBuf::from("/usr/bin/gen"),
                            arguments: vec![],
                            environment: Default::default(),
                            working_directory: None,
                        },
                        input_files: vec![],
                        output_files: vec![],
                    },
                ],
            );
            std::fs::write(
                &fx.plugin,
                format!("#!/bin/sh\ncat '{}'\nexit 0\n", frames.display()),
            )
            .unwrap();

            let (result, delegate) = invoke(&fx).await;
            assert!(result.unwrap().succeeded);

            let diagnostics = delegate.diagnostics.lock().unwrap().clone();
            assert_eq!(
                diagnostics,
                vec![(DiagnosticSeverity::Warning, "heads up".to_string())]
            );
            assert_eq!(
                delegate.commands.lock().unwrap().clone(),
                vec!["/usr/bin/gen".to_string()]
            );
        }

        #[tokio::test]
        async fn silent_nonzero_exit_synthesizes_an_error_diagnostic() {
            let fx = fixture("exit 3\n");
            let (result, delegate) = invoke(&fx).await;

            let result = result.unwrap();
            assert!(!result.succeeded);
            let diagnostics = delegate.diagnostics.lock().unwrap().clone();
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].0, DiagnosticSeverity::Error);
            assert!(diagnostics[0].1.contains('3'));
        }

        #[tokio::test]
        async fn nonzero_exit_with_error_diagnostic_is_not_doubled() {
            let fx = fixture("");
            let frames = write_frames(
                fx._dir.path(),
                &[PluginToHostMessage::EmitDiagnostic {
                    severity: DiagnosticSeverity::Error,
                    message: "plugin says no".to_string(),
                    file: None,
                    line: None,
                }],
            );
            std::fs::write(
                &fx.plugin,
                format!("#!/bin/sh\ncat '{}'\nexit 2\n", frames.display()),
            )
            .unwrap();

            let (result, delegate) = invoke(&fx).await;
            assert!(!result.unwrap().succeeded);
            assert_eq!(delegate.diagnostics.lock().unwrap().len(), 1);
        }

        #[tokio::test]
        async fn death_by_signal_is_reported() {
            let fx = fixture("kill -9 $$\n");
            let (result, _) = invoke(&fx).await;
            assert!(matches!(
                result.unwrap_err(),
                SwiftpackError::PluginEndedBySignal(9)
            ));
        }

        #[tokio::test]
        async fn stderr_is_forwarded_and_captured() {
            let fx = fixture("echo 'free-form text' >&2\nexit 0\n");
            let (result, delegate) = invoke(&fx).await;

            let result = result.unwrap();
            assert!(result.succeeded);
            assert!(result.captured_stderr.contains("free-form text"));
            let output = delegate.output.lock().unwrap().clone();
            assert!(String::from_utf8_lossy(&output).contains("free-form text"));
        }

        #[tokio::test]
        async fn malformed_frames_are_a_protocol_error() {
            // A plugin that writes a one-byte frame header
            let garbage = fx_garbage_path();
            let fx = fixture(&format!("cat '{}'\nsleep 5\n", garbage.0.display()));
            let _keep = garbage.1;

            let (result, _) = invoke(&fx).await;
            assert!(matches!(
                result.unwrap_err(),
                SwiftpackError::PluginInvalidPayloadSize(1)
            ));
        }

        fn fx_garbage_path() -> (PathBuf, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("garbage.bin");
            let mut bytes = 1u64.to_le_bytes().to_vec();
            bytes.push(b'x');
            std::fs::write(&path, bytes).unwrap();
            (path, dir)
        }
    }
}

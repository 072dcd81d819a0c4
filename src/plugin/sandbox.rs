//! Plugin sandbox policy
//!
//! Wraps a plugin's argv in a platform sandbox that denies network
//! access and confines writes to an explicit allowlist. On platforms
//! without a sandbox primitive, or when sandboxing is disabled, the wrap
//! is the identity.

use std::path::{Path, PathBuf};

/// Sandbox policy applied to a plugin invocation.
///
/// The writable list is additive; the plugin cache directory is always
/// included.
#[derive(Debug, Clone)]
pub struct SandboxProfile {
    enabled: bool,
    writable_directories: Vec<PathBuf>,
    readable_directories: Vec<PathBuf>,
}

impl SandboxProfile {
    pub fn new(
        cache_dir: &Path,
        writable_directories: &[PathBuf],
        readable_directories: &[PathBuf],
    ) -> Self {
        let mut writable = vec![cache_dir.to_path_buf()];
        writable.extend(writable_directories.iter().cloned());
        Self {
            enabled: true,
            writable_directories: writable,
            readable_directories: readable_directories.to_vec(),
        }
    }

    /// A profile that leaves argv untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            writable_directories: Vec::new(),
            readable_directories: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn writable_directories(&self) -> &[PathBuf] {
        &self.writable_directories
    }

    /// Wrap an argv in the sandbox, if one applies on this host
    pub fn apply(&self, command: Vec<String>) -> Vec<String> {
        if !self.enabled || !cfg!(target_os = "macos") {
            return command;
        }

        let mut wrapped = vec![
            "/usr/bin/sandbox-exec".to_string(),
            "-p".to_string(),
            self.profile_text(),
        ];
        wrapped.extend(command);
        wrapped
    }

    /// The generated policy text: deny by default, allow reads and
    /// process control, deny network, allow writes under the allowlist.
    pub fn profile_text(&self) -> String {
        let mut profile = String::from("(version 1)\n(deny default)\n");
        profile.push_str("(import \"system.sb\")\n");
        profile.push_str("(allow process-fork)\n(allow process-exec*)\n");
        profile.push_str("(allow file-read*)\n");
        profile.push_str("(deny network*)\n");

        for dir in &self.readable_directories {
            profile.push_str(&format!(
                "(allow file-read* (subpath {}))\n",
                quote(&dir.display().to_string())
            ));
        }
        for dir in &self.writable_directories {
            profile.push_str(&format!(
                "(allow file-write* (subpath {}))\n",
                quote(&dir.display().to_string())
            ));
        }
        profile
    }
}

fn quote(path: &str) -> String {
    format!("\"{}\"", path.replace('\\', "\\\\").replace('"', "\\\""))
}

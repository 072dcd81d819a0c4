//! Repository provider backed by the `git` CLI
//!
//! Bare mirror clones serve as the master copies; working copies are
//! plain clones of the local mirror. All operations shell out to `git`.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::repository::{
    FetchProgress, ProgressSink, Repository, RepositoryProvider, RepositorySpecifier, WorkingCopy,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Run `git` with the given arguments and return trimmed stdout
async fn git(args: &[&str], cwd: Option<&Path>) -> SwiftpackResult<String> {
    debug!("Executing: git {:?}", args);

    let mut cmd = Command::new("git");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| SwiftpackError::command_failed(format!("git {args:?}"), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SwiftpackError::command_exec(
            format!("git {args:?}"),
            stderr.trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`git`] but returns raw stdout bytes (for blob reads)
async fn git_bytes(args: &[&str], cwd: &Path) -> SwiftpackResult<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| SwiftpackError::command_failed(format!("git {args:?}"), e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SwiftpackError::command_exec(
            format!("git {args:?}"),
            stderr.trim().to_string(),
        ));
    }

    Ok(output.stdout)
}

/// Run a fetching `git` command, forwarding `--progress` stderr lines
async fn git_with_progress(
    args: &[&str],
    cwd: Option<&Path>,
    progress: Option<&ProgressSink>,
) -> SwiftpackResult<()> {
    debug!("Executing with progress: git {:?}", args);

    let mut cmd = Command::new("git");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SwiftpackError::command_failed(format!("git {args:?}"), e))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SwiftpackError::Internal("git stderr not captured".to_string()))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        captured.push_str(&line);
        captured.push('\n');
        if let Some(sink) = progress {
            sink(FetchProgress { text: line });
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| SwiftpackError::command_failed(format!("git {args:?}"), e))?;

    if !status.success() {
        return Err(SwiftpackError::command_exec(
            format!("git {args:?}"),
            captured.trim().to_string(),
        ));
    }
    Ok(())
}

fn looks_like_revision(reference: &str) -> bool {
    let n = reference.len();
    (7..=40).contains(&n) && reference.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Provider implementation over the `git` CLI
#[derive(Debug, Default)]
pub struct GitRepositoryProvider;

impl GitRepositoryProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RepositoryProvider for GitRepositoryProvider {
    async fn fetch(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
        progress: Option<&ProgressSink>,
    ) -> SwiftpackResult<()> {
        let location = specifier.location();
        let dest = path.display().to_string();
        git_with_progress(
            &["clone", "--mirror", "--progress", &location, &dest],
            None,
            progress,
        )
        .await
        .map_err(|e| SwiftpackError::RepositoryFetch {
            specifier: location,
            reason: e.to_string(),
        })
    }

    async fn open(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
    ) -> SwiftpackResult<Box<dyn Repository>> {
        if !self.is_valid_directory(path).await? {
            return Err(SwiftpackError::InvalidRepository {
                path: path.to_path_buf(),
            });
        }
        Ok(Box::new(GitRepository {
            path: path.to_path_buf(),
            specifier: specifier.clone(),
        }))
    }

    async fn copy(&self, from: &Path, to: &Path) -> SwiftpackResult<()> {
        let from = from.to_path_buf();
        let to = to.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&from, &to))
            .await
            .map_err(|e| SwiftpackError::Internal(format!("copy task failed: {e}")))?
    }

    async fn create_working_copy(
        &self,
        specifier: &RepositorySpecifier,
        source: &Path,
        path: &Path,
        editable: bool,
    ) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        let src = source.display().to_string();
        let dest = path.display().to_string();
        git(&["clone", "--no-checkout", &src, &dest], None).await?;

        // Editable checkouts track the true origin so pushes go upstream
        if editable {
            let location = specifier.location();
            git(&["remote", "set-url", "origin", &location], Some(path)).await?;
        }

        Ok(Box::new(GitWorkingCopy {
            path: path.to_path_buf(),
        }))
    }

    async fn open_working_copy(&self, path: &Path) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        git(&["rev-parse", "--git-dir"], Some(path))
            .await
            .map_err(|_| SwiftpackError::InvalidRepository {
                path: path.to_path_buf(),
            })?;
        Ok(Box::new(GitWorkingCopy {
            path: path.to_path_buf(),
        }))
    }

    async fn is_valid_directory(&self, path: &Path) -> SwiftpackResult<bool> {
        if !path.is_dir() {
            return Ok(false);
        }
        Ok(git(&["rev-parse", "--git-dir"], Some(path)).await.is_ok())
    }

    fn is_valid_ref_format(&self, reference: &str) -> bool {
        is_valid_ref_format(reference)
    }
}

/// Pure predicate mirroring `git check-ref-format` for branch/tag names
pub fn is_valid_ref_format(reference: &str) -> bool {
    if reference.is_empty() || reference == "@" {
        return false;
    }
    if reference.starts_with('/') || reference.ends_with('/') || reference.ends_with('.') {
        return false;
    }
    if reference.contains("..") || reference.contains("@{") || reference.contains("//") {
        return false;
    }
    for component in reference.split('/') {
        if component.is_empty() || component.starts_with('.') || component.ends_with(".lock") {
            return false;
        }
    }
    !reference.chars().any(|c| {
        c.is_ascii_control()
            || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\')
    })
}

/// An opened bare mirror
struct GitRepository {
    path: PathBuf,
    specifier: RepositorySpecifier,
}

impl GitRepository {
    async fn ref_names(&self, pattern: &str) -> SwiftpackResult<Vec<String>> {
        let out = git(
            &["for-each-ref", "--format=%(refname:short)", pattern],
            Some(&self.path),
        )
        .await?;
        Ok(out.lines().map(str::to_string).collect())
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn tags(&self) -> SwiftpackResult<Vec<String>> {
        self.ref_names("refs/tags").await
    }

    async fn branches(&self) -> SwiftpackResult<Vec<String>> {
        self.ref_names("refs/heads").await
    }

    async fn resolve_revision(&self, reference: &str) -> SwiftpackResult<String> {
        let tag_ref = format!("refs/tags/{reference}^{{commit}}");
        if let Ok(revision) = git(&["rev-parse", "--verify", &tag_ref], Some(&self.path)).await {
            return Ok(revision);
        }
        let head_ref = format!("refs/heads/{reference}^{{commit}}");
        if let Ok(revision) = git(&["rev-parse", "--verify", &head_ref], Some(&self.path)).await {
            return Ok(revision);
        }
        if looks_like_revision(reference) {
            let commit = format!("{reference}^{{commit}}");
            if let Ok(revision) = git(&["rev-parse", "--verify", &commit], Some(&self.path)).await {
                return Ok(revision);
            }
            return Err(SwiftpackError::NoSuchRevision(reference.to_string()));
        }
        Err(SwiftpackError::NoSuchBranch {
            name: reference.to_string(),
            suggestion: None,
        })
    }

    async fn has_revision(&self, revision: &str) -> SwiftpackResult<bool> {
        let commit = format!("{revision}^{{commit}}");
        Ok(git(&["rev-parse", "--verify", "--quiet", &commit], Some(&self.path))
            .await
            .is_ok())
    }

    async fn fetch(&self, progress: Option<&ProgressSink>) -> SwiftpackResult<()> {
        git_with_progress(
            &["remote", "update", "--prune"],
            Some(&self.path),
            progress,
        )
        .await
        .map_err(|e| SwiftpackError::RepositoryFetch {
            specifier: self.specifier.location(),
            reason: e.to_string(),
        })
    }

    async fn read_file(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<u8>> {
        let spec = format!("{revision}:{}", path.display());
        git_bytes(&["show", &spec], &self.path)
            .await
            .map_err(|_| SwiftpackError::PathNotFound(path.to_path_buf()))
    }

    async fn list_directory(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<String>> {
        let tree = if path.as_os_str().is_empty() {
            revision.to_string()
        } else {
            format!("{revision}:{}", path.display())
        };
        let out = git(&["ls-tree", "--name-only", &tree], Some(&self.path)).await?;
        Ok(out.lines().map(str::to_string).collect())
    }
}

/// A checked-out working tree
struct GitWorkingCopy {
    path: PathBuf,
}

#[async_trait]
impl WorkingCopy for GitWorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn check_out(&self, revision: &str) -> SwiftpackResult<()> {
        git(&["checkout", "--force", revision], Some(&self.path)).await?;
        Ok(())
    }

    async fn current_revision(&self) -> SwiftpackResult<String> {
        git(&["rev-parse", "HEAD"], Some(&self.path)).await
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> SwiftpackResult<()> {
    std::fs::create_dir_all(to)
        .map_err(|e| SwiftpackError::io(format!("creating {}", to.display()), e))?;

    let entries = std::fs::read_dir(from)
        .map_err(|e| SwiftpackError::io(format!("reading {}", from.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SwiftpackError::io("reading directory entry", e))?;
        let target = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| SwiftpackError::io("reading file type", e))?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| SwiftpackError::io(format!("copying to {}", target.display()), e))?;
        }
    }
    Ok(())
}

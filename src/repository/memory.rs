//! Scripted in-memory repository provider
//!
//! Backs the test suites and local tooling: repositories are declared in
//! code (tags, branches, per-revision file trees), while clones and
//! working copies still materialize as marker directories on the real
//! filesystem so the manager's disk discipline stays exercised.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::repository::{
    git::is_valid_ref_format, ProgressSink, Repository, RepositorySpecifier, WorkingCopy,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ORIGIN_MARKER: &str = ".swiftpack-origin";
const HEAD_MARKER: &str = ".swiftpack-head";

/// Scripted content of one repository
#[derive(Debug, Default)]
pub struct ScriptedRepository {
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    trees: HashMap<String, BTreeMap<PathBuf, Vec<u8>>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>, revision: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into(), revision.into());
        self
    }

    pub fn add_branch(
        &mut self,
        branch: impl Into<String>,
        revision: impl Into<String>,
    ) -> &mut Self {
        self.branches.insert(branch.into(), revision.into());
        self
    }

    pub fn add_file(
        &mut self,
        revision: impl Into<String>,
        path: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.trees
            .entry(revision.into())
            .or_default()
            .insert(path.into(), contents.into());
        self
    }

    fn has_revision(&self, revision: &str) -> bool {
        self.trees.contains_key(revision)
            || self.tags.values().any(|r| r == revision)
            || self.branches.values().any(|r| r == revision)
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    repositories: HashMap<String, Arc<Mutex<ScriptedRepository>>>,
    fetch_counts: HashMap<String, usize>,
    update_counts: HashMap<String, usize>,
    failing: HashSet<String>,
}

/// Provider over scripted repositories
#[derive(Debug, Default, Clone)]
pub struct InMemoryRepositoryProvider {
    state: Arc<Mutex<ProviderState>>,
    fetch_delay: Arc<Mutex<Option<Duration>>>,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scripted repository under a specifier
    pub fn add(
        &self,
        specifier: &RepositorySpecifier,
        repository: ScriptedRepository,
    ) -> Arc<Mutex<ScriptedRepository>> {
        let shared = Arc::new(Mutex::new(repository));
        self.state
            .lock()
            .unwrap()
            .repositories
            .insert(specifier.location(), Arc::clone(&shared));
        shared
    }

    /// Make fetches of `specifier` fail until cleared
    pub fn fail_fetches(&self, specifier: &RepositorySpecifier, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(specifier.location());
        } else {
            state.failing.remove(&specifier.location());
        }
    }

    /// Artificial latency injected into every fetch
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock().unwrap() = delay;
    }

    /// Number of full clones performed for `specifier`
    pub fn fetch_count(&self, specifier: &RepositorySpecifier) -> usize {
        self.state
            .lock()
            .unwrap()
            .fetch_counts
            .get(&specifier.location())
            .copied()
            .unwrap_or(0)
    }

    /// Number of incremental updates performed for `specifier`
    pub fn update_count(&self, specifier: &RepositorySpecifier) -> usize {
        self.state
            .lock()
            .unwrap()
            .update_counts
            .get(&specifier.location())
            .copied()
            .unwrap_or(0)
    }

    fn scripted(&self, location: &str) -> SwiftpackResult<Arc<Mutex<ScriptedRepository>>> {
        self.state
            .lock()
            .unwrap()
            .repositories
            .get(location)
            .cloned()
            .ok_or_else(|| SwiftpackError::UnknownRepository(location.to_string()))
    }
}

#[async_trait]
impl crate::repository::RepositoryProvider for InMemoryRepositoryProvider {
    async fn fetch(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
        _progress: Option<&ProgressSink>,
    ) -> SwiftpackResult<()> {
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let location = specifier.location();
        {
            let mut state = self.state.lock().unwrap();
            if state.failing.contains(&location) {
                return Err(SwiftpackError::RepositoryFetch {
                    specifier: location,
                    reason: "scripted fetch failure".to_string(),
                });
            }
            if !state.repositories.contains_key(&location) {
                return Err(SwiftpackError::UnknownRepository(location));
            }
            *state.fetch_counts.entry(location).or_default() += 1;
        }

        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", path.display()), e))?;
        tokio::fs::write(path.join(ORIGIN_MARKER), specifier.location())
            .await
            .map_err(|e| SwiftpackError::io("writing origin marker", e))?;
        Ok(())
    }

    async fn open(
        &self,
        specifier: &RepositorySpecifier,
        path: &Path,
    ) -> SwiftpackResult<Box<dyn Repository>> {
        if !path.join(ORIGIN_MARKER).exists() {
            return Err(SwiftpackError::InvalidRepository {
                path: path.to_path_buf(),
            });
        }
        Ok(Box::new(InMemoryRepository {
            provider: self.clone(),
            location: specifier.location(),
            scripted: self.scripted(&specifier.location())?,
        }))
    }

    async fn copy(&self, from: &Path, to: &Path) -> SwiftpackResult<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::create_dir_all(to)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", to.display()), e))?;
        let origin = tokio::fs::read(from.join(ORIGIN_MARKER))
            .await
            .map_err(|e| SwiftpackError::io("reading origin marker", e))?;
        tokio::fs::write(to.join(ORIGIN_MARKER), origin)
            .await
            .map_err(|e| SwiftpackError::io("writing origin marker", e))?;
        Ok(())
    }

    async fn create_working_copy(
        &self,
        specifier: &RepositorySpecifier,
        _source: &Path,
        path: &Path,
        _editable: bool,
    ) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", path.display()), e))?;
        tokio::fs::write(path.join(ORIGIN_MARKER), specifier.location())
            .await
            .map_err(|e| SwiftpackError::io("writing origin marker", e))?;
        Ok(Box::new(InMemoryWorkingCopy {
            path: path.to_path_buf(),
            scripted: self.scripted(&specifier.location())?,
        }))
    }

    async fn open_working_copy(&self, path: &Path) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        let origin = tokio::fs::read_to_string(path.join(ORIGIN_MARKER))
            .await
            .map_err(|_| SwiftpackError::InvalidRepository {
                path: path.to_path_buf(),
            })?;
        Ok(Box::new(InMemoryWorkingCopy {
            path: path.to_path_buf(),
            scripted: self.scripted(&origin)?,
        }))
    }

    async fn is_valid_directory(&self, path: &Path) -> SwiftpackResult<bool> {
        Ok(path.join(ORIGIN_MARKER).exists())
    }

    fn is_valid_ref_format(&self, reference: &str) -> bool {
        is_valid_ref_format(reference)
    }
}

struct InMemoryRepository {
    provider: InMemoryRepositoryProvider,
    location: String,
    scripted: Arc<Mutex<ScriptedRepository>>,
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn tags(&self) -> SwiftpackResult<Vec<String>> {
        Ok(self.scripted.lock().unwrap().tags.keys().cloned().collect())
    }

    async fn branches(&self) -> SwiftpackResult<Vec<String>> {
        Ok(self
            .scripted
            .lock()
            .unwrap()
            .branches
            .keys()
            .cloned()
            .collect())
    }

    async fn resolve_revision(&self, reference: &str) -> SwiftpackResult<String> {
        let scripted = self.scripted.lock().unwrap();
        if let Some(revision) = scripted.tags.get(reference) {
            return Ok(revision.clone());
        }
        if let Some(revision) = scripted.branches.get(reference) {
            return Ok(revision.clone());
        }
        if scripted.has_revision(reference) {
            return Ok(reference.to_string());
        }
        Err(SwiftpackError::NoSuchBranch {
            name: reference.to_string(),
            suggestion: None,
        })
    }

    async fn has_revision(&self, revision: &str) -> SwiftpackResult<bool> {
        Ok(self.scripted.lock().unwrap().has_revision(revision))
    }

    async fn fetch(&self, _progress: Option<&ProgressSink>) -> SwiftpackResult<()> {
        let mut state = self.provider.state.lock().unwrap();
        if state.failing.contains(&self.location) {
            return Err(SwiftpackError::RepositoryFetch {
                specifier: self.location.clone(),
                reason: "scripted update failure".to_string(),
            });
        }
        *state.update_counts.entry(self.location.clone()).or_default() += 1;
        Ok(())
    }

    async fn read_file(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<u8>> {
        self.scripted
            .lock()
            .unwrap()
            .trees
            .get(revision)
            .and_then(|tree| tree.get(path))
            .cloned()
            .ok_or_else(|| SwiftpackError::PathNotFound(path.to_path_buf()))
    }

    async fn list_directory(&self, revision: &str, path: &Path) -> SwiftpackResult<Vec<String>> {
        let scripted = self.scripted.lock().unwrap();
        let tree = scripted
            .trees
            .get(revision)
            .ok_or_else(|| SwiftpackError::NoSuchRevision(revision.to_string()))?;

        let mut names: Vec<String> = tree
            .keys()
            .filter_map(|file| {
                let rest = file.strip_prefix(path).ok()?;
                rest.components()
                    .next()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

struct InMemoryWorkingCopy {
    path: PathBuf,
    scripted: Arc<Mutex<ScriptedRepository>>,
}

#[async_trait]
impl WorkingCopy for InMemoryWorkingCopy {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn check_out(&self, revision: &str) -> SwiftpackResult<()> {
        let tree = self
            .scripted
            .lock()
            .unwrap()
            .trees
            .get(revision)
            .cloned()
            .ok_or_else(|| SwiftpackError::NoSuchRevision(revision.to_string()))?;

        for (file, contents) in tree {
            let dest = self.path.join(&file);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
            }
            tokio::fs::write(&dest, contents)
                .await
                .map_err(|e| SwiftpackError::io(format!("writing {}", dest.display()), e))?;
        }
        tokio::fs::write(self.path.join(HEAD_MARKER), revision)
            .await
            .map_err(|e| SwiftpackError::io("writing head marker", e))?;
        Ok(())
    }

    async fn current_revision(&self) -> SwiftpackResult<String> {
        tokio::fs::read_to_string(self.path.join(HEAD_MARKER))
            .await
            .map_err(|e| SwiftpackError::io("reading head marker", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryProvider;

    fn scripted() -> ScriptedRepository {
        let mut repo = ScriptedRepository::new();
        repo.add_tag("1.0.0", "rev-a")
            .add_branch("main", "rev-b")
            .add_file("rev-a", "Package.swift", b"// swift-tools-version:5.5\n{}".to_vec())
            .add_file("rev-a", "Sources/Lib/lib.swift", b"".to_vec());
        repo
    }

    #[tokio::test]
    async fn fetch_open_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InMemoryRepositoryProvider::new();
        let spec = RepositorySpecifier::Url("https://example.com/dep.git".to_string());
        provider.add(&spec, scripted());

        let clone = dir.path().join("clone");
        provider.fetch(&spec, &clone, None).await.unwrap();
        assert_eq!(provider.fetch_count(&spec), 1);
        assert!(provider.is_valid_directory(&clone).await.unwrap());

        let repo = provider.open(&spec, &clone).await.unwrap();
        assert_eq!(repo.tags().await.unwrap(), vec!["1.0.0"]);
        assert_eq!(repo.resolve_revision("main").await.unwrap(), "rev-b");
        let manifest = repo
            .read_file("rev-a", Path::new("Package.swift"))
            .await
            .unwrap();
        assert!(manifest.starts_with(b"// swift-tools-version"));
    }

    #[tokio::test]
    async fn list_directory_returns_top_level_entries() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InMemoryRepositoryProvider::new();
        let spec = RepositorySpecifier::Url("https://example.com/dep.git".to_string());
        provider.add(&spec, scripted());

        let clone = dir.path().join("clone");
        provider.fetch(&spec, &clone, None).await.unwrap();
        let repo = provider.open(&spec, &clone).await.unwrap();

        let entries = repo.list_directory("rev-a", Path::new("")).await.unwrap();
        assert_eq!(entries, vec!["Package.swift", "Sources"]);
    }

    #[tokio::test]
    async fn working_copy_materializes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InMemoryRepositoryProvider::new();
        let spec = RepositorySpecifier::Url("https://example.com/dep.git".to_string());
        provider.add(&spec, scripted());

        let checkout = dir.path().join("checkout");
        let copy = provider
            .create_working_copy(&spec, Path::new("/unused"), &checkout, false)
            .await
            .unwrap();
        copy.check_out("rev-a").await.unwrap();

        assert!(checkout.join("Sources/Lib/lib.swift").exists());
        assert_eq!(copy.current_revision().await.unwrap(), "rev-a");
    }

    #[tokio::test]
    async fn scripted_failures_surface() {
        let dir = tempfile::tempdir().unwrap();
        let provider = InMemoryRepositoryProvider::new();
        let spec = RepositorySpecifier::Url("https://example.com/dep.git".to_string());
        provider.add(&spec, scripted());
        provider.fail_fetches(&spec, true);

        let err = provider
            .fetch(&spec, &dir.path().join("clone"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SwiftpackError::RepositoryFetch { .. }));
    }
}

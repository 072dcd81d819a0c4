//! Concurrent repository manager
//!
//! Maintains bare clones under a working directory, keyed by each
//! specifier's filesystem identifier. Lookups for the same specifier are
//! coalesced (single-flight); distinct lookups run on a bounded pool. A
//! shared second-tier cache, when configured, is consulted before any
//! direct fetch and is guarded by cross-process advisory locks.
//!
//! Lock order: pending-lookups map, repositories map, cache-root file
//! lock, cached-clone file lock. Never acquire in the other direction.

use crate::error::{SwiftpackError, SwiftpackResult};
use crate::repository::storage::RepositoryManagerStorage;
use crate::repository::{
    FetchDetails, FetchProgress, Repository, RepositoryHandle, RepositoryManagerDelegate,
    RepositoryProvider, RepositorySpecifier, WorkingCopy,
};
use std::collections::{hash_map::Entry, BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::fs;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, warn};

/// Name of the lock file guarding a shared cache root
const CACHE_LOCK: &str = "cache.lock";

/// Configuration of a [`RepositoryManager`]
#[derive(Debug, Clone)]
pub struct RepositoryManagerConfig {
    /// Directory holding the bare clones
    pub path: PathBuf,

    /// State file listing the ready-to-use clones
    pub state_path: PathBuf,

    /// Shared second-tier cache root, if any
    pub cache_path: Option<PathBuf>,

    /// Route local packages through the shared cache too
    pub cache_local_packages: bool,

    /// Upper bound requested by the caller; the effective pool size is
    /// `min(3, max_concurrent_operations)`
    pub max_concurrent_operations: usize,
}

impl RepositoryManagerConfig {
    pub fn new(path: PathBuf, state_path: PathBuf) -> Self {
        Self {
            path,
            state_path,
            cache_path: None,
            cache_local_packages: crate::config::cache_local_packages(),
            max_concurrent_operations: 3,
        }
    }
}

/// Concurrent, content-addressed cache of bare clones
pub struct RepositoryManager {
    path: PathBuf,
    cache_path: Option<PathBuf>,
    cache_local_packages: bool,
    provider: Arc<dyn RepositoryProvider>,
    delegate: Option<Arc<dyn RepositoryManagerDelegate>>,
    storage: RepositoryManagerStorage,
    repositories: Mutex<BTreeMap<String, RepositoryHandle>>,
    pending_lookups: Mutex<HashMap<String, broadcast::Sender<()>>>,
    concurrency: Semaphore,
}

impl RepositoryManager {
    /// Create a manager, loading persisted state.
    ///
    /// A corrupt state file is reset with a warning and the manager starts
    /// empty.
    pub async fn new(
        config: RepositoryManagerConfig,
        provider: Arc<dyn RepositoryProvider>,
        delegate: Option<Arc<dyn RepositoryManagerDelegate>>,
    ) -> Self {
        let storage = RepositoryManagerStorage::new(config.state_path);
        let repositories = match storage.load().await {
            Ok(map) => map,
            Err(e) => {
                warn!("Resetting corrupt repository state: {e}");
                let _ = storage.reset().await;
                BTreeMap::new()
            }
        };

        let permits = config.max_concurrent_operations.clamp(1, 3);
        Self {
            path: config.path,
            cache_path: config.cache_path,
            cache_local_packages: config.cache_local_packages,
            provider,
            delegate,
            storage,
            repositories: Mutex::new(repositories),
            pending_lookups: Mutex::new(HashMap::new()),
            concurrency: Semaphore::new(permits),
        }
    }

    /// The handle a specifier maps to under this manager's layout
    pub fn handle_for(&self, specifier: &RepositorySpecifier) -> RepositoryHandle {
        RepositoryHandle::new(specifier.clone())
    }

    /// Absolute path of a handle's bare clone
    pub fn repository_path(&self, handle: &RepositoryHandle) -> PathBuf {
        self.path.join(&handle.subpath)
    }

    /// Look up a repository, fetching it if needed.
    ///
    /// With `skip_update`, a clone already known to the manager is returned
    /// as-is; otherwise it is refreshed from its origin first. Concurrent
    /// lookups for the same specifier coalesce into one fetch.
    pub async fn lookup(
        &self,
        specifier: &RepositorySpecifier,
        skip_update: bool,
    ) -> SwiftpackResult<RepositoryHandle> {
        let location = specifier.location();

        loop {
            // Fast path: the clone is already tracked
            let known = self.repositories.lock().unwrap().get(&location).cloned();
            if let Some(handle) = known {
                match self.provider.open(specifier, &self.repository_path(&handle)).await {
                    Ok(repository) => {
                        if !skip_update {
                            self.update_handle(&handle, repository.as_ref()).await?;
                        }
                        return Ok(handle);
                    }
                    Err(e) => {
                        // The tracked clone is unusable; drop it and refetch
                        warn!("Discarding unusable clone for {location}: {e}");
                        self.repositories.lock().unwrap().remove(&location);
                    }
                }
            }

            // Single-flight: either join an in-flight fetch or claim it
            let waiter = {
                let mut pending = self.pending_lookups.lock().unwrap();
                match pending.entry(location.clone()) {
                    Entry::Occupied(entry) => Some(entry.get().subscribe()),
                    Entry::Vacant(slot) => {
                        let (sender, _) = broadcast::channel(1);
                        slot.insert(sender);
                        None
                    }
                }
            };
            if let Some(mut receiver) = waiter {
                let _ = receiver.recv().await;
                continue;
            }

            let result = self.perform_fetch(specifier, &location).await;

            // Wake waiters under the same mutex that covers registration
            let sender = self.pending_lookups.lock().unwrap().remove(&location);
            if let Some(sender) = sender {
                let _ = sender.send(());
            }

            return result;
        }
    }

    async fn update_handle(
        &self,
        handle: &RepositoryHandle,
        repository: &dyn Repository,
    ) -> SwiftpackResult<()> {
        self.notify(|d| d.handle_will_update(handle));
        let started = Instant::now();

        let sink = self.progress_sink(handle);
        repository.fetch(Some(&sink)).await?;

        self.notify(|d| d.handle_did_update(handle, started.elapsed()));
        Ok(())
    }

    async fn perform_fetch(
        &self,
        specifier: &RepositorySpecifier,
        location: &str,
    ) -> SwiftpackResult<RepositoryHandle> {
        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| SwiftpackError::Internal("lookup pool closed".to_string()))?;

        let handle = self.handle_for(specifier);
        let repository_path = self.repository_path(&handle);
        let scratch_path = self
            .path
            .join(format!(".tmp-{}", handle.subpath.display()));

        // Clear anything left behind by an interrupted fetch
        remove_dir_if_present(&repository_path).await?;
        remove_dir_if_present(&scratch_path).await?;
        fs::create_dir_all(&self.path)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", self.path.display()), e))?;

        self.notify(|d| d.fetching_will_begin(&handle));
        let started = Instant::now();
        let result = self.fetch_and_populate_cache(&handle, &scratch_path).await;
        let duration = started.elapsed();
        self.notify(|d| d.fetching_did_finish(&handle, result.as_ref().err(), duration));

        let details = match result {
            Ok(details) => details,
            Err(e) => {
                // A failed fetch leaves no partial state
                remove_dir_if_present(&scratch_path).await?;
                return Err(e);
            }
        };

        // The clone appears at its final path atomically
        fs::rename(&scratch_path, &repository_path)
            .await
            .map_err(|e| {
                SwiftpackError::io(format!("moving clone to {}", repository_path.display()), e)
            })?;
        debug!(
            "Fetched {location} (from_cache: {}, updated_cache: {})",
            details.from_cache, details.updated_cache
        );

        let snapshot = {
            let mut repositories = self.repositories.lock().unwrap();
            repositories.insert(location.to_string(), handle.clone());
            repositories.clone()
        };
        // Persistence failure after a successful fetch is fatal
        self.storage.save(&snapshot).await?;

        Ok(handle)
    }

    /// Two-tier fetch: populate the shared cache (if configured and
    /// applicable) and copy from it; fall back to a direct fetch on any
    /// cache trouble.
    async fn fetch_and_populate_cache(
        &self,
        handle: &RepositoryHandle,
        repository_path: &Path,
    ) -> SwiftpackResult<FetchDetails> {
        let sink = self.progress_sink(handle);

        let use_cache = !handle.specifier.is_local() || self.cache_local_packages;
        if let Some(cache_root) = self.cache_path.clone().filter(|_| use_cache) {
            match self
                .fetch_via_cache(handle, repository_path, &cache_root, &sink)
                .await
            {
                Ok(details) => return Ok(details),
                Err(e) => {
                    warn!(
                        "Couldn't use shared cache for {}, fetching directly: {e}",
                        handle.specifier
                    );
                    remove_dir_if_present(repository_path).await?;
                    self.provider
                        .fetch(&handle.specifier, repository_path, Some(&sink))
                        .await?;
                    return Ok(FetchDetails {
                        from_cache: false,
                        updated_cache: false,
                    });
                }
            }
        }

        self.provider
            .fetch(&handle.specifier, repository_path, Some(&sink))
            .await?;
        Ok(FetchDetails::default())
    }

    async fn fetch_via_cache(
        &self,
        handle: &RepositoryHandle,
        repository_path: &Path,
        cache_root: &Path,
        sink: &(impl Fn(FetchProgress) + Send + Sync + 'static),
    ) -> SwiftpackResult<FetchDetails> {
        fs::create_dir_all(cache_root)
            .await
            .map_err(|e| SwiftpackError::io(format!("creating {}", cache_root.display()), e))?;

        // Shared on the root, exclusive on the individual cached clone
        let _root_lock = crate::state::FileLock::shared(&cache_root.join(CACHE_LOCK)).await?;
        let cached_path = cache_root.join(&handle.subpath);
        let clone_lock_path = cache_root.join(format!("{}.lock", handle.subpath.display()));
        let _clone_lock = crate::state::FileLock::exclusive(&clone_lock_path).await?;

        let mut details = FetchDetails::default();
        if cached_path.is_dir() {
            let repository = self.provider.open(&handle.specifier, &cached_path).await?;
            repository.fetch(Some(sink)).await?;
            details.from_cache = true;
            details.updated_cache = true;
        } else {
            self.provider
                .fetch(&handle.specifier, &cached_path, Some(sink))
                .await?;
            details.updated_cache = true;
        }

        if let Some(parent) = repository_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SwiftpackError::io(format!("creating {}", parent.display()), e))?;
        }
        self.provider.copy(&cached_path, repository_path).await?;
        Ok(details)
    }

    /// Forget a repository and delete its clone. No-op if absent.
    pub async fn remove(&self, specifier: &RepositorySpecifier) -> SwiftpackResult<()> {
        let location = specifier.location();
        let removed = self.repositories.lock().unwrap().remove(&location);
        if removed.is_some() {
            let snapshot = self.repositories.lock().unwrap().clone();
            self.storage.save(&snapshot).await?;
        }
        let handle = self.handle_for(specifier);
        remove_dir_if_present(&self.repository_path(&handle)).await
    }

    /// Drop all state and delete the working directory
    pub async fn reset(&self) -> SwiftpackResult<()> {
        self.repositories.lock().unwrap().clear();
        self.storage.reset().await?;
        remove_dir_if_present(&self.path).await
    }

    /// Delete every clone in the shared cache
    pub async fn purge_cache(&self) -> SwiftpackResult<()> {
        let Some(cache_root) = &self.cache_path else {
            return Ok(());
        };
        if !cache_root.is_dir() {
            return Ok(());
        }

        let _lock = crate::state::FileLock::exclusive(&cache_root.join(CACHE_LOCK)).await?;
        let mut entries = fs::read_dir(cache_root)
            .await
            .map_err(|e| SwiftpackError::io(format!("reading {}", cache_root.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SwiftpackError::io("reading cache entry", e))?
        {
            let path = entry.path();
            if path.is_dir() {
                remove_dir_if_present(&path).await?;
            }
        }
        Ok(())
    }

    /// Open a handle's bare clone
    pub async fn open(&self, handle: &RepositoryHandle) -> SwiftpackResult<Box<dyn Repository>> {
        self.provider
            .open(&handle.specifier, &self.repository_path(handle))
            .await
    }

    /// Create a working copy of a handle's clone at `path`
    pub async fn create_working_copy(
        &self,
        handle: &RepositoryHandle,
        path: &Path,
        editable: bool,
    ) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        self.provider
            .create_working_copy(
                &handle.specifier,
                &self.repository_path(handle),
                path,
                editable,
            )
            .await
    }

    /// Open an existing working copy
    pub async fn open_working_copy(&self, path: &Path) -> SwiftpackResult<Box<dyn WorkingCopy>> {
        self.provider.open_working_copy(path).await
    }

    /// Whether `path` holds a valid repository
    pub async fn is_valid_directory(&self, path: &Path) -> SwiftpackResult<bool> {
        self.provider.is_valid_directory(path).await
    }

    /// Whether `reference` is a well-formed ref name
    pub fn is_valid_ref_format(&self, reference: &str) -> bool {
        self.provider.is_valid_ref_format(reference)
    }

    fn notify(&self, f: impl FnOnce(&dyn RepositoryManagerDelegate)) {
        if let Some(delegate) = &self.delegate {
            f(delegate.as_ref());
        }
    }

    fn progress_sink(&self, handle: &RepositoryHandle) -> impl Fn(FetchProgress) + Send + Sync {
        let delegate = self.delegate.clone();
        let handle = handle.clone();
        move |progress| {
            if let Some(delegate) = &delegate {
                delegate.fetch_progress(&handle, &progress);
            }
        }
    }
}

async fn remove_dir_if_present(path: &Path) -> SwiftpackResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SwiftpackError::io(
            format!("removing {}", path.display()),
            e,
        )),
    }
}

//! Isolation Provisioner
//!
//! Supplies each executing subtask an exclusive workspace. Workspaces are
//! held through a [`WorkspaceLease`], which returns the workspace to the
//! provisioner exactly once on every exit path (success, failure, panic
//! unwinding, or the owning future being dropped on cancellation).
//!
//! Two local implementations are provided:
//! - [`PooledProvisioner`]: a fixed number of abstract slots
//! - [`TempDirProvisioner`]: one fresh directory per lease under a root

use crate::task::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Provisioner errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// Every workspace is leased
    #[error("no workspace capacity")]
    NoCapacity,

    /// Backend temporarily unavailable
    #[error("provisioner unavailable: {0}")]
    Unavailable(String),

    /// Filesystem failure
    #[error("workspace io error: {0}")]
    Io(String),
}

impl ProvisionError {
    /// Whether acquiring again later may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoCapacity | Self::Unavailable(_))
    }
}

impl From<ProvisionError> for crate::Error {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::NoCapacity => crate::Error::NoCapacity,
            other => crate::Error::Internal(other.to_string()),
        }
    }
}

/// Exclusive reference to one isolated execution environment.
///
/// Deliberately not `Clone`: the handle is moved back into
/// [`IsolationProvisioner::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct WorkspaceHandle {
    /// Lease identifier
    pub id: Uuid,
    /// Task the workspace was leased for
    pub task_id: TaskId,
    /// Filesystem location, for directory-backed provisioners
    pub path: Option<PathBuf>,
    /// When the lease started
    pub acquired_at: DateTime<Utc>,
}

impl WorkspaceHandle {
    /// New handle for `task_id`.
    #[must_use]
    pub fn new(task_id: TaskId, path: Option<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            path,
            acquired_at: Utc::now(),
        }
    }
}

/// Supplies and reclaims isolated workspaces.
#[async_trait]
pub trait IsolationProvisioner: Send + Sync {
    /// Lease a workspace for `task_id`, or fail with `NoCapacity`.
    async fn acquire(&self, task_id: TaskId) -> Result<WorkspaceHandle, ProvisionError>;

    /// Return a workspace. Must not block for long; called from `Drop`.
    fn release(&self, handle: WorkspaceHandle);

    /// Workspaces currently leased.
    fn in_use(&self) -> usize;

    /// Maximum concurrent leases.
    fn capacity(&self) -> usize;
}

/// Scoped ownership of a [`WorkspaceHandle`].
pub struct WorkspaceLease {
    handle: Option<WorkspaceHandle>,
    provisioner: Arc<dyn IsolationProvisioner>,
}

impl WorkspaceLease {
    /// Acquire a workspace from `provisioner`.
    pub async fn acquire(
        provisioner: Arc<dyn IsolationProvisioner>,
        task_id: TaskId,
    ) -> Result<Self, ProvisionError> {
        let handle = provisioner.acquire(task_id).await?;
        debug!(task_id = %task_id, lease_id = %handle.id, "workspace leased");
        Ok(Self {
            handle: Some(handle),
            provisioner,
        })
    }

    /// The leased workspace.
    #[must_use]
    pub fn handle(&self) -> &WorkspaceHandle {
        // Only `release`/`Drop` take the handle, and both consume the lease
        self.handle
            .as_ref()
            .unwrap_or_else(|| unreachable!("lease handle taken before release"))
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(task_id = %handle.task_id, lease_id = %handle.id, "workspace released");
            self.provisioner.release(handle);
        }
    }
}

impl Drop for WorkspaceLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for WorkspaceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceLease")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Which provisioner the binary builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
    /// Abstract slots, no filesystem
    Pool,
    /// Fresh temp directory per lease
    #[default]
    TempDir,
}

/// Provisioner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Implementation to use
    #[serde(default)]
    pub kind: ProvisionerKind,
    /// Maximum concurrent leases
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Root for directory-backed workspaces
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Keep directories after release (debugging)
    #[serde(default)]
    pub keep_workspaces: bool,
}

fn default_capacity() -> usize {
    5
}

fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("conductor")
        .join("workspaces")
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kind: ProvisionerKind::default(),
            capacity: default_capacity(),
            root: default_root(),
            keep_workspaces: false,
        }
    }
}

impl ProvisionerConfig {
    /// Build the configured provisioner.
    #[must_use]
    pub fn build(&self) -> Arc<dyn IsolationProvisioner> {
        match self.kind {
            ProvisionerKind::Pool => Arc::new(PooledProvisioner::new(self.capacity)),
            ProvisionerKind::TempDir => Arc::new(
                TempDirProvisioner::new(&self.root, self.capacity)
                    .keep_workspaces(self.keep_workspaces),
            ),
        }
    }
}

/// Tracks leased ids and the high-water mark.
#[derive(Debug, Default)]
struct LeaseBook {
    leased: Mutex<HashSet<Uuid>>,
    peak: AtomicUsize,
}

impl LeaseBook {
    fn try_insert(&self, capacity: usize, id: Uuid) -> bool {
        let mut leased = self.leased.lock().unwrap_or_else(PoisonError::into_inner);
        if leased.len() >= capacity {
            return false;
        }
        leased.insert(id);
        self.peak.fetch_max(leased.len(), Ordering::SeqCst);
        true
    }

    fn remove(&self, id: &Uuid) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn len(&self) -> usize {
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Fixed number of abstract workspace slots.
#[derive(Debug)]
pub struct PooledProvisioner {
    capacity: usize,
    book: LeaseBook,
}

impl PooledProvisioner {
    /// Pool with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            book: LeaseBook::default(),
        }
    }

    /// Most leases ever held at once.
    #[must_use]
    pub fn peak_in_use(&self) -> usize {
        self.book.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IsolationProvisioner for PooledProvisioner {
    async fn acquire(&self, task_id: TaskId) -> Result<WorkspaceHandle, ProvisionError> {
        let handle = WorkspaceHandle::new(task_id, None);
        if self.book.try_insert(self.capacity, handle.id) {
            Ok(handle)
        } else {
            Err(ProvisionError::NoCapacity)
        }
    }

    fn release(&self, handle: WorkspaceHandle) {
        if !self.book.remove(&handle.id) {
            warn!(lease_id = %handle.id, "release of unknown workspace lease");
        }
    }

    fn in_use(&self) -> usize {
        self.book.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One fresh directory per lease under `root/<task_id>/<lease_id>`.
#[derive(Debug)]
pub struct TempDirProvisioner {
    root: PathBuf,
    capacity: usize,
    keep: bool,
    book: LeaseBook,
}

impl TempDirProvisioner {
    /// Provisioner rooted at `root`.
    #[must_use]
    pub fn new(root: &Path, capacity: usize) -> Self {
        Self {
            root: root.to_path_buf(),
            capacity,
            keep: false,
            book: LeaseBook::default(),
        }
    }

    /// Keep directories on release.
    #[must_use]
    pub fn keep_workspaces(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }
}

#[async_trait]
impl IsolationProvisioner for TempDirProvisioner {
    async fn acquire(&self, task_id: TaskId) -> Result<WorkspaceHandle, ProvisionError> {
        let mut handle = WorkspaceHandle::new(task_id, None);
        if !self.book.try_insert(self.capacity, handle.id) {
            return Err(ProvisionError::NoCapacity);
        }
        let dir = self.root.join(task_id.to_string()).join(handle.id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            self.book.remove(&handle.id);
            return Err(ProvisionError::Io(format!("{}: {e}", dir.display())));
        }
        handle.path = Some(dir);
        Ok(handle)
    }

    fn release(&self, handle: WorkspaceHandle) {
        if let (Some(path), false) = (&handle.path, self.keep) {
            if let Err(e) = std::fs::remove_dir_all(path) {
                warn!(path = %path.display(), error = %e, "failed to remove workspace");
            }
        }
        if !self.book.remove(&handle.id) {
            warn!(lease_id = %handle.id, "release of unknown workspace lease");
        }
    }

    fn in_use(&self) -> usize {
        self.book.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_enforces_capacity() {
        let pool: Arc<dyn IsolationProvisioner> = Arc::new(PooledProvisioner::new(2));
        let task = Uuid::new_v4();

        let a = WorkspaceLease::acquire(pool.clone(), task).await.unwrap();
        let _b = WorkspaceLease::acquire(pool.clone(), task).await.unwrap();
        let err = WorkspaceLease::acquire(pool.clone(), task).await.unwrap_err();
        assert_eq!(err, ProvisionError::NoCapacity);
        assert!(err.is_transient());

        a.release();
        assert_eq!(pool.in_use(), 1);
        let _c = WorkspaceLease::acquire(pool.clone(), task).await.unwrap();
        assert_eq!(pool.in_use(), 2);
    }

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let pool = Arc::new(PooledProvisioner::new(1));
        {
            let _lease = WorkspaceLease::acquire(pool.clone(), Uuid::new_v4())
                .await
                .unwrap();
            assert_eq!(pool.in_use(), 1);
        }
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.peak_in_use(), 1);
    }

    #[tokio::test]
    async fn test_lease_released_when_future_is_dropped() {
        let pool = Arc::new(PooledProvisioner::new(1));
        let provisioner: Arc<dyn IsolationProvisioner> = pool.clone();
        let handle = tokio::spawn(async move {
            let _lease = WorkspaceLease::acquire(provisioner, Uuid::new_v4())
                .await
                .unwrap();
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        while pool.in_use() == 0 {
            tokio::task::yield_now().await;
        }
        handle.abort();
        let _ = handle.await;
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_tempdir_creates_and_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let provisioner: Arc<dyn IsolationProvisioner> =
            Arc::new(TempDirProvisioner::new(root.path(), 1));

        let lease = WorkspaceLease::acquire(provisioner.clone(), Uuid::new_v4())
            .await
            .unwrap();
        let path = lease.handle().path.clone().unwrap();
        assert!(path.is_dir());
        assert!(path.starts_with(root.path()));

        drop(lease);
        assert!(!path.exists());
        assert_eq!(provisioner.in_use(), 0);
    }

    #[tokio::test]
    async fn test_tempdir_keep_workspaces() {
        let root = tempfile::tempdir().unwrap();
        let provisioner: Arc<dyn IsolationProvisioner> =
            Arc::new(TempDirProvisioner::new(root.path(), 1).keep_workspaces(true));

        let lease = WorkspaceLease::acquire(provisioner, Uuid::new_v4())
            .await
            .unwrap();
        let path = lease.handle().path.clone().unwrap();
        lease.release();
        assert!(path.is_dir());
    }

    #[test]
    fn test_no_capacity_maps_to_core_error() {
        let err: crate::Error = ProvisionError::NoCapacity.into();
        assert!(matches!(err, crate::Error::NoCapacity));
    }
}

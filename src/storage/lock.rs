//! Cross-process and in-process mutual exclusion on named resources.
//!
//! Two layers stack. In-process acquirers queue on a per-resource wait
//! chain so only one task per process races for the file lock. The file
//! lock itself is an exclusively-created file under `.locks/` whose name is
//! the SHA-256 hex digest of the resource name; a lock file whose mtime has
//! fallen behind the stale threshold is treated as abandoned and reclaimed.
//!
//! A lock that was reclaimed out from under its holder is reported as
//! *compromised* on release. The critical section is never retried.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;

use super::atomic;
use crate::core::{LockConfig, Result, StoreError};

/// Invoked with `(resource, held_for)` whenever a release detects that the
/// file lock had been reclaimed while held.
pub type CompromisedCallback = dyn Fn(&str, Duration) + Send + Sync;

/// What a successful release observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lock file was gone or owned by someone else: stale detection
    /// fired while we believed we held the lock.
    Compromised,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFilePayload {
    resource: String,
    token: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

enum WaitOutcome {
    Granted,
    Disposed,
}

#[derive(Default)]
struct ResourceQueue {
    held: bool,
    waiters: VecDeque<(u64, oneshot::Sender<WaitOutcome>)>,
}

struct HeldLock {
    token: String,
    path: PathBuf,
    acquired: Instant,
}

struct LockInner {
    locks_dir: PathBuf,
    config: LockConfig,
    initialized: AtomicBool,
    disposed: AtomicBool,
    queues: Mutex<HashMap<String, ResourceQueue>>,
    held: Mutex<HashMap<String, HeldLock>>,
    next_waiter_id: AtomicU64,
    on_compromised: Mutex<Option<Arc<CompromisedCallback>>>,
}

#[derive(Clone)]
pub struct LockManager {
    inner: Arc<LockInner>,
}

impl LockManager {
    pub fn new(locks_dir: impl Into<PathBuf>, config: LockConfig) -> Self {
        Self {
            inner: Arc::new(LockInner {
                locks_dir: locks_dir.into(),
                config,
                initialized: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                queues: Mutex::new(HashMap::new()),
                held: Mutex::new(HashMap::new()),
                next_waiter_id: AtomicU64::new(1),
                on_compromised: Mutex::new(None),
            }),
        }
    }

    /// Register the compromised-lock alert hook.
    pub fn on_compromised(&self, callback: Arc<CompromisedCallback>) {
        *self.inner.on_compromised.lock().unwrap() = Some(callback);
    }

    /// Creates the lock directory. Must run before the first `acquire`.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.inner.locks_dir).await?;
        self.inner.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Acquire the named resource. Re-acquiring from the same process is
    /// not reentrant; the second caller queues until timeout.
    pub async fn acquire(&self, resource: &str) -> Result<LockGuard> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        if !inner.initialized.load(Ordering::SeqCst) {
            return Err(StoreError::internal(
                "lock manager used before initialize()",
            ));
        }

        let started = Instant::now();
        let deadline = started + inner.config.acquire_timeout;

        self.enter_queue(resource, deadline, started).await?;
        match self.acquire_file_lock(resource, deadline, started).await {
            Ok(token) => {
                tracing::debug!(resource, "lock acquired");
                Ok(LockGuard {
                    inner: Arc::clone(inner),
                    resource: resource.to_string(),
                    token,
                    released: false,
                })
            }
            Err(e) => {
                wake_next(inner, resource);
                Err(e)
            }
        }
    }

    /// Acquire, run `body`, release on every exit path. A compromised
    /// release after a successful body still returns the body's value; the
    /// alert callback is the out-of-band signal.
    pub async fn with_lock<T, F, Fut>(&self, resource: &str, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.acquire(resource).await?;
        let outcome = body().await;
        let release = guard.release().await;
        match outcome {
            Ok(value) => {
                release?;
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Releases every held file lock under a bounded total timeout, then
    /// wakes all in-process waiters so they observe `Disposed`. Idempotent.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let held: Vec<(String, HeldLock)> =
            inner.held.lock().unwrap().drain().collect();
        let cleanup = async {
            for (resource, lock) in &held {
                if let Err(e) = tokio::fs::remove_file(&lock.path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(resource, error = %e, "failed to release lock on dispose");
                    }
                }
            }
        };
        if tokio::time::timeout(inner.config.dispose_timeout, cleanup)
            .await
            .is_err()
        {
            tracing::warn!("dispose timed out before all locks were released");
        }

        let mut queues = inner.queues.lock().unwrap();
        for (_, queue) in queues.drain() {
            for (_, waiter) in queue.waiters {
                let _ = waiter.send(WaitOutcome::Disposed);
            }
        }
    }

    // ------------------------------------------------------------------
    // In-process wait chain
    // ------------------------------------------------------------------

    async fn enter_queue(
        &self,
        resource: &str,
        deadline: Instant,
        started: Instant,
    ) -> Result<()> {
        let inner = &self.inner;
        let rx = {
            let mut queues = inner.queues.lock().unwrap();
            let queue = queues.entry(resource.to_string()).or_default();
            if !queue.held {
                queue.held = true;
                return Ok(());
            }
            let id = inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            queue.waiters.push_back((id, tx));
            (id, rx)
        };
        let (waiter_id, rx) = rx;

        let wait = tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), rx).await;
        match wait {
            Ok(Ok(WaitOutcome::Granted)) => Ok(()),
            Ok(Ok(WaitOutcome::Disposed)) => Err(StoreError::Disposed),
            Ok(Err(_)) => Err(StoreError::Disposed),
            Err(_elapsed) => {
                // Timed out. Withdraw from the queue; if the grant raced the
                // timeout we own the slot after all and must pass it on.
                let withdrawn = {
                    let mut queues = inner.queues.lock().unwrap();
                    match queues.get_mut(resource) {
                        Some(queue) => {
                            let before = queue.waiters.len();
                            queue.waiters.retain(|(id, _)| *id != waiter_id);
                            queue.waiters.len() != before
                        }
                        None => false,
                    }
                };
                if !withdrawn {
                    wake_next(inner, resource);
                }
                Err(StoreError::LockTimeout {
                    resource: resource.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Cross-process file lock
    // ------------------------------------------------------------------

    async fn acquire_file_lock(
        &self,
        resource: &str,
        deadline: Instant,
        started: Instant,
    ) -> Result<String> {
        let inner = &self.inner;
        let path = inner.locks_dir.join(lock_file_name(resource));

        loop {
            if inner.disposed.load(Ordering::SeqCst) {
                return Err(StoreError::Disposed);
            }

            let token = uuid::Uuid::new_v4().to_string();
            let payload = LockFilePayload {
                resource: resource.to_string(),
                token: token.clone(),
                pid: std::process::id(),
                acquired_at: Utc::now(),
            };
            let bytes = atomic::to_canonical_json(&payload)?;

            if atomic::create_exclusive(&path, &bytes).await? {
                inner.held.lock().unwrap().insert(
                    resource.to_string(),
                    HeldLock {
                        token: token.clone(),
                        path,
                        acquired: Instant::now(),
                    },
                );
                return Ok(token);
            }

            // Somebody holds it. Reclaim if abandoned, otherwise back off.
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    let stale = meta
                        .modified()
                        .ok()
                        .and_then(|mtime| mtime.elapsed().ok())
                        .map(|age| age > inner.config.stale_threshold)
                        .unwrap_or(false);
                    if stale {
                        tracing::warn!(resource, "reclaiming stale lock file");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                }
                // Freed between the create attempt and the stat: retry now.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StoreError::internal(format!(
                        "failed to inspect lock file for '{}': {}",
                        resource, e
                    )))
                }
            }

            if Instant::now() + inner.config.retry_interval >= deadline {
                return Err(StoreError::LockTimeout {
                    resource: resource.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(inner.config.retry_interval).await;
        }
    }
}

/// Lock file names are digests so distinct resource names can never map to
/// the same file (`plan:123`, `plan/123` and `plan_123` all differ).
fn lock_file_name(resource: &str) -> String {
    let digest = Sha256::digest(resource.as_bytes());
    format!("{}.lock", hex::encode(digest))
}

fn wake_next(inner: &LockInner, resource: &str) {
    let mut queues = inner.queues.lock().unwrap();
    if let Some(queue) = queues.get_mut(resource) {
        while let Some((_, waiter)) = queue.waiters.pop_front() {
            if waiter.send(WaitOutcome::Granted).is_ok() {
                return;
            }
        }
        queues.remove(resource);
    }
}

/// Held lock. Call `release` when done; dropping without releasing frees
/// the in-process slot and best-effort deletes the lock file, but cannot
/// report compromise.
pub struct LockGuard {
    inner: Arc<LockInner>,
    resource: String,
    token: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource", &self.resource)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub async fn release(mut self) -> Result<ReleaseOutcome> {
        self.released = true;
        let inner = Arc::clone(&self.inner);
        release_impl(&inner, &self.resource, &self.token).await
    }
}

async fn release_impl(
    inner: &Arc<LockInner>,
    resource: &str,
    token: &str,
) -> Result<ReleaseOutcome> {
    let held = inner.held.lock().unwrap().remove(resource);
    let Some(held) = held else {
        // Already released (directly or via dispose): idempotent.
        wake_next(inner, resource);
        return Ok(ReleaseOutcome::Released);
    };

    let mut compromised = false;
    match atomic::read_json_opt::<LockFilePayload>(&held.path).await {
        Ok(Some(payload)) => {
            if payload.token == token {
                let _ = tokio::fs::remove_file(&held.path).await;
            } else {
                // A peer reclaimed our file as stale and now owns it.
                compromised = true;
            }
        }
        Ok(None) => compromised = true,
        Err(_) => compromised = true,
    }

    wake_next(inner, resource);

    if compromised {
        let held_for = held.acquired.elapsed();
        tracing::warn!(resource, held_ms = held_for.as_millis() as u64, "lock was compromised");
        let callback = inner.on_compromised.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(resource, held_for);
        }
        return Ok(ReleaseOutcome::Compromised);
    }
    tracing::debug!(resource, "lock released");
    Ok(ReleaseOutcome::Released)
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(resource = %self.resource, "lock guard dropped without release");
        let held = self.inner.held.lock().unwrap().remove(&self.resource);
        if let Some(held) = held {
            let _ = std::fs::remove_file(&held.path);
        }
        wake_next(&self.inner, &self.resource);
    }
}

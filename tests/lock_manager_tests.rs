//! Lock manager behavior across peers: two managers on the same lock
//! directory stand in for two processes sharing the storage tree.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use planstore::core::LockConfig;
use planstore::{LockManager, ReleaseOutcome, StoreError};
use tempfile::TempDir;

fn config(acquire_ms: u64, stale_ms: u64) -> LockConfig {
    LockConfig {
        acquire_timeout: Duration::from_millis(acquire_ms),
        retry_interval: Duration::from_millis(20),
        stale_threshold: Duration::from_millis(stale_ms),
        dispose_timeout: Duration::from_secs(5),
    }
}

async fn manager(dir: &TempDir, cfg: LockConfig) -> LockManager {
    let manager = LockManager::new(dir.path().join(".locks"), cfg);
    manager.initialize().await.unwrap();
    manager
}

#[tokio::test]
async fn peers_exclude_each_other_through_the_lock_file() {
    let dir = TempDir::new().unwrap();
    let peer_a = manager(&dir, config(300, 60_000)).await;
    let peer_b = manager(&dir, config(300, 60_000)).await;

    let guard = peer_a.acquire("shared-resource").await.unwrap();

    // Peer B cannot get the file lock while A holds it.
    let err = peer_b.acquire("shared-resource").await.unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { .. }));

    guard.release().await.unwrap();
    let guard = peer_b.acquire("shared-resource").await.unwrap();
    guard.release().await.unwrap();
}

#[tokio::test]
async fn stale_peer_lock_is_reclaimed_and_victim_sees_compromised() {
    let dir = TempDir::new().unwrap();
    let victim = manager(&dir, config(500, 60_000)).await;
    // The reclaimer treats anything older than 50ms as abandoned.
    let reclaimer = manager(&dir, config(500, 50)).await;

    let alerts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&alerts);
    victim.on_compromised(Arc::new(move |_resource, _held| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    let victim_guard = victim.acquire("contested").await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The reclaimer decides the victim is dead and takes over.
    let reclaimer_guard = reclaimer.acquire("contested").await.unwrap();

    // The victim's release detects the theft and reports it out-of-band.
    assert_eq!(
        victim_guard.release().await.unwrap(),
        ReleaseOutcome::Compromised
    );
    assert_eq!(alerts.load(Ordering::SeqCst), 1);

    // The reclaimer's lock is intact.
    assert_eq!(
        reclaimer_guard.release().await.unwrap(),
        ReleaseOutcome::Released
    );
}

#[tokio::test]
async fn colliding_resource_names_use_distinct_lock_files() {
    let dir = TempDir::new().unwrap();
    let peer = manager(&dir, config(300, 60_000)).await;

    // Names that would collide if the file name were a naive sanitization.
    let g1 = peer.acquire("plan:123").await.unwrap();
    let g2 = peer.acquire("plan/123").await.unwrap();
    let g3 = peer.acquire("plan_123").await.unwrap();

    let lock_files = std::fs::read_dir(dir.path().join(".locks"))
        .unwrap()
        .count();
    assert_eq!(lock_files, 3);

    g1.release().await.unwrap();
    g2.release().await.unwrap();
    g3.release().await.unwrap();
}

#[tokio::test]
async fn in_process_waiters_are_served_in_arrival_order() {
    let dir = TempDir::new().unwrap();
    let peer = manager(&dir, config(5_000, 60_000)).await;

    let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let guard = peer.acquire("queue").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..3 {
        let peer = peer.clone();
        let order = Arc::clone(&order);
        handles.push(tokio::spawn(async move {
            let guard = peer.acquire("queue").await.unwrap();
            order.lock().await.push(i);
            guard.release().await.unwrap();
        }));
        // Make arrival order deterministic.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    guard.release().await.unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(*order.lock().await, vec![0, 1, 2]);
}

#[tokio::test]
async fn with_lock_serializes_a_shared_counter() {
    let dir = TempDir::new().unwrap();
    let peer = manager(&dir, config(5_000, 60_000)).await;
    let counter_path = dir.path().join("counter.txt");
    std::fs::write(&counter_path, "0").unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let peer = peer.clone();
        let path = counter_path.clone();
        handles.push(tokio::spawn(async move {
            peer.with_lock("counter", || async {
                let current: u32 = tokio::fs::read_to_string(&path)
                    .await
                    .unwrap()
                    .trim()
                    .parse()
                    .unwrap();
                tokio::task::yield_now().await;
                tokio::fs::write(&path, (current + 1).to_string()).await.unwrap();
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let total: u32 = std::fs::read_to_string(&counter_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(total, 8);
}

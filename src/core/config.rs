use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Timing knobs for the cross-process lock manager.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Total time an `acquire` may spend waiting (in-process queue plus
    /// file-lock retries) before failing with `LockTimeout`.
    pub acquire_timeout: Duration,
    /// Delay between file-lock creation attempts.
    pub retry_interval: Duration,
    /// A lock file whose mtime is older than this is considered abandoned
    /// and is forcibly reclaimed.
    pub stale_threshold: Duration,
    /// Upper bound on the total time `dispose` spends releasing held locks.
    pub dispose_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        // Wider stale window on Windows: coarse mtimes, scanners holding handles.
        let stale_threshold = if cfg!(windows) {
            Duration::from_secs(120)
        } else {
            Duration::from_secs(30)
        };
        Self {
            acquire_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(100),
            stale_threshold,
            dispose_timeout: Duration::from_secs(5),
        }
    }
}

/// Store-wide configuration, supplied by the embedding host.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Writable root of the storage tree.
    pub base_dir: PathBuf,
    pub lock: LockConfig,
    /// Capacity of each repository's entity LRU cache.
    pub cache_capacity: NonZeroUsize,
    /// History depth applied to plans created without an explicit value.
    pub default_max_history_depth: u8,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock: LockConfig::default(),
            cache_capacity: NonZeroUsize::new(256).unwrap(),
            default_max_history_depth: 5,
        }
    }
}

pub const MAX_HISTORY_DEPTH: u8 = 10;

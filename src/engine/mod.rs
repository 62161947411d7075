pub mod copier;
pub mod freeze;
pub mod ops;
pub mod queues;
pub mod resolver;
pub mod workers;

pub use workers::{spawn_workers, WorkerHandles};

use freeze::FreezeRegistry;
use parking_lot::Mutex;
use queues::DeferralQueues;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Debounce between a write and the earliest commit of that path.
pub const DELAY_TIME: Duration = Duration::from_secs(60);
/// Sleep between background worker sweeps.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Retry interval for in-band operations waiting on a frozen path.
pub const FREEZE_POLL: Duration = Duration::from_millis(100);

/// Engine construction parameters. The timing fields default to the
/// production constants; tests shrink them to keep runtimes sane.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub upper: PathBuf,
    pub lower: PathBuf,
    pub two_way: bool,
    pub delay_time: Duration,
    pub poll_interval: Duration,
    pub freeze_poll: Duration,
}

impl EngineConfig {
    pub fn new(upper: PathBuf, lower: PathBuf) -> Self {
        EngineConfig {
            upper,
            lower,
            two_way: false,
            delay_time: DELAY_TIME,
            poll_interval: POLL_INTERVAL,
            freeze_poll: FREEZE_POLL,
        }
    }
}

/// Shared state of the tiering engine: the two roots, the frozen-paths
/// registry, the deferral queues, and the flush flag. One `Engine` is
/// built at startup and shared (via `Arc`) between the FUSE callbacks
/// and the two background workers; there is no other global state.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) freeze: FreezeRegistry,
    pub(crate) queues: Mutex<DeferralQueues>,
    /// Serializes rename against an in-flight commit copy.
    pub(crate) active_copy: Mutex<()>,
    flush_time: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> crate::error::Result<Self> {
        for root in [&config.upper, &config.lower] {
            fs::create_dir_all(root).map_err(|e| {
                crate::error::TierFsError::Config(format!(
                    "Failed to create tier root {}: {}",
                    root.display(),
                    e
                ))
            })?;
        }

        Ok(Engine {
            freeze: FreezeRegistry::new(config.freeze_poll),
            queues: Mutex::new(DeferralQueues::new()),
            active_copy: Mutex::new(()),
            flush_time: AtomicBool::new(false),
            config,
        })
    }

    pub fn two_way(&self) -> bool {
        self.config.two_way
    }

    /// Physical upper-tier path for a logical path.
    pub fn upper_path(&self, rel: &str) -> PathBuf {
        tier_path(&self.config.upper, rel)
    }

    /// Physical lower-tier path for a logical path.
    pub fn lower_path(&self, rel: &str) -> PathBuf {
        tier_path(&self.config.lower, rel)
    }

    pub(crate) fn commit_ready_at(&self) -> Instant {
        Instant::now() + self.config.delay_time
    }

    /// Refresh the pending commit for a path: any prior commit or pull
    /// intent is dropped and the debounce window restarts.
    pub(crate) fn schedule_commit(&self, path: &str) {
        let ready_at = self.commit_ready_at();
        self.queues.lock().schedule_commit(path, ready_at);
    }

    pub(crate) fn flushing(&self) -> bool {
        self.flush_time.load(Ordering::SeqCst)
    }

    /// Depths of the (commit, pull) queues. Exposed for observability
    /// and the shutdown drain.
    pub fn queue_depths(&self) -> (usize, usize) {
        let q = self.queues.lock();
        (q.commit_len(), q.pull_len())
    }

    /// Mark the process as shutting down and block until every pending
    /// commit has landed on the lower tier. Pull entries are not
    /// drained; a missed promotion is rediscovered by the next read.
    pub fn drain_commits(&self) {
        self.flush_time.store(true, Ordering::SeqCst);
        tracing::info!("Flushing pending commits before exit");
        loop {
            if self.queues.lock().commit_len() == 0 {
                break;
            }
            std::thread::sleep(self.config.poll_interval);
        }
        tracing::info!("Commit queue drained");
    }
}

/// Join a logical path (leading `/`, as presented by the adapter) onto a
/// tier root. The empty logical path maps to the root itself.
pub(crate) fn tier_path(root: &Path, rel: &str) -> PathBuf {
    root.join(rel.trim_start_matches('/'))
}

/// Logical parent: the path truncated at its last `/`. Top-level entries
/// yield the empty string, which maps back to the tier root.
pub(crate) fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Existence test that does not follow a trailing symlink.
pub(crate) fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// A path is "special" when it is neither a regular file nor a symlink.
/// Directories count as special here: the commit worker moves file
/// contents, directory structure is reproduced via `ensure_dir`.
pub(crate) fn special(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            let ft = meta.file_type();
            !(ft.is_file() || ft.is_symlink())
        }
        Err(_) => true,
    }
}

/// lstat mtime as a `(seconds, nanoseconds)` pair, with pre-epoch
/// timestamps clamped to zero so they cannot win a freshness
/// comparison. Nanosecond precision matters: commits preserve the
/// source mtime exactly, and the tie must resolve in the upper tier's
/// favor.
pub(crate) fn mtime_or_zero(path: &Path) -> (i64, i64) {
    match fs::symlink_metadata(path) {
        Ok(m) if m.mtime() >= 0 => (m.mtime(), m.mtime_nsec()),
        _ => (0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/a/b/c.txt"), "/a/b");
        assert_eq!(parent_of("/x"), "");
        assert_eq!(parent_of(""), "");
    }

    #[test]
    fn test_tier_path_strips_leading_slash() {
        let root = Path::new("/srv/upper");
        assert_eq!(tier_path(root, "/a/b.txt"), PathBuf::from("/srv/upper/a/b.txt"));
        assert_eq!(tier_path(root, ""), PathBuf::from("/srv/upper"));
        assert_eq!(tier_path(root, "/"), PathBuf::from("/srv/upper"));
    }

    #[test]
    fn test_config_defaults() {
        let cfg = EngineConfig::new(PathBuf::from("u"), PathBuf::from("l"));
        assert!(!cfg.two_way);
        assert_eq!(cfg.delay_time, Duration::from_secs(60));
        assert_eq!(cfg.poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.freeze_poll, Duration::from_millis(100));
    }

    #[test]
    fn test_special_classifies_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(!special(&file));
        assert!(special(dir.path()));
        assert!(special(&dir.path().join("missing")));
    }

    #[test]
    fn test_engine_creates_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::new(dir.path().join("up"), dir.path().join("low"));
        let engine = Engine::new(cfg).unwrap();
        assert!(engine.upper_path("").is_dir());
        assert!(engine.lower_path("").is_dir());
        assert_eq!(engine.queue_depths(), (0, 0));
    }
}

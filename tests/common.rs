use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tierfs::{spawn_workers, Engine, EngineConfig};

/// Debounce window used by the tests, scaled down from the production
/// 60 seconds.
pub const DELAY: Duration = Duration::from_millis(60);
/// Worker sweep interval used by the tests.
pub const POLL: Duration = Duration::from_millis(15);

/// A pair of tempdir-backed tiers around an engine, optionally with the
/// background workers running.
pub struct TestTiers {
    pub engine: Arc<Engine>,
    _root: tempfile::TempDir,
}

#[allow(dead_code)]
impl TestTiers {
    pub fn new(two_way: bool) -> Self {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = EngineConfig::new(root.path().join("upper"), root.path().join("lower"));
        cfg.two_way = two_way;
        cfg.delay_time = DELAY;
        cfg.poll_interval = POLL;
        cfg.freeze_poll = Duration::from_millis(5);

        TestTiers {
            engine: Arc::new(Engine::new(cfg).unwrap()),
            _root: root,
        }
    }

    pub fn with_workers(two_way: bool) -> Self {
        let tiers = Self::new(two_way);
        spawn_workers(&tiers.engine);
        tiers
    }

    pub fn upper(&self, rel: &str) -> PathBuf {
        self.engine.upper_path(rel)
    }

    pub fn lower(&self, rel: &str) -> PathBuf {
        self.engine.lower_path(rel)
    }

    pub fn seed_lower(&self, rel: &str, content: &[u8]) {
        let path = self.lower(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    pub fn seed_upper(&self, rel: &str, content: &[u8]) {
        let path = self.upper(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Wait out the debounce window plus a few worker sweeps, enough
    /// for every scheduled copy to land.
    pub fn settle(&self) {
        std::thread::sleep(DELAY + 8 * POLL + Duration::from_millis(150));
    }
}

use std::collections::VecDeque;
use std::time::Instant;

/// A deferred copy of one logical path, not to run before `ready_at`.
#[derive(Debug, Clone)]
pub(crate) struct DeferralEntry {
    pub path: String,
    pub ready_at: Instant,
}

/// The two deferral queues: upper→lower commits and lower→upper pulls.
/// Both live behind a single mutex in [`Engine`](super::Engine).
///
/// Invariants maintained here: entries drain FIFO; a path appears at
/// most once per queue; commit and pull intent for one path never
/// coexist.
#[derive(Debug, Default)]
pub(crate) struct DeferralQueues {
    commits: VecDeque<DeferralEntry>,
    pulls: VecDeque<DeferralEntry>,
}

impl DeferralQueues {
    pub fn new() -> Self {
        DeferralQueues::default()
    }

    /// Schedule (or refresh) a commit for `path`. Prior commit and pull
    /// entries for the path are removed, so only the newest `ready_at`
    /// survives and the two queues stay disjoint.
    pub fn schedule_commit(&mut self, path: &str, ready_at: Instant) {
        self.commits.retain(|e| e.path != path);
        self.pulls.retain(|e| e.path != path);
        self.commits.push_back(DeferralEntry {
            path: path.to_string(),
            ready_at,
        });
    }

    /// Schedule a pull for `path` unless one is already pending.
    pub fn schedule_pull_if_absent(&mut self, path: &str, ready_at: Instant) {
        if self.pulls.iter().any(|e| e.path == path) {
            return;
        }
        self.pulls.push_back(DeferralEntry {
            path: path.to_string(),
            ready_at,
        });
    }

    /// Drop any pending commit for `path` (the stale-upper case).
    pub fn purge_commit(&mut self, path: &str) {
        self.commits.retain(|e| e.path != path);
    }

    /// Drop any pending intent for `path`, in either direction
    /// (unlink/rmdir).
    pub fn purge_path(&mut self, path: &str) {
        self.commits.retain(|e| e.path != path);
        self.pulls.retain(|e| e.path != path);
    }

    /// Rewrite pending-commit paths under a renamed directory:
    /// `from_dir` and `to_dir` carry the trailing `/`.
    pub fn rewrite_commit_prefix(&mut self, from_dir: &str, to_dir: &str) {
        for entry in self.commits.iter_mut() {
            if let Some(rest) = entry.path.strip_prefix(from_dir) {
                entry.path = format!("{}{}", to_dir, rest);
            }
        }
    }

    pub fn commit_front(&self) -> Option<&DeferralEntry> {
        self.commits.front()
    }

    pub fn pop_commit(&mut self) -> Option<DeferralEntry> {
        self.commits.pop_front()
    }

    pub fn pull_front(&self) -> Option<&DeferralEntry> {
        self.pulls.front()
    }

    pub fn pop_pull(&mut self) -> Option<DeferralEntry> {
        self.pulls.pop_front()
    }

    pub fn commit_len(&self) -> usize {
        self.commits.len()
    }

    pub fn pull_len(&self) -> usize {
        self.pulls.len()
    }
}

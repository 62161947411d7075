//! Background data movement: the commit worker drains due upper→lower
//! copies, the pull worker drains due lower→upper promotions.
//!
//! Both threads run for the process lifetime and are never joined; the
//! shutdown path only waits for the commit queue to empty.

use super::copier::{copy_tree, ensure_dir};
use super::{exists, parent_of, special, Engine};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub struct WorkerHandles {
    pub commit: JoinHandle<()>,
    pub pull: JoinHandle<()>,
}

/// Spawn the two workers. The pull worker is spawned even in one-way
/// mode; its queue simply never receives entries.
pub fn spawn_workers(engine: &Arc<Engine>) -> WorkerHandles {
    let commit_engine = Arc::clone(engine);
    let commit = thread::spawn(move || loop {
        thread::sleep(commit_engine.config.poll_interval);
        commit_engine.commit_sweep();
    });

    let pull_engine = Arc::clone(engine);
    let pull = thread::spawn(move || loop {
        thread::sleep(pull_engine.config.poll_interval);
        pull_engine.pull_sweep();
    });

    tracing::info!("Background tier workers started");
    WorkerHandles { commit, pull }
}

impl Engine {
    /// One commit sweep: drain due entries from the head of the commit
    /// queue. A frozen head stops the sweep so queue order is kept; the
    /// entry is retried next time around.
    pub(crate) fn commit_sweep(&self) {
        let mut frozen = self.freeze.read();
        let mut queues = self.queues.lock();

        loop {
            let due = match queues.commit_front() {
                Some(front) => front.ready_at <= Instant::now() && !frozen.contains(&front.path),
                None => false,
            };
            if !due {
                break;
            }
            let Some(entry) = queues.pop_commit() else {
                break;
            };

            // Adapter scratch files for unlinked-but-open inodes must
            // never reach the lower tier; vanished or special upper
            // paths have nothing worth copying.
            let src = self.upper_path(&entry.path);
            if entry.path.contains(".fuse_hidden") || !exists(&src) || special(&src) {
                continue;
            }

            drop(queues);
            {
                let _active = self.active_copy.lock();
                let dst_dir = self.lower_path(parent_of(&entry.path));
                tracing::debug!("committing {} to the lower tier", entry.path);
                if let Err(e) = ensure_dir(&dst_dir).and_then(|_| copy_tree(&src, &dst_dir)) {
                    // Swallowed: the next write of this path re-enqueues.
                    tracing::warn!("commit of {} failed: {}", entry.path, e);
                }
            }

            // Holding the freeze read lock across the whole drain would
            // starve writer promotion, so yield between entries unless
            // the process is flushing.
            if !self.flushing() {
                drop(frozen);
                thread::sleep(self.config.poll_interval);
                frozen = self.freeze.read();
            }
            queues = self.queues.lock();
        }
    }

    /// One pull sweep: promote due lower-tier entries up. Each copy runs
    /// with the path and its parent frozen so in-band operations cannot
    /// observe the half-written upper copy.
    pub(crate) fn pull_sweep(&self) {
        loop {
            // Peek under shared access first; most sweeps find nothing.
            let candidate = {
                let frozen = self.freeze.read();
                let queues = self.queues.lock();
                match queues.pull_front() {
                    Some(front)
                        if front.ready_at <= Instant::now() && !frozen.contains(&front.path) =>
                    {
                        front.path.clone()
                    }
                    _ => return,
                }
            };

            // Everything was dropped above, so this write acquisition is
            // a fresh one and the peek may be stale: re-validate the
            // head before freezing it.
            let parent = {
                let mut frozen = self.freeze.write();
                let mut queues = self.queues.lock();
                let still_valid = matches!(
                    queues.pull_front(),
                    Some(front) if front.path == candidate
                        && front.ready_at <= Instant::now()
                        && !frozen.contains(&front.path)
                );
                if !still_valid {
                    continue;
                }
                let parent = parent_of(&candidate).to_string();
                frozen.insert(parent.clone());
                frozen.insert(candidate.clone());
                queues.pop_pull();
                parent
            };

            let dst_dir = self.upper_path(&parent);
            tracing::debug!("promoting {} to the upper tier", candidate);
            if let Err(e) = ensure_dir(&dst_dir)
                .and_then(|_| copy_tree(&self.lower_path(&candidate), &dst_dir))
            {
                tracing::warn!("promotion of {} failed: {}", candidate, e);
            }

            {
                let mut frozen = self.freeze.write();
                frozen.remove(&candidate);
                frozen.remove(&parent);
            }
        }
    }
}

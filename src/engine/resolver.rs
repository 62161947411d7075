use super::copier::{copy_tree, ensure_dir};
use super::freeze::FreezeRead;
use super::{exists, mtime_or_zero, parent_of, special, Engine};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

impl Engine {
    /// Resolve the physical path a read-like operation should use.
    ///
    /// Blocks while the path is frozen, then returns the freeze-set read
    /// guard together with the chosen tier path. The caller performs its
    /// syscall while the guard is live, so no stage can start on the
    /// path in between.
    pub(crate) fn resolve_read(&self, path: &str) -> (FreezeRead<'_>, PathBuf) {
        let guard = self.freeze.wait_clear(path);
        let target = self.read_target(path);
        (guard, target)
    }

    /// The tier-selection core, shared by the read and write paths.
    /// Callers must hold the freeze-set read guard. In two-way mode this
    /// has side effects: it may unlink a stale upper copy, cancel its
    /// pending commit, and schedule a pull of the newer lower copy.
    fn read_target(&self, path: &str) -> PathBuf {
        let upper = self.upper_path(path);

        if !self.config.two_way {
            if exists(&upper) {
                return upper;
            }
            let lower = self.lower_path(path);
            if exists(&lower) {
                return lower;
            }
            // Default to the upper tier and let the syscall report the
            // real error.
            return upper;
        }

        let lower = self.lower_path(path);
        let lower_exists = exists(&lower);

        if exists(&upper) {
            let utime = mtime_or_zero(&upper);
            let ltime = if lower_exists { mtime_or_zero(&lower) } else { (0, 0) };
            if utime >= ltime {
                return upper;
            }

            // Both tiers hold the path and the lower copy is strictly
            // newer: the upper copy is stale. Drop it and cancel any
            // commit that would have clobbered the fresh data.
            tracing::debug!("stale upper copy of {} superseded by lower tier", path);
            let mut queues = self.queues.lock();
            let _ = fs::remove_file(&upper);
            queues.purge_commit(path);
        }

        if lower_exists {
            let ready_at = Instant::now() + self.config.delay_time;
            self.queues
                .lock()
                .schedule_pull_if_absent(path, ready_at);
            return lower;
        }

        upper
    }

    /// Resolve the physical path a write-like operation should use,
    /// staging lower-tier data up to the upper tier first when needed.
    ///
    /// On return the path for the write is always on the upper tier and
    /// a commit has been scheduled for it (unless the upper copy is a
    /// special file). The returned guard carries the same protection as
    /// in [`resolve_read`].
    pub(crate) fn resolve_write(&self, path: &str) -> (FreezeRead<'_>, PathBuf) {
        let mut guard = self.freeze.wait_clear(path);

        if self.config.two_way {
            // Run the read resolution for its side effects only: a stale
            // upper copy must be gone before we decide whether to stage.
            let _ = self.read_target(path);
        }

        let upper = self.upper_path(path);
        if exists(&upper) {
            if !special(&upper) {
                self.schedule_commit(path);
            }
            return (guard, upper);
        }

        let parent = parent_of(path);
        if !exists(&self.lower_path(parent)) {
            // Nothing to stage; the syscall against the upper tier will
            // surface ENOENT if the parent is missing there too.
            return (guard, upper);
        }

        // The data (or at least the parent directory) lives only on the
        // lower tier: stage it up synchronously so the write can proceed
        // locally. The staged paths are frozen for the duration of the
        // copy so no other operation observes them half-materialized.
        let lower_file = self.lower_path(path);
        let stage_file = exists(&lower_file);

        drop(guard);
        {
            let mut frozen = self.freeze.write();
            frozen.insert(parent.to_string());
            if stage_file {
                frozen.insert(path.to_string());
            }
        }

        let stage_result = ensure_dir(&self.upper_path(parent)).and_then(|_| {
            if stage_file {
                copy_tree(&lower_file, &self.upper_path(parent))
            } else {
                Ok(())
            }
        });

        {
            let mut frozen = self.freeze.write();
            frozen.remove(parent);
            if stage_file {
                frozen.remove(path);
            }
        }

        if let Err(e) = stage_result {
            // The freeze entries are gone either way; the write that
            // follows will report the underlying failure.
            tracing::warn!("staging {} to the upper tier failed: {}", path, e);
        }

        guard = self.freeze.wait_clear(path);
        self.schedule_commit(path);
        (guard, upper)
    }
}

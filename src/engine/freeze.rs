use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashSet;
use std::time::Duration;

/// Set of logical paths currently undergoing a synchronous staging copy.
///
/// In-band operations must not observe a path mid-copy, so every
/// operation gates on this registry before touching the backing trees.
/// The `wait_*` methods block until their condition clears and then
/// return a [`FreezeRead`] guard that the caller holds for the rest of
/// the operation: as long as any read guard is live, no stage can begin
/// on the guarded paths, because freezing requires the write lock.
///
/// Returning the guard (instead of asking the caller to release a lock
/// acquired inside a helper) makes an unbalanced release impossible.
pub(crate) struct FreezeRegistry {
    frozen: RwLock<HashSet<String>>,
    poll: Duration,
}

/// Shared access to the frozen set, held for the duration of one
/// in-band operation.
pub(crate) struct FreezeRead<'a> {
    set: RwLockReadGuard<'a, HashSet<String>>,
}

impl FreezeRead<'_> {
    pub fn contains(&self, path: &str) -> bool {
        self.set.contains(path)
    }
}

impl FreezeRegistry {
    pub fn new(poll: Duration) -> Self {
        FreezeRegistry {
            frozen: RwLock::new(HashSet::new()),
            poll,
        }
    }

    /// Plain shared acquisition, used by the workers' sweep loops.
    pub fn read(&self) -> FreezeRead<'_> {
        FreezeRead {
            set: self.frozen.read(),
        }
    }

    /// Exclusive access for freezing and unfreezing paths. Callers that
    /// previously held a read guard must re-validate what they saw: the
    /// set may have changed between the drop and this acquisition.
    pub fn write(&self) -> RwLockWriteGuard<'_, HashSet<String>> {
        self.frozen.write()
    }

    /// Block until `path` is not frozen, then keep the read lock.
    pub fn wait_clear(&self, path: &str) -> FreezeRead<'_> {
        self.wait_until(|set| set.contains(path))
    }

    /// Block until none of `paths` is frozen, then keep the read lock.
    pub fn wait_clear_all(&self, paths: &[&str]) -> FreezeRead<'_> {
        self.wait_until(|set| paths.iter().any(|p| set.contains(*p)))
    }

    /// Block until no frozen entry starts with `prefix` (the directory
    /// rename case), then keep the read lock.
    pub fn wait_clear_prefix(&self, prefix: &str) -> FreezeRead<'_> {
        self.wait_until(|set| set.iter().any(|p| p.starts_with(prefix)))
    }

    fn wait_until<F>(&self, blocked: F) -> FreezeRead<'_>
    where
        F: Fn(&HashSet<String>) -> bool,
    {
        loop {
            let set = self.frozen.read();
            if !blocked(&set) {
                return FreezeRead { set };
            }
            drop(set);
            std::thread::sleep(self.poll);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frozen.read().len()
    }
}

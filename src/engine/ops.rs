//! The filesystem operation surface.
//!
//! Each operation is a thin composition of resolver (or freeze gate),
//! syscall on the chosen tier, and deferral bookkeeping. Errors follow
//! the FUSE convention: `Err` carries a positive errno which the
//! adapter negates or passes to `reply.error`.

use super::{exists, Engine};
use nix::sys::stat::{utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::statvfs::{statvfs, Statvfs};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{DirEntryExt, FileExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

pub type OpResult<T> = Result<T, i32>;

/// One merged directory entry: the inode and type come from whichever
/// tier supplied the entry last.
#[derive(Debug, Clone)]
pub struct TierDirEntry {
    pub name: OsString,
    pub ino: u64,
    pub kind: fs::FileType,
}

/// Map `std::io::Error` to a libc errno, preferring the raw OS code.
pub(crate) fn io_errno(e: &io::Error) -> i32 {
    if let Some(code) = e.raw_os_error() {
        return code;
    }
    match e.kind() {
        io::ErrorKind::NotFound => libc::ENOENT,
        io::ErrorKind::PermissionDenied => libc::EACCES,
        io::ErrorKind::AlreadyExists => libc::EEXIST,
        io::ErrorKind::InvalidInput => libc::EINVAL,
        io::ErrorKind::InvalidData => libc::EINVAL,
        io::ErrorKind::Interrupted => libc::EINTR,
        io::ErrorKind::WriteZero => libc::ENOSPC,
        io::ErrorKind::OutOfMemory => libc::ENOMEM,
        io::ErrorKind::WouldBlock => libc::EAGAIN,
        io::ErrorKind::Unsupported => libc::ENOTSUP,
        _ => libc::EIO,
    }
}

fn nix_errno(e: nix::Error) -> i32 {
    e as i32
}

impl Engine {
    pub fn getattr(&self, path: &str) -> OpResult<fs::Metadata> {
        let (_guard, target) = self.resolve_read(path);
        fs::symlink_metadata(&target).map_err(|e| io_errno(&e))
    }

    pub fn access(&self, path: &str, mask: i32) -> OpResult<()> {
        let (_guard, target) = self.resolve_read(path);
        nix::unistd::access(&target, AccessFlags::from_bits_truncate(mask))
            .map_err(nix_errno)
    }

    pub fn readlink(&self, path: &str) -> OpResult<PathBuf> {
        let (_guard, target) = self.resolve_read(path);
        fs::read_link(&target).map_err(|e| io_errno(&e))
    }

    /// Read the chosen tier's directory; when that tier is the upper
    /// one, merge the lower tier's entries on top (last write wins on
    /// the stat fields, the name set is the union).
    pub fn readdir(&self, path: &str) -> OpResult<Vec<TierDirEntry>> {
        let (_guard, primary) = self.resolve_read(path);
        let mut merged: HashMap<OsString, TierDirEntry> = HashMap::new();

        let rd = fs::read_dir(&primary).map_err(|e| io_errno(&e))?;
        collect_entries(rd, &mut merged);

        if primary.starts_with(&self.config.upper) {
            if let Ok(rd) = fs::read_dir(self.lower_path(path)) {
                collect_entries(rd, &mut merged);
            }
        }

        let mut entries: Vec<TierDirEntry> = merged.into_values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Create a filesystem node. Regular files go through the write
    /// path (and may stage); fifos and device nodes are created on the
    /// upper tier directly under the freeze gate. Owner read/write bits
    /// are always granted.
    pub fn mknod(&self, path: &str, mode: u32, rdev: u64) -> OpResult<()> {
        let mode = mode | libc::S_IRUSR as u32 | libc::S_IWUSR as u32;
        let kind = mode & libc::S_IFMT as u32;

        if kind == libc::S_IFREG as u32 {
            let (_guard, target) = self.resolve_write(path);
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode & 0o7777)
                .open(&target)
                .map_err(|e| io_errno(&e))?;
            drop(file);
            return Ok(());
        }

        let _guard = self.freeze.wait_clear(path);
        let target = self.upper_path(path);
        if kind == libc::S_IFIFO as u32 {
            nix::unistd::mkfifo(&target, Mode::from_bits_truncate(mode)).map_err(nix_errno)
        } else {
            nix::sys::stat::mknod(
                &target,
                SFlag::from_bits_truncate(mode),
                Mode::from_bits_truncate(mode),
                rdev as libc::dev_t,
            )
            .map_err(nix_errno)
        }
    }

    /// Create the directory on the upper tier and, best effort, on the
    /// lower tier as well so later commits of children find their
    /// parent present.
    pub fn mkdir(&self, path: &str, mode: u32) -> OpResult<()> {
        let mode = Mode::from_bits_truncate(mode | libc::S_IRUSR as u32 | libc::S_IWUSR as u32);
        let (_guard, target) = self.resolve_write(path);

        let res = nix::unistd::mkdir(&target, mode);
        if let Err(e) = nix::unistd::mkdir(&self.lower_path(path), mode) {
            tracing::debug!("lower-tier mkdir of {} skipped: {}", path, e);
        }
        res.map_err(nix_errno)
    }

    pub fn symlink(&self, target: &Path, linkname: &str) -> OpResult<()> {
        let (_guard, link_path) = self.resolve_write(linkname);
        std::os::unix::fs::symlink(target, &link_path).map_err(|e| io_errno(&e))?;
        // The write path only schedules for pre-existing upper files;
        // a fresh symlink must be pushed down explicitly.
        self.schedule_commit(linkname);
        Ok(())
    }

    /// Remove the path from both tiers. Any deferred intent for the
    /// path dies with it. The operation succeeds if either tier's
    /// removal succeeded.
    pub fn unlink(&self, path: &str) -> OpResult<()> {
        let _guard = self.freeze.wait_clear(path);
        self.queues.lock().purge_path(path);

        let lower_res = fs::remove_file(self.lower_path(path));
        let upper_res = fs::remove_file(self.upper_path(path));
        either_removed(upper_res, lower_res)
    }

    pub fn rmdir(&self, path: &str) -> OpResult<()> {
        let _guard = self.freeze.wait_clear(path);
        self.queues.lock().purge_path(path);

        let lower_res = fs::remove_dir(self.lower_path(path));
        let upper_res = fs::remove_dir(self.upper_path(path));
        either_removed(upper_res, lower_res)
    }

    /// Rename on the upper tier, serialized against the commit worker.
    ///
    /// Directory renames additionally rewrite every pending commit
    /// beneath the old name and rename the lower tier too, so a child's
    /// deferred copy lands under the new name. The trailing best-effort
    /// unlink clears a leftover lower-tier entry for plain files.
    pub fn rename(&self, from: &str, to: &str) -> OpResult<()> {
        let from_dir = format!("{}/", from);
        let to_dir = format!("{}/", to);

        let (guard, from_name) = self.resolve_write(from);
        let from_meta = fs::symlink_metadata(&from_name);
        drop(guard);

        let (guard, to_name) = self.resolve_write(to);
        drop(guard);

        let is_dir = from_meta.map(|m| m.is_dir()).unwrap_or(false);

        // Freeze gate before the active-copy mutex, per the canonical
        // lock order shared with the commit worker.
        let _guard = if is_dir {
            self.freeze.wait_clear_prefix(&from_dir)
        } else {
            self.freeze.wait_clear_all(&[from, to])
        };
        let _active = self.active_copy.lock();

        if is_dir {
            self.queues.lock().rewrite_commit_prefix(&from_dir, &to_dir);
            if let Err(e) = fs::rename(self.lower_path(from), self.lower_path(to)) {
                tracing::debug!("lower-tier rename of {} skipped: {}", from, e);
            }
        }

        let res = fs::rename(&from_name, &to_name);
        drop(_active);
        drop(_guard);
        res.map_err(|e| io_errno(&e))?;

        // Clear whatever is left under the old name on the lower tier.
        let _ = self.unlink(from);
        Ok(())
    }

    /// Permission changes apply to the upper copy when one exists; the
    /// lower-tier leg runs detached and its outcome never surfaces.
    pub fn chmod(&self, path: &str, mode: u32) -> OpResult<()> {
        let mode = mode | libc::S_IRUSR as u32 | libc::S_IWUSR as u32;
        let upper = self.upper_path(path);
        if exists(&upper) {
            if let Err(e) = fs::set_permissions(&upper, fs::Permissions::from_mode(mode)) {
                tracing::debug!("chmod of upper {} failed: {}", path, e);
            }
        }
        let lower = self.lower_path(path);
        if exists(&lower) {
            spawn_lower_leg(move || {
                fs::set_permissions(&lower, fs::Permissions::from_mode(mode))
            });
        }
        Ok(())
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> OpResult<()> {
        let upper = self.upper_path(path);
        if exists(&upper) {
            if let Err(e) = std::os::unix::fs::lchown(&upper, uid, gid) {
                tracing::debug!("chown of upper {} failed: {}", path, e);
            }
        }
        let lower = self.lower_path(path);
        if exists(&lower) {
            spawn_lower_leg(move || std::os::unix::fs::lchown(&lower, uid, gid));
        }
        Ok(())
    }

    pub fn utimens(&self, path: &str, atime: TimeSpec, mtime: TimeSpec) -> OpResult<()> {
        let upper = self.upper_path(path);
        if exists(&upper) {
            if let Err(e) =
                utimensat(None, &upper, &atime, &mtime, UtimensatFlags::NoFollowSymlink)
            {
                tracing::debug!("utimens of upper {} failed: {}", path, e);
            }
        }
        let lower = self.lower_path(path);
        if exists(&lower) {
            spawn_lower_leg(move || {
                utimensat(None, &lower, &atime, &mtime, UtimensatFlags::NoFollowSymlink)
            });
        }
        Ok(())
    }

    pub fn truncate(&self, path: &str, size: u64) -> OpResult<()> {
        let (_guard, target) = self.resolve_write(path);
        nix::unistd::truncate(&target, size as libc::off_t).map_err(nix_errno)
    }

    pub fn read(&self, path: &str, offset: u64, size: u32) -> OpResult<Vec<u8>> {
        let (_guard, target) = self.resolve_read(path);
        let file = fs::File::open(&target).map_err(|e| io_errno(&e))?;
        let mut buf = vec![0u8; size as usize];
        let n = file.read_at(&mut buf, offset).map_err(|e| io_errno(&e))?;
        buf.truncate(n);
        Ok(buf)
    }

    pub fn write(&self, path: &str, offset: u64, data: &[u8]) -> OpResult<usize> {
        let (_guard, target) = self.resolve_write(path);
        let file = OpenOptions::new()
            .write(true)
            .open(&target)
            .map_err(|e| io_errno(&e))?;
        file.write_at(data, offset).map_err(|e| io_errno(&e))
    }

    /// Validate that the path can be opened with the requested access.
    /// Read-only opens use the read resolver; anything else goes
    /// through the write path and may stage.
    pub fn open(&self, path: &str, read_only: bool) -> OpResult<()> {
        let (_guard, target) = if read_only {
            self.resolve_read(path)
        } else {
            self.resolve_write(path)
        };
        let mut options = OpenOptions::new();
        if read_only {
            options.read(true);
        } else {
            options.write(true);
        }
        options.open(&target).map(drop).map_err(|e| io_errno(&e))
    }

    /// Filesystem statistics of the upper tier.
    pub fn statfs(&self) -> OpResult<Statvfs> {
        statvfs(&self.config.upper).map_err(nix_errno)
    }
}

fn collect_entries(rd: fs::ReadDir, merged: &mut HashMap<OsString, TierDirEntry>) {
    for entry in rd.flatten() {
        if let Ok(kind) = entry.file_type() {
            merged.insert(
                entry.file_name(),
                TierDirEntry {
                    name: entry.file_name(),
                    ino: entry.ino(),
                    kind,
                },
            );
        }
    }
}

fn either_removed(upper: io::Result<()>, lower: io::Result<()>) -> OpResult<()> {
    match (upper, lower) {
        (Ok(()), _) | (_, Ok(())) => Ok(()),
        (Err(e), Err(_)) => Err(io_errno(&e)),
    }
}

/// Run a best-effort lower-tier update without blocking the foreground
/// operation. Failures are logged and dropped.
fn spawn_lower_leg<E, F>(f: F)
where
    E: std::fmt::Display,
    F: FnOnce() -> Result<(), E> + Send + 'static,
{
    std::thread::spawn(move || {
        if let Err(e) = f() {
            tracing::debug!("lower-tier update failed: {}", e);
        }
    });
}

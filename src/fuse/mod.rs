//! FUSE adapter: translates kernel requests into engine operations.
//!
//! The adapter is deliberately thin. It owns the inode ↔ logical-path
//! table and attribute conversion; every data decision (tier selection,
//! staging, deferral) belongs to the engine. File handles carry no
//! state — reads and writes reopen the backing file per call, so the
//! handle number is always zero.

mod convert;
mod inode;
pub mod mount;

use crate::engine::Engine;
use convert::{file_kind, metadata_to_fileattr};
use inode::InodeTable;

use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use nix::sys::time::TimeSpec;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Attribute/entry cache TTL handed to the kernel. Kept short because
/// the background workers move data underneath the mount.
const ATTR_TTL: Duration = Duration::from_secs(1);

pub struct TierFs {
    engine: Arc<Engine>,
    inodes: Mutex<InodeTable>,
    ttl: Duration,
}

impl TierFs {
    pub fn new(engine: Arc<Engine>) -> Self {
        TierFs {
            engine,
            inodes: Mutex::new(InodeTable::new()),
            ttl: ATTR_TTL,
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.inodes.lock().path_of(ino)
    }

    /// Logical path of (parent, name); None when the parent inode is
    /// unknown or the name is not valid UTF-8 (rejected with EINVAL by
    /// the callers).
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, i32> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        self.inodes
            .lock()
            .child_path(parent, name)
            .ok_or(libc::ENOENT)
    }

    /// Stat a freshly created or looked-up path and bind it to an inode.
    fn bind_and_attr(&self, parent: u64, name: &OsStr, path: &str) -> Result<FileAttr, i32> {
        let meta = self.engine.getattr(path)?;
        let ino = self.inodes.lock().get_or_insert(parent, name, path);
        Ok(metadata_to_fileattr(&meta, ino))
    }
}

fn timespec_from(t: Option<TimeOrNow>) -> TimeSpec {
    match t {
        None => TimeSpec::new(0, libc::UTIME_OMIT),
        Some(TimeOrNow::Now) => TimeSpec::new(0, libc::UTIME_NOW),
        Some(TimeOrNow::SpecificTime(st)) => {
            let d = st.duration_since(UNIX_EPOCH).unwrap_or_default();
            TimeSpec::new(d.as_secs() as i64, d.subsec_nanos() as i64)
        }
    }
}

impl Filesystem for TierFs {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!(
            "tierfs mounted (two_way={})",
            self.engine.two_way()
        );
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("tierfs unmounted");
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        tracing::trace!("lookup({})", path);
        match self.bind_and_attr(parent, name, &path) {
            Ok(attrs) => reply.entry(&self.ttl, &attrs, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        self.inodes.lock().forget(ino);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.getattr(&path) {
            Ok(meta) => reply.attr(&self.ttl, &metadata_to_fileattr(&meta, ino)),
            Err(errno) => reply.error(errno),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        if let Some(size) = size {
            if let Err(errno) = self.engine.truncate(&path, size) {
                reply.error(errno);
                return;
            }
        }
        if let Some(mode) = mode {
            if let Err(errno) = self.engine.chmod(&path, mode) {
                reply.error(errno);
                return;
            }
        }
        if uid.is_some() || gid.is_some() {
            if let Err(errno) = self.engine.chown(&path, uid, gid) {
                reply.error(errno);
                return;
            }
        }
        if atime.is_some() || mtime.is_some() {
            if let Err(errno) =
                self.engine
                    .utimens(&path, timespec_from(atime), timespec_from(mtime))
            {
                reply.error(errno);
                return;
            }
        }

        match self.engine.getattr(&path) {
            Ok(meta) => reply.attr(&self.ttl, &metadata_to_fileattr(&meta, ino)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.readlink(&path) {
            Ok(target) => {
                use std::os::unix::ffi::OsStrExt;
                reply.data(target.as_os_str().as_bytes());
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(errno) = self.engine.mknod(&path, mode, rdev as u64) {
            reply.error(errno);
            return;
        }
        match self.bind_and_attr(parent, name, &path) {
            Ok(attrs) => reply.entry(&self.ttl, &attrs, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(errno) = self.engine.mkdir(&path, mode) {
            reply.error(errno);
            return;
        }
        match self.bind_and_attr(parent, name, &path) {
            Ok(attrs) => reply.entry(&self.ttl, &attrs, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.engine.unlink(&path) {
            Ok(()) => {
                self.inodes.lock().unbind_child(parent, name);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.engine.rmdir(&path) {
            Ok(()) => {
                self.inodes.lock().unbind_child(parent, name);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(errno) = self.engine.symlink(link, &path) {
            reply.error(errno);
            return;
        }
        match self.bind_and_attr(parent, name, &path) {
            Ok(attrs) => reply.entry(&self.ttl, &attrs, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let from = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        let to = match self.child_path(newparent, newname) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        match self.engine.rename(&from, &to) {
            Ok(()) => {
                self.inodes
                    .lock()
                    .rename(parent, name, newparent, newname, &to);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let read_only = flags & libc::O_ACCMODE == libc::O_RDONLY;
        match self.engine.open(&path, read_only) {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.read(&path, offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.write(&path, offset.max(0) as u64, data) {
            Ok(n) => reply.written(n as u32),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.engine.readdir(&path) {
            Ok(entries) => entries,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };

        for (idx, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            // The underlying tier's inode number is advisory here; the
            // kernel re-resolves entries through lookup.
            if reply.add(
                entry.ino,
                (idx + 1) as i64,
                file_kind(entry.kind),
                &entry.name,
            ) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.engine.statfs() {
            Ok(stat) => reply.statfs(
                stat.blocks(),
                stat.blocks_free(),
                stat.blocks_available(),
                stat.files(),
                stat.files_free(),
                stat.block_size() as u32,
                stat.name_max() as u32,
                stat.fragment_size() as u32,
            ),
            Err(errno) => reply.error(errno),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        let Some(path) = self.path_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.engine.access(&path, mask) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(p) => p,
            Err(errno) => {
                reply.error(errno);
                return;
            }
        };
        if let Err(errno) = self.engine.mknod(&path, mode | libc::S_IFREG as u32, 0) {
            reply.error(errno);
            return;
        }
        match self.bind_and_attr(parent, name, &path) {
            Ok(attrs) => reply.created(&self.ttl, &attrs, 0, 0, flags as u32),
            Err(errno) => reply.error(errno),
        }
    }
}

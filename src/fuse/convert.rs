use fuser::{FileAttr, FileType};
use std::fs::Metadata;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Kind of a directory entry or stat result, as fuser wants it.
///
/// Works on any `std::fs::FileType`, including the ones coming out of
/// `DirEntry::file_type()`, so readdir does not need a full stat per
/// entry.
pub(crate) fn file_kind(ft: std::fs::FileType) -> FileType {
    if ft.is_dir() {
        FileType::Directory
    } else if ft.is_symlink() {
        FileType::Symlink
    } else if ft.is_fifo() {
        FileType::NamedPipe
    } else if ft.is_char_device() {
        FileType::CharDevice
    } else if ft.is_block_device() {
        FileType::BlockDevice
    } else if ft.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

fn epoch_plus(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

/// Build the fuser attribute reply from an lstat of the backing tier.
///
/// Timestamps come straight from the raw stat fields so the kernel sees
/// the same mtime the freshness comparison uses. The backing tiers have
/// no birth time, so `crtime` stays at the epoch. setuid/setgid/sticky
/// ride along with the permission bits.
pub(crate) fn metadata_to_fileattr(meta: &Metadata, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: meta.len(),
        blocks: meta.blocks(),
        atime: epoch_plus(meta.atime(), meta.atime_nsec()),
        mtime: epoch_plus(meta.mtime(), meta.mtime_nsec()),
        ctime: epoch_plus(meta.ctime(), meta.ctime_nsec()),
        crtime: UNIX_EPOCH,
        kind: file_kind(meta.file_type()),
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        flags: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_fileattr_carries_size_times_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"12345").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o4750)).unwrap();

        let meta = fs::symlink_metadata(&file).unwrap();
        let attr = metadata_to_fileattr(&meta, 42);

        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 5);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.mtime, meta.modified().unwrap());
        // The setuid bit survives into the reported mode.
        assert_eq!(attr.perm, 0o4750);
    }

    #[test]
    fn test_file_kind_from_direntry_and_stat() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        std::os::unix::fs::symlink("x", dir.path().join("l")).unwrap();

        let meta = fs::symlink_metadata(dir.path().join("sub")).unwrap();
        assert_eq!(file_kind(meta.file_type()), FileType::Directory);

        for entry in fs::read_dir(dir.path()).unwrap().flatten() {
            let kind = file_kind(entry.file_type().unwrap());
            match entry.file_name().to_str().unwrap() {
                "sub" => assert_eq!(kind, FileType::Directory),
                "l" => assert_eq!(kind, FileType::Symlink),
                other => panic!("unexpected entry {}", other),
            }
        }
    }

    #[test]
    fn test_epoch_plus_handles_pre_epoch_times() {
        assert_eq!(epoch_plus(0, 0), UNIX_EPOCH);
        assert!(epoch_plus(-10, 0) < UNIX_EPOCH);
        assert_eq!(
            epoch_plus(5, 500_000_000),
            UNIX_EPOCH + Duration::new(5, 500_000_000)
        );
    }
}

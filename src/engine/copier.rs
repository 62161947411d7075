use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Recursive directory creation, the `mkdir -p` primitive.
pub(crate) fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Copy `src` (file, symlink, or directory tree) into the directory
/// `dst_dir`, preserving permissions and timestamps — the `cp -a`
/// primitive. Modification times must survive the copy: a later read
/// compares tier mtimes, and a destination stamped "now" would be
/// judged fresher than its own source.
pub(crate) fn copy_tree(src: &Path, dst_dir: &Path) -> io::Result<()> {
    let name = src.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "copy source has no file name")
    })?;
    copy_entry(src, &dst_dir.join(name))
}

fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    let ft = meta.file_type();

    if ft.is_symlink() {
        let target = fs::read_link(src)?;
        if fs::symlink_metadata(dst).is_ok() {
            fs::remove_file(dst)?;
        }
        std::os::unix::fs::symlink(&target, dst)?;
        // Leave link timestamps alone; freshness comparisons lstat the
        // link itself only transiently and the target carries the data.
        return Ok(());
    }

    if ft.is_dir() {
        match fs::create_dir(dst) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_entry(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::set_permissions(dst, meta.permissions())?;
        copy_times(&meta, dst)?;
        return Ok(());
    }

    if fs::symlink_metadata(dst).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
        fs::remove_file(dst)?;
    }
    fs::copy(src, dst)?;
    copy_times(&meta, dst)?;
    Ok(())
}

fn copy_times(meta: &Metadata, dst: &Path) -> io::Result<()> {
    let atime = TimeSpec::new(meta.atime(), meta.atime_nsec());
    let mtime = TimeSpec::new(meta.mtime(), meta.mtime_nsec());
    utimensat(None, dst, &atime, &mtime, UtimensatFlags::NoFollowSymlink)
        .map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    #[test]
    fn test_copy_file_preserves_content_mode_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dst_dir = dir.path().join("out");
        fs::create_dir(&dst_dir).unwrap();

        fs::write(&src, b"payload").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let src_meta = fs::symlink_metadata(&src).unwrap();

        copy_tree(&src, &dst_dir).unwrap();

        let dst = dst_dir.join("src.txt");
        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        let dst_meta = fs::symlink_metadata(&dst).unwrap();
        assert_eq!(dst_meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(dst_meta.mtime(), src_meta.mtime());
        assert_eq!(dst_meta.mtime_nsec(), src_meta.mtime_nsec());
    }

    #[test]
    fn test_copy_tree_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a.txt"), b"a").unwrap();
        fs::write(src.join("sub/b.txt"), b"b").unwrap();

        let dst_dir = dir.path().join("out");
        fs::create_dir(&dst_dir).unwrap();
        copy_tree(&src, &dst_dir).unwrap();

        assert_eq!(fs::read(dst_dir.join("tree/a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(dst_dir.join("tree/sub/b.txt")).unwrap(), b"b");
    }

    #[test]
    fn test_copy_symlink_is_copied_as_link() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("link");
        std::os::unix::fs::symlink("target-elsewhere", &src).unwrap();

        let dst_dir = dir.path().join("out");
        fs::create_dir(&dst_dir).unwrap();
        copy_tree(&src, &dst_dir).unwrap();

        let dst = dst_dir.join("link");
        assert!(fs::symlink_metadata(&dst).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&dst).unwrap(), PathBuf::from("target-elsewhere"));
    }

    #[test]
    fn test_copy_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("f");
        let dst_dir = dir.path().join("out");
        fs::create_dir(&dst_dir).unwrap();
        fs::write(&src, b"new").unwrap();
        fs::write(dst_dir.join("f"), b"old-old-old").unwrap();

        copy_tree(&src, &dst_dir).unwrap();
        assert_eq!(fs::read(dst_dir.join("f")).unwrap(), b"new");
    }
}

//! Operation-surface behavior that does not need the background
//! workers: tier selection, staging, queue bookkeeping, and the merged
//! directory view.

mod common;

use common::TestTiers;
use std::fs;
use std::path::Path;

#[test]
fn test_write_lands_on_upper_and_leaves_lower_untouched() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/a/b.txt", b"hello");

    tiers.engine.open("/a/b.txt", false).unwrap();
    let n = tiers.engine.write("/a/b.txt", 0, b"world").unwrap();
    assert_eq!(n, 5);

    assert_eq!(fs::read(tiers.upper("/a/b.txt")).unwrap(), b"world");
    assert_eq!(fs::read(tiers.lower("/a/b.txt")).unwrap(), b"hello");
    assert_eq!(tiers.engine.queue_depths(), (1, 0));
}

#[test]
fn test_read_serves_staged_upper_copy_after_write() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/f", b"original");

    tiers.engine.write("/f", 0, b"modified").unwrap();
    assert_eq!(tiers.engine.read("/f", 0, 64).unwrap(), b"modified");
}

#[test]
fn test_read_falls_through_to_lower_tier() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/only-lower.txt", b"content");

    assert_eq!(
        tiers.engine.read("/only-lower.txt", 0, 64).unwrap(),
        b"content"
    );
    assert_eq!(tiers.engine.read("/missing", 0, 64), Err(libc::ENOENT));
}

#[test]
fn test_readdir_merges_both_tiers() {
    let tiers = TestTiers::new(false);
    tiers.seed_upper("/d/a", b"");
    tiers.seed_lower("/d/a", b"");
    tiers.seed_lower("/d/b", b"");

    let names: Vec<String> = tiers
        .engine
        .readdir("/d")
        .unwrap()
        .iter()
        .map(|e| e.name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[test]
fn test_unlink_removes_from_both_tiers_and_purges_queues() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/f", b"low");
    tiers.engine.write("/f", 0, b"upp").unwrap();
    assert_eq!(tiers.engine.queue_depths(), (1, 0));

    tiers.engine.unlink("/f").unwrap();

    assert!(!tiers.upper("/f").exists());
    assert!(!tiers.lower("/f").exists());
    assert_eq!(tiers.engine.queue_depths(), (0, 0));
}

#[test]
fn test_rmdir_succeeds_when_present_on_one_tier() {
    let tiers = TestTiers::new(false);
    fs::create_dir(tiers.lower("/d")).unwrap();

    tiers.engine.rmdir("/d").unwrap();
    assert!(!tiers.lower("/d").exists());
}

#[test]
fn test_mkdir_appears_on_both_tiers() {
    let tiers = TestTiers::new(false);
    tiers.engine.mkdir("/fresh", 0o755).unwrap();

    assert!(tiers.upper("/fresh").is_dir());
    assert!(tiers.lower("/fresh").is_dir());
}

#[test]
fn test_symlink_created_on_upper_with_commit_pending() {
    let tiers = TestTiers::new(false);
    tiers
        .engine
        .symlink(Path::new("/somewhere/else"), "/link")
        .unwrap();

    let target = tiers.engine.readlink("/link").unwrap();
    assert_eq!(target, Path::new("/somewhere/else"));
    assert_eq!(tiers.engine.queue_depths(), (1, 0));
}

#[test]
fn test_rename_directory_carries_pending_commits() {
    let tiers = TestTiers::new(false);
    tiers.engine.mkdir("/d", 0o755).unwrap();
    tiers
        .engine
        .mknod("/d/f.txt", libc::S_IFREG as u32 | 0o644, 0)
        .unwrap();
    tiers.engine.write("/d/f.txt", 0, b"payload").unwrap();

    tiers.engine.rename("/d", "/e").unwrap();

    // The written data is reachable under the new name right away.
    assert_eq!(tiers.engine.read("/e/f.txt", 0, 64).unwrap(), b"payload");
    assert_eq!(tiers.engine.read("/d/f.txt", 0, 64), Err(libc::ENOENT));
}

#[test]
fn test_rename_file_replaces_lower_leftover() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/f", b"old");
    tiers.engine.write("/f", 0, b"new").unwrap();

    tiers.engine.rename("/f", "/g").unwrap();

    assert_eq!(tiers.engine.read("/g", 0, 64).unwrap(), b"new");
    assert!(!tiers.lower("/f").exists());
    assert!(!tiers.upper("/f").exists());
}

#[test]
fn test_getattr_reports_chosen_tier() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/f", b"12345");

    let meta = tiers.engine.getattr("/f").unwrap();
    assert_eq!(meta.len(), 5);

    tiers.engine.write("/f", 0, b"123").unwrap();
    let meta = tiers.engine.getattr("/f").unwrap();
    assert_eq!(meta.len(), 5); // staged copy, partially overwritten

    tiers.engine.truncate("/f", 3).unwrap();
    let meta = tiers.engine.getattr("/f").unwrap();
    assert_eq!(meta.len(), 3);
}

#[test]
fn test_write_offset_extends_file() {
    let tiers = TestTiers::new(false);
    tiers
        .engine
        .mknod("/f", libc::S_IFREG as u32 | 0o644, 0)
        .unwrap();

    tiers.engine.write("/f", 0, b"0123").unwrap();
    tiers.engine.write("/f", 4, b"4567").unwrap();

    assert_eq!(tiers.engine.read("/f", 0, 64).unwrap(), b"01234567");
}

#[test]
fn test_statfs_and_access() {
    let tiers = TestTiers::new(false);
    tiers.seed_lower("/f", b"x");

    assert!(tiers.engine.statfs().unwrap().blocks() > 0);
    tiers.engine.access("/f", libc::R_OK).unwrap();
    assert_eq!(tiers.engine.access("/nope", libc::R_OK), Err(libc::ENOENT));
}

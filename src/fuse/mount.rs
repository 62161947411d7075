use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::{Result, TierFsError};
use crate::fuse::TierFs;
use fuser::MountOption;

/// Translate a `-o` style option string into a fuser mount option.
/// Unknown strings pass through as custom options for the FUSE layer to
/// interpret.
fn parse_mount_option(opt: &str) -> MountOption {
    match opt {
        "auto_unmount" => MountOption::AutoUnmount,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "default_permissions" => MountOption::DefaultPermissions,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "dirsync" => MountOption::DirSync,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        other => MountOption::CUSTOM(other.to_string()),
    }
}

/// Mount the composed view at `mountpoint` and block until it is
/// unmounted. Returns the exit code for the process (the shutdown drain
/// runs after this returns).
pub fn run(engine: Arc<Engine>, mountpoint: &Path, extra_options: &[String]) -> Result<i32> {
    fs::create_dir_all(mountpoint).map_err(|e| {
        TierFsError::Config(format!(
            "Failed to create mount directory {}: {}",
            mountpoint.display(),
            e
        ))
    })?;

    let mut options = vec![
        MountOption::FSName("tierfs".to_string()),
        MountOption::AutoUnmount,
    ];
    options.extend(extra_options.iter().map(|o| parse_mount_option(o)));

    tracing::info!("Mounting tierfs at {}", mountpoint.display());
    fuser::mount2(TierFs::new(engine), mountpoint, &options)
        .map_err(|e| TierFsError::Mount(format!("FUSE mount failed: {}", e)))?;

    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_options_map_to_variants() {
        assert_eq!(parse_mount_option("allow_other"), MountOption::AllowOther);
        assert_eq!(parse_mount_option("ro"), MountOption::RO);
    }

    #[test]
    fn test_unknown_options_pass_through() {
        assert_eq!(
            parse_mount_option("max_read=131072"),
            MountOption::CUSTOM("max_read=131072".to_string())
        );
    }
}

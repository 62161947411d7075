use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tierfs")]
#[command(
    about = "Mount a unified view of a fast upper tier and a slower lower tier, \
             with background data migration between them"
)]
pub struct Args {
    #[arg(help = "Directory holding the fast upper tier (writes land here)")]
    pub upper: PathBuf,

    #[arg(help = "Directory holding the slower lower tier (commits land here)")]
    pub lower: PathBuf,

    #[arg(help = "Mount point for the composed view")]
    pub mountpoint: PathBuf,

    #[arg(
        long,
        help = "Also promote newer lower-tier files up to the upper tier"
    )]
    pub two_way: bool,

    #[arg(
        short = 'o',
        long = "mount-option",
        help = "Extra mount option forwarded to the FUSE layer (repeatable)"
    )]
    pub mount_option: Vec<String>,
}

/// Two-way mode comes from the `--two-way` flag or the `TIERFS_TWO_WAY`
/// environment variable; the flag wins when both are present.
pub fn two_way_enabled(args: &Args) -> bool {
    if args.two_way {
        return true;
    }
    match std::env::var("TIERFS_TWO_WAY") {
        Ok(v) => !v.is_empty() && v != "0",
        Err(_) => false,
    }
}

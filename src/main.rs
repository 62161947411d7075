use clap::Parser;
use std::sync::Arc;

mod cli;
mod engine;
mod error;
mod fuse;

use cli::Args;
use engine::{spawn_workers, Engine, EngineConfig};
use error::TierFsError;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> error::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("TIERFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let args = Args::parse();

    let upper = args.upper.canonicalize().map_err(|e| {
        TierFsError::Config(format!(
            "Upper tier {} is not usable: {}",
            args.upper.display(),
            e
        ))
    })?;
    let lower = args.lower.canonicalize().map_err(|e| {
        TierFsError::Config(format!(
            "Lower tier {} is not usable: {}",
            args.lower.display(),
            e
        ))
    })?;

    let mut config = EngineConfig::new(upper, lower);
    config.two_way = cli::two_way_enabled(&args);
    let engine = Arc::new(Engine::new(config)?);

    // Workers run for the process lifetime; only the commit queue is
    // drained after unmount.
    let _workers = spawn_workers(&engine);

    let code = fuse::mount::run(Arc::clone(&engine), &args.mountpoint, &args.mount_option)?;

    engine.drain_commits();
    Ok(code)
}

pub mod cli;
pub mod engine;
pub mod error;
pub mod fuse;

pub use engine::{spawn_workers, Engine, EngineConfig, WorkerHandles};
pub use error::{Result, TierFsError};
pub use fuse::TierFs;

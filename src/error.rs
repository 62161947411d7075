use thiserror::Error;

pub type Result<T> = std::result::Result<T, TierFsError>;

#[derive(Error, Debug)]
pub enum TierFsError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mount error: {0}")]
    Mount(String),
}

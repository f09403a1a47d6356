use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("storage backend: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("compress: {0}")]
    Compress(#[from] std::io::Error),
    #[error("legacy history from an earlier run is still pending migration")]
    LegacyPending,
}

pub type Result<T> = std::result::Result<T, HistoryError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

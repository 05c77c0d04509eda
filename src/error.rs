use thiserror::Error;

#[derive(Error, Debug)]
pub enum PriceWatchError {
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

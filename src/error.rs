use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid parameters")]
    InvalidParams,

    #[error("Io error: {0}")]
    IoError(#[from] std::io::Error),
}

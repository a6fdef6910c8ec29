use thiserror::Error;

/// Errors surfaced by the engine and the corpus stores.
///
/// Unreadable partition or index files are not reported here: readers recover
/// them locally (see [`crate::persist`]). Only failed writes reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied content or fields the engine cannot work with.
    #[error("input rejected: {0}")]
    InputRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Durable key-value storage for the LMS session core.
//!
//! Two backends are provided:
//! - **FileStore**: a JSON object file replaced atomically on every write
//! - **MemoryStore**: an in-process map for tests and ephemeral runs

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStore;
pub use keys::{KeyClass, StorageKeys};
pub use memory::MemoryStore;
pub use traits::KeyValueStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend failure that is not plain IO
    #[error("Backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Encoding(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

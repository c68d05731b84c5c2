//! Storage Layer
//!
//! Persists photos, videos, detection frames and the append-only detection log
//! under a single media root.

mod store;

pub use store::{MediaKind, MediaListing, MediaStore, ReservedFile, StorageConfig};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No free filename for {0}")]
    NameExhausted(String),
}

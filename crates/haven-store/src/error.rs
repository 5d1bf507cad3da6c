use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (creating the data directory, reading/writing a
    /// document file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document file exists but does not parse.
    #[error("Corrupt document {file}: {source}")]
    Corrupt {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    /// Serialization failure on save.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

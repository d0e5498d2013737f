//! Error types for flskit

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The main error type for flskit operations
#[derive(Debug, Error)]
pub enum FlsError {
    /// A metadata file is not well-formed XML. Fatal for that file's
    /// holder only; other holders still load.
    #[error("malformed metadata in {path}: {detail}")]
    MalformedMetadata { path: PathBuf, detail: String },

    /// A grant block is structurally valid XML but missing its identifying
    /// object or field API name. Same per-file isolation as above.
    #[error("unexpected schema in {path}: {detail}")]
    UnexpectedSchema { path: PathBuf, detail: String },

    /// Lookup of a holder the model does not contain
    #[error("no such profile or permission set: {0}")]
    HolderNotFound(String),

    /// I/O failure while applying changes; aborts only the affected file
    #[error("write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Snapshot unavailable or restore target inaccessible
    #[error("rollback failed for {path}: {detail}")]
    Rollback { path: PathBuf, detail: String },

    /// Missing required columns; fatal for the whole batch before any
    /// mutation is planned
    #[error("csv format: {0}")]
    CsvFormat(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type alias for flskit operations
pub type Result<T> = std::result::Result<T, FlsError>;

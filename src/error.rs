// src/error.rs

//! Error types for the repackaging pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a repackaging or verification run
#[derive(Error, Debug)]
pub enum Error {
    /// Input path does not sit inside the supported ingest layout
    #[error("Expected AODH input path structure, eg: {expected} (got {})", .path.display())]
    Structure {
        path: PathBuf,
        expected: &'static str,
    },

    /// Dataset identifier does not follow the product naming grammar
    #[error("unrecognised dataset identifier: {0}")]
    InvalidIdentifier(String),

    /// Zero or several primary metadata files were found
    #[error("expected exactly one *_MTL.txt file in {}, found {found}", .path.display())]
    Resolution { path: PathBuf, found: usize },

    /// Two input members normalise to the same output name
    #[error("duplicate member in dataset: {0}")]
    DuplicateMember(String),

    /// Member name tries to escape the dataset root
    #[error("path traversal attempt in member name: {0}")]
    PathTraversal(String),

    /// Member name is empty or otherwise unusable
    #[error("invalid member name: {0}")]
    InvalidPath(String),

    /// Member type the repackager cannot reproduce (links, devices)
    #[error("unsupported member type for {name}: {kind}")]
    UnsupportedMember { name: String, kind: String },

    /// Member source delivered a different number of bytes than announced
    #[error("short read on {name}: expected {expected} bytes, got {actual}")]
    ShortRead {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Malformed or unsupported TIFF structure
    #[error("TIFF error: {0}")]
    Tiff(String),

    /// Malformed checksum manifest
    #[error("checksum manifest error: {0}")]
    Manifest(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input archive decompression failure
    #[error("compression error: {0}")]
    Compression(#[from] crate::compression::CompressionError),

    /// IO error while reading input or writing output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a TIFF error with a message
    pub fn tiff(msg: impl Into<String>) -> Self {
        Self::Tiff(msg.into())
    }

    /// Create a manifest error with a message
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Whether the error was raised by the input layout checks, before any
    /// output path was computed
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structure { .. } | Self::InvalidIdentifier(_))
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.into())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

use std::io;
use thiserror::Error;

/// Result type for mapped file operations
pub type Result<T> = std::result::Result<T, MapFileError>;

/// Unified error type for all mapped file operations
#[derive(Debug, Error)]
pub enum MapFileError {
    // Access errors
    #[error("Reading behind the end of an archive at index {0}")]
    OutOfRange(usize),

    // Container errors
    #[error("Archive header is broken: {0}")]
    CorruptHeader(String),

    #[error("Unsupported container version: {0}")]
    UnsupportedVersion(u8),

    #[error("Invalid codec in container header: {0}")]
    InvalidCodec(u8),

    #[error("Archive seems to be corrupted: {0}")]
    CorruptStream(String),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for MapFileError {
    fn from(err: toml::de::Error) -> Self {
        MapFileError::Config(err.to_string())
    }
}

use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("checksum mismatch for key {key}: stored {stored}, computed {computed}")]
    ChecksumMismatch {
        key: String,
        stored: String,
        computed: String,
    },
}

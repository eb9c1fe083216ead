//! Error types for FBX import.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can stop an import, or a piece of one.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Bad magic, unknown encoding or a document version below the supported minimum.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The byte or text stream ended early or contained garbage.
    #[error("Parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// A DEFLATE compressed array property could not be inflated.
    #[error("Decompression error: {0}")]
    Decompress(String),

    /// A record is missing a required child or carries inconsistent data.
    #[error("Malformed record `{record}`: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A texture could not be read or written.
    #[error("Resource {}: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ImportError {
    pub(crate) fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;

//! Flat error enumeration for the archive engine.
//!
//! Every fallible engine operation returns [`ScarError`].  There is no
//! retry anywhere in the engine: an error leaves the writer or reader in a
//! non-resumable state and the caller is expected to drop it.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScarError {
    /// An underlying stream failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The bytes do not conform to the SCAR/PAX format: bad checksum,
    /// truncated record, index row grammar violation, tail not locatable.
    #[error("Malformed archive: {0}")]
    Malformed(String),

    /// The file's EOF marker does not identify any known codec.
    #[error("No known codec matches the end of the file")]
    UnsupportedCodec,

    /// An archive entry type the engine cannot represent.
    #[error("Unsupported entry: {0}")]
    Unsupported(String),

    /// A caller-supplied offset outside the archive, or a Meta missing
    /// required fields at write time.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, ScarError>;

impl ScarError {
    /// Shorthand used by the parsers.
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ScarError::Malformed(msg.into())
    }
}

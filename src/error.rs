//! Error taxonomy shared by every public call in the crate.

use std::io;

/// Result type for all client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the daemon or reading results
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A null handle, out-of-range index, or otherwise unusable argument
    #[error("invalid parameter")]
    InvalidParameter,

    /// The daemon reported it could not allocate memory for the request
    #[error("daemon out of memory")]
    OutOfMemory,

    /// The endpoint, property, or item does not exist
    #[error("not found")]
    NotFound,

    /// The connection dropped mid-exchange; the stream is no longer usable
    #[error("disconnected: {0}")]
    Disconnected(#[source] io::Error),

    /// Shutdown was signalled on this connection
    #[error("shutdown")]
    Shutdown,

    /// The operation was cancelled by the caller (journal callback returned false)
    #[error("cancelled")]
    Cancelled,

    /// The daemon rejected the request as malformed
    #[error("bad request")]
    BadRequest,

    /// The reply could not be decoded; the stream may be desynchronized
    #[error("bad response")]
    BadResponse,

    /// The daemon does not understand this request code
    #[error("invalid command")]
    InvalidCommand,

    /// A column was read through an accessor of the wrong value type
    #[error("invalid property value type")]
    InvalidPropertyValueType,

    /// The destination buffer was too small; a partial copy was performed
    #[error("insufficient buffer")]
    InsufficientBuffer,

    /// Any other daemon-side failure, carrying the raw response code
    #[error("daemon error (code {0})")]
    Server(u32),
}

impl Error {
    /// Map a mid-exchange I/O failure, honouring a pending shutdown signal.
    pub(crate) fn from_io(err: io::Error, shutdown: bool) -> Self {
        if shutdown {
            Error::Shutdown
        } else {
            Error::Disconnected(err)
        }
    }
}

use rjl_common::CodecError;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RjlsError {
    /// The listener could not be bound. Fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener was asked to bind.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Underlying I/O error on a connection.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame stream failure on a connection.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// An outbound write did not complete within the write deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
    /// The registry dropped the connection: its outbound queue overflowed
    /// or the server is shutting down.
    #[error("connection dropped by the relay")]
    Evicted,
    /// Appending to the decision log failed.
    #[error("decision log write failed: {0}")]
    Persistence(#[source] std::io::Error),
}

use std::{io, result::Result as StdResult};

use giftkey_protocol::ipc::codec;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result type for giftkey server operations.
pub type Result<T> = StdResult<T, Error>;

/// Errors that can occur in the giftkey server.
#[derive(Error, Debug)]
pub enum Error {
    /// The observer listener could not be bound.
    #[error("Failed to bind to port {port}: {source}")]
    Bind {
        /// Port requested.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Observer frame could not be encoded.
    #[error("Codec error: {0}")]
    Codec(#[from] codec::Error),

    /// The live feed sent something unusable.
    #[error("Feed error: {0}")]
    Feed(String),
}

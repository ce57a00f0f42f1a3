//! Error types and result alias for the inject crate.
use std::{io, result::Result as StdResult};

use thiserror::Error;

/// Crate-local `Result` alias using the inject error type.
pub type Result<T> = StdResult<T, Error>;

/// Errors that can occur while synthesizing or posting input.
#[derive(Error, Debug)]
pub enum Error {
    /// A key name could not be mapped to an OS key.
    #[error("Unknown key: {0}")]
    UnknownKey(String),
    /// The OS input layer refused to create or post an event.
    #[error("Input error: {0}")]
    Input(String),
    /// Neither script dialect ran successfully.
    #[error("Script failed: {0}")]
    Script(String),
    /// A blocking injection task panicked or was cancelled.
    #[error("Injection task aborted: {0}")]
    Aborted(String),
    /// Writing or spawning a script failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

use std::{result::Result as StdResult, time::Duration};

use thiserror::Error;

/// Convenient result type for the engine crate.
pub type Result<T> = StdResult<T, Error>;

/// Unified error type for the giftkey engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Errors originating from an injection backend.
    #[error("Injection failed: {0}")]
    Inject(#[from] inject::Error),

    /// An injection call ran past its expected duration plus grace.
    #[error("Injection timed out after {0:?}")]
    InjectTimeout(Duration),

    /// The observer channel has been closed by the receiver.
    #[error("Observer channel closed")]
    ChannelClosed,

    /// The action queue consumer is gone.
    #[error("Action queue closed")]
    QueueClosed,

    /// The event producer failed to connect.
    #[error("Producer error: {0}")]
    Producer(String),

    /// Generic error with context.
    #[error("Engine error: {0}")]
    Msg(String),
}

//! Giftkey Server
//!
//! The network edges of a giftkey session:
//!
//! - [`Server`]: the observer WebSocket. Each observer gets an `init`
//!   snapshot on connect, every engine broadcast afterwards, and direct
//!   replies to its own requests.
//! - [`FeedProducers`]: the live-event source, a WebSocket JSON feed that
//!   plugs into the engine's connection manager.
//!
//! Binding the observer port is the only fatal failure; everything after that
//! is logged and recovered per connection.

mod error;
pub mod feed;
mod server;

pub use error::{Error, Result};
pub use feed::{FeedProducer, FeedProducers, parse_frame};
pub use server::{Clients, Server};

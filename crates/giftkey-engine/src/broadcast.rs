use giftkey_protocol::{MsgToObserver, ipc::ObserverTx};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Pushes state changes to the observer layer.
///
/// Delivery is fire-and-forget: a closed channel is reported to the caller but
/// never blocks or retries.
#[derive(Clone)]
pub struct Broadcaster {
    /// Observer channel.
    tx: ObserverTx,
}

impl Broadcaster {
    /// Create a new broadcaster from an observer message channel.
    pub fn new(tx: ObserverTx) -> Self {
        Self { tx }
    }

    /// Send a message to all observers.
    pub fn send(&self, msg: MsgToObserver) -> Result<()> {
        trace!(kind = msg.kind(), "broadcast");
        self.tx.send(msg).map_err(|_| Error::ChannelClosed)
    }

    /// Send and log (rather than return) a closed channel.
    pub fn emit(&self, msg: MsgToObserver) {
        let kind = msg.kind();
        if self.send(msg).is_err() {
            debug!(kind, "broadcast_dropped_channel_closed");
        }
    }
}

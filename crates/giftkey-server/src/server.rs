//! Observer WebSocket server.
//!
//! Every connection receives an `init` snapshot first, then every broadcast
//! the engine emits. Inbound frames are decoded and handed to the engine one
//! at a time per connection; direct replies go back to the sender only.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures_util::{SinkExt, StreamExt};
use giftkey_engine::Engine;
use giftkey_protocol::{
    MsgToObserver,
    ipc::{ObserverRx, codec},
};
use parking_lot::Mutex;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{Error, Result};

/// Outbound queue for one observer connection.
type ClientTx = mpsc::UnboundedSender<Message>;

/// Open observer connections.
#[derive(Clone, Default)]
pub struct Clients {
    /// Outbound queues by connection id.
    inner: Arc<Mutex<HashMap<u64, ClientTx>>>,
    /// Next connection id.
    next_id: Arc<AtomicU64>,
}

impl Clients {
    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no observer is connected.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Register a connection, queueing `init` ahead of any broadcast.
    fn join(&self, tx: ClientTx, init: &MsgToObserver) -> Result<u64> {
        let frame = codec::encode(init)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut clients = self.inner.lock();
        if tx.send(Message::text(frame)).is_ok() {
            clients.insert(id, tx);
        }
        Ok(id)
    }

    /// Drop a connection.
    fn leave(&self, id: u64) {
        self.inner.lock().remove(&id);
    }

    /// Push `msg` to every open connection, pruning the ones that are gone.
    pub fn broadcast(&self, msg: &MsgToObserver) {
        let frame = match codec::encode(msg) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to encode event for broadcast: {}", e);
                return;
            }
        };
        let mut clients = self.inner.lock();
        clients.retain(|id, tx| {
            let open = tx.send(Message::text(frame.clone())).is_ok();
            if !open {
                debug!(client = id, "observer_pruned");
            }
            open
        });
        trace!(kind = msg.kind(), clients = clients.len(), "observer_broadcast");
    }
}

/// Observer server bound to a TCP port.
pub struct Server {
    /// Bound listener.
    listener: TcpListener,
    /// Open connections.
    clients: Clients,
}

impl Server {
    /// Bind the listener. Failure here is fatal for the process.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            port: addr.port(),
            source,
        })?;
        Ok(Self {
            listener,
            clients: Clients::default(),
        })
    }

    /// Address actually bound; useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connection registry, shared with the running server.
    pub fn clients(&self) -> Clients {
        self.clients.clone()
    }

    /// Serve observers until `shutdown` is cancelled.
    ///
    /// `observer_rx` is the receiving end of the channel the engine was built
    /// with; everything it yields is fanned out to all connections.
    pub async fn run(
        self,
        engine: Engine,
        mut observer_rx: ObserverRx,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "observer_server_listening");
        let clients = self.clients.clone();
        let fanout = async move {
            while let Some(msg) = observer_rx.recv().await {
                clients.broadcast(&msg);
            }
        };
        let accept = async {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        let engine = engine.clone();
                        let clients = self.clients.clone();
                        let cancel = shutdown.child_token();
                        tokio::spawn(async move {
                            let served =
                                serve_client(stream, peer, &engine, &clients, &cancel).await;
                            if let Err(e) = served {
                                debug!(%peer, error = %e, "observer_connection_error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "observer_accept_failed"),
                }
            }
        };
        select! {
            () = fanout => debug!("observer channel closed; stopping server"),
            _ = accept => {}
            () = shutdown.cancelled() => debug!("Shutdown requested; stopping observer server"),
        }
        Ok(())
    }
}

/// Drive one observer connection to completion.
async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    engine: &Engine,
    clients: &Clients,
    cancel: &CancellationToken,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = clients.join(tx.clone(), &engine.snapshot())?;
    info!(%peer, client = id, "observer_connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ignored = sink.close().await;
    });

    loop {
        let next = select! {
            next = source.next() => next,
            () = cancel.cancelled() => break,
        };
        match next {
            Some(Ok(Message::Text(text))) => match codec::decode(&text) {
                Ok(msg) => {
                    if let Some(reply) = engine.handle(msg).await {
                        let frame = codec::encode(&reply)?;
                        if tx.send(Message::text(frame)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => warn!(%peer, error = %e, "observer_frame_ignored"),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(%peer, error = %e, "observer_read_error");
                break;
            }
        }
    }

    clients.leave(id);
    drop(tx);
    let _ignored = writer.await;
    info!(%peer, client = id, "observer_disconnected");
    Ok(())
}

//! Live-event producer connection lifecycle.
//!
//! `disconnected -> connecting -> {connected | error} -> disconnected`, with an
//! orthogonal `is_live` flag. Every producer gets a generation number; events
//! from a producer that has since been replaced are dropped.
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use giftkey_protocol::{ConnectionSnapshot, ConnectionStatus, MsgToObserver};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};

use crate::{
    Broadcaster, Error, Result,
    normalizer::{RawGift, RawLike},
};

/// Something the live source reported.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    /// A gift payload.
    Gift(RawGift),
    /// A like payload.
    Like(RawLike),
    /// The source (re)connected.
    Connected,
    /// The source dropped.
    Disconnected,
    /// The streamer ended the broadcast.
    StreamEnd,
    /// The source reported an error.
    Error(String),
}

/// A producer event tagged with the producer's generation.
#[derive(Debug, Clone)]
pub struct ProducerMsg {
    /// Generation of the producer that sent it.
    pub generation: u64,
    /// The event.
    pub event: ProducerEvent,
}

/// Receiving end for producer events.
pub type ProducerRx = mpsc::UnboundedReceiver<ProducerMsg>;

/// Where a producer sends its events.
#[derive(Debug, Clone)]
pub struct ProducerSink {
    /// Generation stamped on every event.
    generation: u64,
    /// Engine-side channel.
    tx: mpsc::UnboundedSender<ProducerMsg>,
}

impl ProducerSink {
    /// Build a sink for tests or custom producers.
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ProducerMsg>) -> Self {
        Self { generation, tx }
    }

    /// Generation of this sink.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward an event. Returns `false` once the engine is gone.
    pub fn emit(&self, event: ProducerEvent) -> bool {
        self.tx
            .send(ProducerMsg {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A live-event source subscription.
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Establish the subscription. Events flow to the sink given at creation.
    async fn connect(&self) -> Result<()>;

    /// Tear the subscription down; best effort.
    async fn disconnect(&self);
}

/// Creates producers for a username.
pub trait ProducerFactory: Send + Sync {
    /// Build an unconnected producer for `username`.
    fn create(&self, username: &str, sink: ProducerSink) -> Arc<dyn EventProducer>;
}

/// Owns the producer and the connection snapshot.
#[derive(Clone)]
pub struct ConnectionManager {
    /// Shared state.
    inner: Arc<Inner>,
}

/// Shared connection state.
struct Inner {
    /// Current snapshot, readable without waiting on connects.
    snapshot: Mutex<ConnectionSnapshot>,
    /// Active producer; the async lock serializes connect and disconnect.
    producer: AsyncMutex<Option<Arc<dyn EventProducer>>>,
    /// Generation of the current producer.
    generation: AtomicU64,
    /// Producer constructor.
    factory: Arc<dyn ProducerFactory>,
    /// Handed to each new producer.
    events_tx: mpsc::UnboundedSender<ProducerMsg>,
    /// Observer updates.
    broadcaster: Broadcaster,
}

/// Message text carried by a producer error.
fn error_text(e: &Error) -> String {
    match e {
        Error::Producer(m) | Error::Msg(m) => m.clone(),
        other => other.to_string(),
    }
}

impl ConnectionManager {
    /// Create a manager and the receiving end of producer events.
    pub fn new(factory: Arc<dyn ProducerFactory>, broadcaster: Broadcaster) -> (Self, ProducerRx) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mgr = Self {
            inner: Arc::new(Inner {
                snapshot: Mutex::new(ConnectionSnapshot::default()),
                producer: AsyncMutex::new(None),
                generation: AtomicU64::new(0),
                factory,
                events_tx,
                broadcaster,
            }),
        };
        (mgr, events_rx)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot.lock().clone()
    }

    /// Whether `generation` belongs to the current producer.
    pub fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply `f` to the snapshot and broadcast the result.
    fn update(&self, f: impl FnOnce(&mut ConnectionSnapshot)) {
        let snap = {
            let mut s = self.inner.snapshot.lock();
            f(&mut s);
            s.clone()
        };
        self.inner
            .broadcaster
            .emit(MsgToObserver::connection_status(&snap));
    }

    /// Connect to `username`, replacing any existing producer. Returns whether
    /// the connection succeeded.
    pub async fn connect(&self, username: &str) -> bool {
        let username = username.trim().to_string();
        let mut slot = self.inner.producer.lock().await;
        if let Some(old) = slot.take() {
            debug!("connection_replacing_producer");
            old.disconnect().await;
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|s| {
            s.status = ConnectionStatus::Connecting;
            s.username = Some(username.clone());
            s.error = None;
            s.is_live = false;
        });
        info!(username = %username, generation, "connection_connecting");

        let sink = ProducerSink::new(generation, self.inner.events_tx.clone());
        let producer = self.inner.factory.create(&username, sink);
        match producer.connect().await {
            Ok(()) => {
                *slot = Some(producer);
                self.update(|s| {
                    s.status = ConnectionStatus::Connected;
                    s.error = None;
                    s.is_live = true;
                });
                info!(username = %username, "connection_connected");
                true
            }
            Err(e) => {
                let message = error_text(&e);
                warn!(username = %username, error = %message, "connection_failed");
                self.update(|s| {
                    s.status = ConnectionStatus::Error;
                    s.error = Some(message);
                    s.is_live = false;
                });
                false
            }
        }
    }

    /// Tear down the producer and return to `disconnected`.
    pub async fn disconnect(&self) {
        let mut slot = self.inner.producer.lock().await;
        // Retire the generation first so teardown events are ignored.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(old) = slot.take() {
            old.disconnect().await;
        }
        self.update(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.error = None;
            s.is_live = false;
        });
        info!("connection_disconnected");
    }

    /// Apply a lifecycle event from the producer of `generation`.
    pub fn on_lifecycle(&self, generation: u64, event: &ProducerEvent) {
        if !self.is_current(generation) {
            debug!(generation, ?event, "connection_stale_event_ignored");
            return;
        }
        match event {
            ProducerEvent::Connected => {
                self.update(|s| {
                    s.status = ConnectionStatus::Connected;
                    s.error = None;
                    s.is_live = true;
                });
            }
            ProducerEvent::Disconnected => {
                info!("connection_lost");
                self.update(|s| {
                    s.status = ConnectionStatus::Disconnected;
                    s.is_live = false;
                });
            }
            ProducerEvent::StreamEnd => {
                info!("connection_stream_ended");
                let snap = {
                    let mut s = self.inner.snapshot.lock();
                    s.is_live = false;
                    s.clone()
                };
                self.inner.broadcaster.emit(MsgToObserver::StreamEnd {
                    connection_status: snap.status,
                    username: snap.username.clone(),
                    is_live: false,
                });
                self.inner
                    .broadcaster
                    .emit(MsgToObserver::connection_status(&snap));
            }
            ProducerEvent::Error(message) => {
                warn!(error = %message, "connection_producer_error");
                let message = message.clone();
                self.update(|s| {
                    s.status = ConnectionStatus::Error;
                    s.error = Some(message);
                    s.is_live = false;
                });
            }
            ProducerEvent::Gift(_) | ProducerEvent::Like(_) => {}
        }
    }
}

//! Test support utilities for giftkey-engine unit and integration tests.
//! These helpers are public so the integration suite can share them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use giftkey_protocol::{MsgToObserver, ipc::ObserverRx};
use parking_lot::Mutex;
use tokio::time;

use crate::{
    Error, Result,
    connection::{EventProducer, ProducerFactory, ProducerSink},
};

/// Receive messages until one satisfies `pred`, up to `timeout`.
pub async fn recv_until<F>(
    rx: &mut ObserverRx,
    timeout: Duration,
    mut pred: F,
) -> Option<MsgToObserver>
where
    F: FnMut(&MsgToObserver) -> bool,
{
    time::timeout(timeout, async {
        while let Some(msg) = rx.recv().await {
            if pred(&msg) {
                return Some(msg);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Everything currently buffered on the observer channel.
pub fn drain(rx: &mut ObserverRx) -> Vec<MsgToObserver> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

/// Wire kinds of everything currently buffered.
pub fn drain_kinds(rx: &mut ObserverRx) -> Vec<&'static str> {
    drain(rx).iter().map(MsgToObserver::kind).collect()
}

/// Producer factory whose producers connect instantly, or fail on demand.
#[derive(Default)]
pub struct ScriptedProducers {
    /// Error returned by the next `connect`, if any.
    fail_next: Mutex<Option<String>>,
    /// Sinks handed out, in creation order.
    sinks: Mutex<Vec<ProducerSink>>,
    /// Usernames requested, in creation order.
    usernames: Mutex<Vec<String>>,
    /// `disconnect` calls across all producers.
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedProducers {
    /// Create a factory.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next created producer fail to connect with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    /// Sink of the most recently created producer.
    pub fn last_sink(&self) -> Option<ProducerSink> {
        self.sinks.lock().last().cloned()
    }

    /// Usernames producers were created for.
    pub fn usernames(&self) -> Vec<String> {
        self.usernames.lock().clone()
    }

    /// Total `disconnect` calls.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// Producer built by [`ScriptedProducers`].
struct ScriptedProducer {
    /// Scripted connect failure.
    fail: Option<String>,
    /// Shared disconnect counter.
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl EventProducer for ScriptedProducer {
    async fn connect(&self) -> Result<()> {
        match &self.fail {
            Some(m) => Err(Error::Producer(m.clone())),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProducerFactory for ScriptedProducers {
    fn create(&self, username: &str, sink: ProducerSink) -> Arc<dyn EventProducer> {
        self.usernames.lock().push(username.to_string());
        self.sinks.lock().push(sink);
        Arc::new(ScriptedProducer {
            fail: self.fail_next.lock().take(),
            disconnects: self.disconnects.clone(),
        })
    }
}

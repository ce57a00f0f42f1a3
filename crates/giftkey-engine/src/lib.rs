//! Giftkey Engine
//!
//! Turns live-stream gift and like events into keyboard and mouse macros:
//! - normalizes streak gifts into per-event increments
//! - serializes every macro execution on one ordered queue
//! - aggregates same-gift arrivals into stacks with sliding windows
//! - dispatches through pause, cooldown and focus guards to an injection backend
//! - tracks the producer connection and pushes state to observers
//!
//! [`Engine`] is the session object: construct it with [`EngineDeps`], feed it
//! observer messages through [`Engine::handle`], and it drives everything else.
use std::{sync::Arc, time::Duration};

mod broadcast;
pub mod connection;
mod cooldown;
pub mod dispatcher;
mod error;
pub mod focus;
pub mod likes;
pub mod normalizer;
mod queue;
mod session;
pub mod stacker;
pub mod test_support;

use config::Settings;
use giftkey_protocol::{InjectionMode, MappingSpec, MsgFromObserver, MsgToObserver, ipc::ObserverTx};
use parking_lot::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

pub use broadcast::Broadcaster;
pub use connection::{
    ConnectionManager, EventProducer, ProducerEvent, ProducerFactory, ProducerMsg, ProducerSink,
};
pub use cooldown::CooldownLedger;
pub use dispatcher::{Backends, Dispatcher};
pub use error::{Error, Result};
pub use focus::{ActiveWindowChecker, FixedFocus, FocusChecker, FocusReport};
pub use likes::LikeCounter;
pub use normalizer::{GiftEvent, Normalizer, RawGift, RawLike};
pub use queue::ActionQueue;
pub use session::{Session, SharedSession};
pub use stacker::Stacker;

use normalizer::now_ms;

/// Sender name used for simulated gifts.
pub const TEST_SENDER: &str = "TestUser";
/// Delay before a `test-like-trigger` fires.
pub const TEST_LIKE_DELAY: Duration = Duration::from_millis(3000);
/// Hold time for a `test-like-trigger`.
pub const TEST_LIKE_HOLD: Duration = Duration::from_millis(1000);

/// External collaborators the engine is built on.
pub struct EngineDeps {
    /// Runtime settings.
    pub settings: Settings,
    /// Injection backends.
    pub backends: Backends,
    /// Focus guard.
    pub focus: Arc<dyn FocusChecker>,
    /// Live-event producer constructor.
    pub producers: Arc<dyn ProducerFactory>,
}

/// One giftkey session: mapping, pause flag, like tally, stacks, queue and
/// connection.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Engine {
    /// Mapping, pause flag, mode, stacking switch and focus keyword.
    session: SharedSession,
    /// Streak tracking and catalog.
    normalizer: Arc<Mutex<Normalizer>>,
    /// Like tally and triggers.
    likes: Arc<Mutex<LikeCounter>>,
    /// Macro execution.
    dispatcher: Dispatcher,
    /// Pending stacks.
    stacker: Stacker,
    /// Producer lifecycle.
    connection: ConnectionManager,
    /// Injection backends, for keyword updates.
    backends: Backends,
    /// Observer updates.
    broadcaster: Broadcaster,
}

impl Engine {
    /// Create an engine and spawn its flush and producer pumps on the current
    /// runtime.
    pub fn new(deps: EngineDeps, tx: ObserverTx) -> Self {
        let EngineDeps {
            settings,
            backends,
            focus,
            producers,
        } = deps;
        let broadcaster = Broadcaster::new(tx);
        let session = Arc::new(Mutex::new(Session::from_settings(&settings)));
        backends.set_window_keyword(&settings.target_window_keyword);
        let (stacker, mut flush_rx) = Stacker::new(broadcaster.clone());
        let dispatcher = Dispatcher::new(
            session.clone(),
            settings,
            backends.clone(),
            focus,
            stacker.clone(),
            broadcaster.clone(),
        );
        let (connection, mut events_rx) = ConnectionManager::new(producers, broadcaster.clone());
        let engine = Self {
            session,
            normalizer: Arc::new(Mutex::new(Normalizer::new())),
            likes: Arc::new(Mutex::new(LikeCounter::new())),
            dispatcher,
            stacker,
            connection,
            backends,
            broadcaster,
        };

        let d = engine.dispatcher.clone();
        tokio::spawn(async move {
            while let Some(flush) = flush_rx.recv().await {
                if let Err(e) = d.enqueue_flush(flush) {
                    warn!(error = %e, "stack_flush_enqueue_failed");
                    break;
                }
            }
        });
        let eng = engine.clone();
        tokio::spawn(async move {
            while let Some(msg) = events_rx.recv().await {
                eng.on_producer(msg).await;
            }
        });
        engine
    }

    /// Install a mapping, e.g. one loaded from disk at start.
    pub fn set_mapping(&self, spec: MappingSpec) {
        let (entries, spec) = {
            let mut s = self.session.lock();
            s.replace_mapping(spec);
            (s.mapping.len(), s.spec.clone())
        };
        info!(entries, "mapping_updated");
        self.broadcaster
            .emit(MsgToObserver::MappingUpdated { mapping: spec });
    }

    /// Full state snapshot for a newly joined observer.
    pub fn snapshot(&self) -> MsgToObserver {
        let s = self.session.lock().clone();
        let conn = self.connection.snapshot();
        let (total_likes, like_triggers) = {
            let l = self.likes.lock();
            (l.total(), l.triggers())
        };
        MsgToObserver::Init {
            mapping: s.spec,
            paused: s.paused,
            injection_mode: s.injection_mode,
            total_likes,
            connection_status: conn.status,
            username: conn.username,
            connection_error: conn.error,
            is_live: conn.is_live,
            stacking_enabled: s.stacking_enabled,
            target_window_keyword: s.target_window_keyword,
            like_triggers,
        }
    }

    /// Current session state.
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// The connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The stacker.
    pub fn stacker(&self) -> &Stacker {
        &self.stacker
    }

    /// Resolve once every macro queued so far has finished.
    pub async fn idle(&self) -> Result<()> {
        self.dispatcher.queue().drained().await
    }

    /// Connect to a producer for `username`.
    pub async fn connect(&self, username: &str) -> bool {
        self.normalizer.lock().reset_streaks();
        self.connection.connect(username).await
    }

    /// Disconnect the producer.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Route a tagged producer event.
    async fn on_producer(&self, msg: ProducerMsg) {
        let ProducerMsg { generation, event } = msg;
        match event {
            ProducerEvent::Gift(raw) if self.connection.is_current(generation) => {
                self.on_gift(&raw).await;
            }
            ProducerEvent::Like(raw) if self.connection.is_current(generation) => {
                self.on_like(&raw);
            }
            ProducerEvent::Gift(_) | ProducerEvent::Like(_) => {
                debug!(generation, "producer_stale_event_ignored");
            }
            lifecycle => self.connection.on_lifecycle(generation, &lifecycle),
        }
    }

    /// Normalize, broadcast and dispatch a raw gift.
    pub async fn on_gift(&self, raw: &RawGift) {
        let Some(ev) = self.normalizer.lock().normalize(raw, now_ms()) else {
            return;
        };
        debug!(
            gift = %ev.gift_name,
            sender = %ev.sender,
            count = ev.count_inc,
            "gift_received"
        );
        self.broadcaster.emit(MsgToObserver::Gift {
            gift_name: ev.gift_name.clone(),
            sender: ev.sender.clone(),
            image_url: ev.image_url.clone(),
            ts: ev.ts,
            count_inc: ev.count_inc,
            diamond_count: ev.diamond_count,
        });
        let dispatched = self
            .dispatcher
            .dispatch(&ev.gift_name, &ev.sender, ev.count_inc)
            .await;
        if let Err(e) = dispatched {
            warn!(gift = %ev.gift_name, error = %e, "gift_dispatch_failed");
        }
    }

    /// Count likes, broadcast the tally and fire crossed triggers.
    pub fn on_like(&self, raw: &RawLike) {
        let like_count = raw.count();
        let (total_likes, firings) = {
            let mut l = self.likes.lock();
            let firings = l.add(like_count);
            (l.total(), firings)
        };
        self.broadcaster.emit(MsgToObserver::Like {
            like_count,
            total_likes,
        });
        for f in firings {
            info!(
                threshold = f.threshold,
                multiple = f.multiple,
                key = %f.key,
                "like_trigger_fired"
            );
            let label = format!("like-trigger:{}", f.threshold);
            if let Err(e) = self.dispatcher.enqueue_hold(&label, &f.key, f.duration) {
                warn!(error = %e, "like_trigger_enqueue_failed");
            }
        }
    }

    /// Handle one observer message. Returns a reply for the sender only, if
    /// the message calls for one; everything else is broadcast.
    pub async fn handle(&self, msg: MsgFromObserver) -> Option<MsgToObserver> {
        match msg {
            MsgFromObserver::UpdateMapping { mapping } => {
                self.set_mapping(mapping);
                None
            }
            MsgFromObserver::TogglePause { paused } => {
                self.session.lock().paused = paused;
                info!(paused, "pause_updated");
                self.broadcaster.emit(MsgToObserver::PauseUpdated { paused });
                None
            }
            MsgFromObserver::TestGift {
                gift_name,
                delay_ms,
            } => {
                self.test_gift(&gift_name, Duration::from_millis(delay_ms))
                    .await;
                None
            }
            MsgFromObserver::TestLikeTrigger {
                trigger_key,
                target_likes,
            } => {
                self.test_like_trigger(trigger_key.as_deref(), target_likes);
                None
            }
            MsgFromObserver::ConnectTiktok { username } => {
                let username = username.trim().to_string();
                if username.is_empty() {
                    return Some(MsgToObserver::ConnectionError {
                        error: "Username is required".to_string(),
                    });
                }
                self.connect(&username)
                    .await
                    .then_some(MsgToObserver::ConnectionSuccess { username })
            }
            MsgFromObserver::DisconnectTiktok => {
                self.disconnect().await;
                None
            }
            MsgFromObserver::GetConnectionStatus => Some(MsgToObserver::connection_status(
                &self.connection.snapshot(),
            )),
            MsgFromObserver::LikeKey { key, duration_ms } => {
                // Zero or absent means the default; negatives clamp to zero and
                // values past `Duration::MAX` saturate.
                let duration = match duration_ms {
                    Some(ms) if ms.is_finite() && ms != 0.0 => {
                        Duration::try_from_secs_f64(ms.max(0.0) / 1000.0)
                            .unwrap_or(Duration::MAX)
                    }
                    _ => likes::DEFAULT_LIKE_HOLD,
                };
                if let Err(e) = self.dispatcher.enqueue_hold("like-key", &key, duration) {
                    warn!(error = %e, "like_key_enqueue_failed");
                }
                None
            }
            MsgFromObserver::SetInjectionMode { mode } => {
                self.set_injection_mode(&mode);
                None
            }
            MsgFromObserver::SetStackingMode { enabled } => {
                self.set_stacking(enabled);
                None
            }
            MsgFromObserver::SetTargetWindow { keyword } => {
                let keyword = keyword.trim().to_lowercase();
                self.session.lock().target_window_keyword = keyword.clone();
                self.backends.set_window_keyword(&keyword);
                info!(keyword = %keyword, "target_window_updated");
                self.broadcaster
                    .emit(MsgToObserver::TargetWindowUpdated { keyword });
                None
            }
            MsgFromObserver::UpdateLikeTriggers { triggers } => {
                let triggers = {
                    let mut l = self.likes.lock();
                    l.set_triggers(triggers);
                    l.triggers()
                };
                self.broadcaster
                    .emit(MsgToObserver::LikeTriggersUpdated { triggers });
                None
            }
            MsgFromObserver::ResetLikeCounts => {
                self.likes.lock().reset();
                info!("like_counts_reset");
                self.broadcaster.emit(MsgToObserver::Like {
                    like_count: 0,
                    total_likes: 0,
                });
                Some(MsgToObserver::ResetSuccess {
                    message: "Like counts reset successfully".to_string(),
                })
            }
            MsgFromObserver::GetGiftCatalog => {
                let gifts = self.normalizer.lock().catalog();
                Some(MsgToObserver::GiftCatalog { gifts })
            }
        }
    }

    /// Switch the injection mode; unknown names are ignored.
    fn set_injection_mode(&self, mode: &str) {
        let Some(mode) = InjectionMode::try_from_str(mode) else {
            debug!(mode, "injection_mode_unknown_ignored");
            return;
        };
        self.session.lock().injection_mode = mode;
        info!(mode = %mode, "injection_mode_updated");
        self.broadcaster
            .emit(MsgToObserver::InjectionModeUpdated { mode });
    }

    /// Toggle stacking globally. Turning it off flushes pending stacks.
    fn set_stacking(&self, enabled: bool) {
        self.session.lock().stacking_enabled = enabled;
        if !enabled {
            let flushed = self.stacker.flush_all();
            debug!(flushed, "stacking_disabled_flushed");
        }
        info!(enabled, "stacking_mode_updated");
        self.broadcaster
            .emit(MsgToObserver::StackingModeUpdated { enabled });
    }

    /// Simulate a gift from the test sender after `delay`.
    async fn test_gift(&self, gift_name: &str, delay: Duration) {
        let gift = gift_name.trim().to_lowercase();
        if gift.is_empty() {
            debug!("test_gift_without_name");
            return;
        }
        info!(gift = %gift, delay_ms = delay.as_millis() as u64, "test_gift");
        if delay.is_zero() {
            if let Err(e) = self.dispatcher.dispatch(&gift, TEST_SENDER, 1).await {
                warn!(error = %e, "test_gift_enqueue_failed");
            }
            return;
        }
        let d = self.dispatcher.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            if let Err(e) = d.dispatch(&gift, TEST_SENDER, 1).await {
                warn!(error = %e, "test_gift_enqueue_failed");
            }
        });
    }

    /// Fire a like trigger's key as if its threshold had been reached.
    fn test_like_trigger(&self, key: Option<&str>, target: Option<u64>) {
        let key = key.map(str::trim).unwrap_or_default().to_lowercase();
        let target = target.unwrap_or(0);
        if key.is_empty() || target == 0 {
            debug!("test_like_trigger_incomplete");
            return;
        }
        let total = self.likes.lock().total();
        let needed = likes::likes_needed(total, target);
        info!(key = %key, target, simulated = needed, total, "test_like_trigger");
        if self.session.lock().paused {
            debug!("test_like_trigger_ignored_paused");
            return;
        }
        let d = self.dispatcher.clone();
        tokio::spawn(async move {
            time::sleep(TEST_LIKE_DELAY).await;
            if let Err(e) = d.enqueue_hold("test-like-trigger", &key, TEST_LIKE_HOLD) {
                warn!(error = %e, "test_like_trigger_enqueue_failed");
            }
        });
    }
}

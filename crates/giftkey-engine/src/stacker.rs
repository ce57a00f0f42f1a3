//! Per-gift stacking windows with cancellation support.
//!
//! Each gift name owns at most one pending stack. A stack holds a running
//! count and a timer task guarded by a `CancellationToken`; every arrival
//! cancels the timer and arms a new one (sliding window). When the timer
//! fires, the max-stack threshold is exceeded, or stacking is switched off,
//! the stack is removed and a [`Flush`] is sent to the flush channel.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use config::{GiftAction, Stacking};
use giftkey_protocol::{MsgToObserver, StackingMode};
use parking_lot::Mutex;
use tokio::{sync::mpsc, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::Broadcaster;

/// Why a stack was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The window elapsed with no new arrival.
    Window,
    /// The running total exceeded `maxStack`.
    MaxStack,
    /// Stacking was switched off globally.
    Disabled,
}

/// A completed stack, ready to execute.
#[derive(Debug, Clone)]
pub struct Flush {
    /// Lowercased gift name.
    pub gift: String,
    /// Combined count.
    pub count: u32,
    /// Action captured when the stack started.
    pub action: Arc<GiftAction>,
    /// Execution mode.
    pub mode: StackingMode,
    /// Trigger.
    pub reason: FlushReason,
}

/// Result of adding to a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOutcome {
    /// A new stack was created with this count.
    Started(u32),
    /// An existing stack grew to this count and its window restarted.
    Extended(u32),
    /// The stack hit its max and was flushed with this count.
    Flushed(u32),
}

/// One pending stack.
struct StackEntry {
    /// Running total, always at least one.
    count: u32,
    /// Action captured at stack start.
    action: Arc<GiftAction>,
    /// Window and cutoff settings.
    stacking: Stacking,
    /// Cancels the current timer.
    token: CancellationToken,
    /// Identifies the current timer; stale timers compare unequal.
    generation: u64,
}

/// Stack aggregator; cheap to clone.
#[derive(Clone)]
pub struct Stacker {
    /// Pending stacks by lowercased gift name.
    entries: Arc<Mutex<HashMap<String, StackEntry>>>,
    /// Source of timer generations.
    next_gen: Arc<AtomicU64>,
    /// Completed stacks go here.
    flush_tx: mpsc::UnboundedSender<Flush>,
    /// Observer updates.
    broadcaster: Broadcaster,
}

impl Stacker {
    /// Create a stacker and the receiving end of its flush channel.
    pub fn new(broadcaster: Broadcaster) -> (Self, mpsc::UnboundedReceiver<Flush>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let stacker = Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_gen: Arc::new(AtomicU64::new(1)),
            flush_tx,
            broadcaster,
        };
        (stacker, flush_rx)
    }

    /// Check if a stack is pending for `gift`.
    pub fn is_active(&self, gift: &str) -> bool {
        self.entries.lock().contains_key(gift)
    }

    /// Running count for `gift`, if a stack is pending.
    pub fn count(&self, gift: &str) -> Option<u32> {
        self.entries.lock().get(gift).map(|e| e.count)
    }

    /// Add `count` arrivals of `gift`, starting or extending its stack.
    pub fn add(
        &self,
        gift: &str,
        count: u32,
        action: Arc<GiftAction>,
        stacking: Stacking,
    ) -> StackOutcome {
        let count = count.max(1);
        let generation = self.next_gen.fetch_add(1, Ordering::Relaxed);
        let mut arm = None;
        let mut flushed = None;
        let outcome = {
            let mut map = self.entries.lock();
            match map.get_mut(gift) {
                None => {
                    let token = CancellationToken::new();
                    arm = Some((token.clone(), stacking.window));
                    map.insert(
                        gift.to_string(),
                        StackEntry {
                            count,
                            action,
                            stacking,
                            token,
                            generation,
                        },
                    );
                    StackOutcome::Started(count)
                }
                Some(entry) => {
                    entry.count = entry.count.saturating_add(count);
                    entry.token.cancel();
                    let total = entry.count;
                    if entry.stacking.max_stack.is_some_and(|max| total > max) {
                        flushed = map.remove(gift);
                        StackOutcome::Flushed(total)
                    } else {
                        let token = CancellationToken::new();
                        arm = Some((token.clone(), entry.stacking.window));
                        entry.token = token;
                        entry.generation = generation;
                        StackOutcome::Extended(total)
                    }
                }
            }
        };

        let (total, window) = match outcome {
            StackOutcome::Started(n) | StackOutcome::Extended(n) | StackOutcome::Flushed(n) => {
                (n, arm.as_ref().map_or(stacking.window, |(_, w)| *w))
            }
        };
        debug!(gift, count = total, ?outcome, "gift_stack_add");
        self.broadcaster.emit(MsgToObserver::GiftStackUpdate {
            gift_name: gift.to_string(),
            count: total,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
        });

        if let Some((token, window)) = arm {
            self.arm(gift.to_string(), generation, window, token);
        }
        if let Some(entry) = flushed {
            self.emit(gift, entry, FlushReason::MaxStack);
        }
        outcome
    }

    /// Flush every pending stack immediately. Returns how many were flushed.
    pub fn flush_all(&self) -> usize {
        let drained: Vec<(String, StackEntry)> = self.entries.lock().drain().collect();
        let n = drained.len();
        for (gift, entry) in drained {
            entry.token.cancel();
            self.emit(&gift, entry, FlushReason::Disabled);
        }
        trace!(flushed = n, "gift_stack_flush_all");
        n
    }

    /// Spawn the window timer for one generation of a stack.
    fn arm(&self, gift: String, generation: u64, window: Duration, token: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(window) => this.fire(&gift, generation),
                _ = token.cancelled() => {
                    trace!(gift = %gift, generation, "gift_stack_timer_cancelled");
                }
            }
        });
    }

    /// Window elapsed: flush if this timer is still the current one.
    fn fire(&self, gift: &str, generation: u64) {
        let entry = {
            let mut map = self.entries.lock();
            match map.get(gift) {
                Some(e) if e.generation == generation => map.remove(gift),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            self.emit(gift, entry, FlushReason::Window);
        }
    }

    /// Hand a removed stack to the flush channel.
    fn emit(&self, gift: &str, entry: StackEntry, reason: FlushReason) {
        let flush = Flush {
            gift: gift.to_string(),
            count: entry.count,
            mode: entry.stacking.mode,
            action: entry.action,
            reason,
        };
        debug!(gift, count = flush.count, ?reason, mode = flush.mode.as_str(), "gift_stack_flush");
        if self.flush_tx.send(flush).is_err() {
            debug!(gift, "gift_stack_flush_dropped_receiver_gone");
        }
    }
}

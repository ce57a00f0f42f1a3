//! Like tally and threshold triggers.
use std::{mem, time::Duration};

use giftkey_protocol::LikeTrigger;
use tracing::debug;

/// Hold time for a trigger without `durationMs`.
pub const DEFAULT_LIKE_HOLD: Duration = Duration::from_millis(300);

/// A trigger that should fire now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeFiring {
    /// Key to hold, lowercased.
    pub key: String,
    /// Hold time.
    pub duration: Duration,
    /// The trigger's threshold.
    pub threshold: u64,
    /// How many multiples of the threshold the total has reached.
    pub multiple: u64,
}

/// A configured trigger plus how many multiples it has already fired for.
#[derive(Debug, Clone)]
struct TriggerState {
    /// The rule.
    trigger: LikeTrigger,
    /// Highest multiple already fired.
    fired: u64,
}

/// Running like total and trigger bookkeeping.
#[derive(Debug, Default)]
pub struct LikeCounter {
    /// Likes since start or last reset.
    total: u64,
    /// Rules in configured order.
    triggers: Vec<TriggerState>,
}

impl LikeCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current total.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Configured triggers.
    pub fn triggers(&self) -> Vec<LikeTrigger> {
        self.triggers.iter().map(|t| t.trigger.clone()).collect()
    }

    /// Replace the trigger list. Triggers with an unchanged threshold and key
    /// keep their fired count.
    pub fn set_triggers(&mut self, triggers: Vec<LikeTrigger>) {
        let old = mem::take(&mut self.triggers);
        self.triggers = triggers
            .into_iter()
            .map(|mut trigger| {
                trigger.key = trigger.key.trim().to_lowercase();
                let fired = old
                    .iter()
                    .find(|o| {
                        o.trigger.threshold == trigger.threshold && o.trigger.key == trigger.key
                    })
                    .map_or(0, |o| o.fired);
                TriggerState { trigger, fired }
            })
            .collect();
        debug!(count = self.triggers.len(), "like_triggers_set");
    }

    /// Add `likes` to the total and return the triggers that crossed a new
    /// multiple of their threshold. Each trigger fires at most once per call.
    pub fn add(&mut self, likes: u64) -> Vec<LikeFiring> {
        self.total = self.total.saturating_add(likes);
        let total = self.total;
        let mut out = Vec::new();
        for state in &mut self.triggers {
            let t = &state.trigger;
            if t.threshold == 0 || t.key.is_empty() {
                continue;
            }
            let multiple = total / t.threshold;
            if multiple > state.fired {
                state.fired = multiple;
                out.push(LikeFiring {
                    key: t.key.clone(),
                    duration: t.duration_ms.map_or(DEFAULT_LIKE_HOLD, Duration::from_millis),
                    threshold: t.threshold,
                    multiple,
                });
            }
        }
        out
    }

    /// Zero the total and every trigger's fired count.
    pub fn reset(&mut self) {
        self.total = 0;
        for t in &mut self.triggers {
            t.fired = 0;
        }
    }
}

/// Likes still needed to reach the next multiple of `target`.
pub fn likes_needed(total: u64, target: u64) -> u64 {
    if target == 0 {
        return 0;
    }
    target - total % target
}

//! Macro dispatch: precondition checks, stacking hand-off and execution.
//!
//! Gift guards and the stacking hand-off run when a gift arrives. Every
//! execution is queued on the [`ActionQueue`], so gifts, stack flushes, test
//! gifts and like triggers never overlap on the injector. Injection
//! errors and timeouts are logged here and never reach the caller.
use std::{future::Future, sync::Arc, time::Duration};

use config::{Action, GiftAction, PressMode, Settings};
use giftkey_protocol::{InjectionMode, MsgToObserver, StackingMode};
use inject::{InjectionBackend, Step, Target, sequence_delay};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    ActionQueue, Broadcaster, CooldownLedger, Error, FocusChecker, Result,
    session::SharedSession,
    stacker::{Flush, Stacker},
};

/// Pause between units of a sequential execution.
pub const SEQUENTIAL_GAP: Duration = Duration::from_millis(50);
/// Spacing between press/release pairs of a batch.
pub const BATCH_SPACING: Duration = Duration::from_millis(10);

/// The two interchangeable backends; the injection mode picks one.
#[derive(Clone)]
pub struct Backends {
    /// OS key sender.
    pub native: Arc<dyn InjectionBackend>,
    /// AutoHotkey scripts.
    pub script: Arc<dyn InjectionBackend>,
}

impl Backends {
    /// Use one backend for every mode.
    pub fn single(backend: Arc<dyn InjectionBackend>) -> Self {
        Self {
            native: backend.clone(),
            script: backend,
        }
    }

    /// Backend for `mode`.
    pub fn for_mode(&self, mode: InjectionMode) -> Arc<dyn InjectionBackend> {
        match mode {
            InjectionMode::AutoHotkey => self.script.clone(),
            InjectionMode::KeySender | InjectionMode::KeySenderRepeat => self.native.clone(),
        }
    }

    /// Forward the focus keyword to both backends.
    pub fn set_window_keyword(&self, keyword: &str) {
        self.native.set_window_keyword(keyword);
        self.script.set_window_keyword(keyword);
    }
}

/// One press of a key or mouse target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Press {
    /// What to press.
    pub target: Target,
    /// Hold time, or total tapping time when `repeat` is set.
    pub duration: Duration,
    /// Tap spacing; `None` holds instead of tapping.
    pub repeat: Option<Duration>,
}

/// How an execution is delivered to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// A single press.
    Press(Press),
    /// The same press `count` times, `gap` apart.
    Sequential {
        /// Unit press.
        press: Press,
        /// Repetitions.
        count: u32,
        /// Pause between repetitions.
        gap: Duration,
    },
    /// `count` press/release pairs in one burst.
    Batch {
        /// What to tap.
        target: Target,
        /// Pairs.
        count: u32,
        /// Pair spacing.
        spacing: Duration,
    },
    /// Sequence steps, run `times` times `gap` apart.
    Sequence {
        /// Steps.
        steps: Vec<Step>,
        /// Repetitions.
        times: u32,
        /// Pause between repetitions.
        gap: Duration,
    },
}

/// Build the unit press for a press action under `mode`.
fn unit_press(action: &Action, mode: InjectionMode, settings: &Settings) -> Option<Press> {
    let target = action.target()?;
    let repeat = match action.press_mode() {
        PressMode::Repeat { interval } => Some(settings.repeat_interval_for(interval)),
        PressMode::Hold if mode == InjectionMode::KeySenderRepeat => {
            Some(settings.repeat_interval_for(None))
        }
        PressMode::Hold => None,
    };
    Some(Press {
        target,
        duration: action.duration(),
        repeat,
    })
}

/// Plan an execution of `action` for `count` gifts.
///
/// `stacked` is the stacking mode when the execution comes from a stack flush.
/// Without it, sequences run once and multi-count presses use a batch for keys
/// and sequential presses for mouse buttons.
pub fn plan(
    action: &Action,
    count: u32,
    stacked: Option<StackingMode>,
    mode: InjectionMode,
    settings: &Settings,
) -> Option<Plan> {
    let count = count.max(1);
    if let Action::Sequence(steps) = action {
        let times = if stacked.is_some() { count } else { 1 };
        return Some(Plan::Sequence {
            steps: steps.clone(),
            times,
            gap: SEQUENTIAL_GAP,
        });
    }
    let press = unit_press(action, mode, settings)?;
    if count == 1 {
        return Some(Plan::Press(press));
    }
    let sequential = |press: Press| Plan::Sequential {
        press,
        count,
        gap: SEQUENTIAL_GAP,
    };
    let batch = |press: Press| Plan::Batch {
        target: press.target,
        count,
        spacing: BATCH_SPACING,
    };
    Some(match stacked {
        Some(StackingMode::CumulativeHold) => Plan::Press(Press {
            duration: press.duration.saturating_mul(count),
            ..press
        }),
        Some(StackingMode::Sequential) => sequential(press),
        Some(StackingMode::Batch) => batch(press),
        None if press.target.is_key() => batch(press),
        None => sequential(press),
    })
}

/// Gift-side and like-side macro dispatcher; cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    /// Shared state.
    inner: Arc<Inner>,
}

/// Shared dispatcher state.
struct Inner {
    /// Pause flag, mapping, mode and keyword.
    session: SharedSession,
    /// Repeat interval and timeout grace.
    settings: Settings,
    /// Injection backends.
    backends: Backends,
    /// Focus guard.
    focus: Arc<dyn FocusChecker>,
    /// Serializes every execution.
    queue: ActionQueue,
    /// Per-gift last execution.
    cooldowns: CooldownLedger,
    /// Pending stacks.
    stacker: Stacker,
    /// Observer updates.
    broadcaster: Broadcaster,
}

impl Dispatcher {
    /// Create a dispatcher over the given collaborators.
    pub fn new(
        session: SharedSession,
        settings: Settings,
        backends: Backends,
        focus: Arc<dyn FocusChecker>,
        stacker: Stacker,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                settings,
                backends,
                focus,
                queue: ActionQueue::new(),
                cooldowns: CooldownLedger::new(),
                stacker,
                broadcaster,
            }),
        }
    }

    /// The underlying queue.
    pub fn queue(&self) -> &ActionQueue {
        &self.inner.queue
    }

    /// The cooldown ledger.
    pub fn cooldowns(&self) -> &CooldownLedger {
        &self.inner.cooldowns
    }

    /// Handle a gift arrival.
    ///
    /// Pause, mapping, cooldown and focus are checked now, and stackable gifts
    /// join their stack immediately so stack windows track arrival time. Only
    /// the execution itself waits on the queue.
    pub async fn dispatch(&self, gift: &str, sender: &str, count: u32) -> Result<()> {
        let (paused, action, stacking_enabled, keyword) = {
            let s = self.inner.session.lock();
            (
                s.paused,
                s.mapping.get(gift).cloned(),
                s.stacking_enabled,
                s.target_window_keyword.clone(),
            )
        };
        if paused {
            debug!(gift, sender, "gift_ignored_paused");
            return Ok(());
        }
        let Some(action) = action else {
            debug!(gift, "gift_unmapped");
            return Ok(());
        };
        if let Some(left) = self.inner.cooldowns.remaining(gift, action.cooldown) {
            debug!(gift, remaining_ms = left.as_millis() as u64, "gift_cooldown_active");
            return Ok(());
        }
        if !self.focus_ok(&keyword, true).await {
            info!(gift, expected = %keyword, "gift_skipped_focus_mismatch");
            return Ok(());
        }
        if stacking_enabled && let Some(stacking) = action.stacking {
            self.inner
                .stacker
                .add(gift, count, Arc::new(action), stacking);
            return Ok(());
        }
        let this = self.clone();
        let gift = gift.to_string();
        let sender = sender.to_string();
        self.inner.queue.enqueue(format!("gift:{gift}"), async move {
            this.run_gift(&gift, &sender, &action, count).await;
            Ok(())
        })
    }

    /// Queue a completed stack.
    pub fn enqueue_flush(&self, flush: Flush) -> Result<()> {
        let this = self.clone();
        self.inner
            .queue
            .enqueue(format!("flush:{}", flush.gift), async move {
                this.run_flush(flush).await;
                Ok(())
            })
    }

    /// Queue a plain key hold (like triggers, `like-key`). Pause and focus are
    /// checked when the job runs.
    pub fn enqueue_hold(&self, label: &str, key: &str, duration: Duration) -> Result<()> {
        let this = self.clone();
        let label_owned = label.to_string();
        let key = key.trim().to_lowercase();
        self.inner.queue.enqueue(label, async move {
            this.run_hold(&label_owned, &key, duration).await;
            Ok(())
        })
    }

    /// Execute a queued gift. Pause and cooldown may have changed while it
    /// waited, so both are checked again.
    async fn run_gift(&self, gift: &str, sender: &str, action: &GiftAction, count: u32) {
        let (paused, mode) = {
            let s = self.inner.session.lock();
            (s.paused, s.injection_mode)
        };
        if paused {
            debug!(gift, sender, "gift_ignored_paused");
            return;
        }
        if let Some(left) = self.inner.cooldowns.remaining(gift, action.cooldown) {
            debug!(gift, remaining_ms = left.as_millis() as u64, "gift_cooldown_active");
            return;
        }
        info!(gift, sender, count, mode = %mode, "gift_execute");
        if self.execute(gift, action, count, None, mode).await {
            self.inner.cooldowns.record(gift);
        }
    }

    /// Execute a flushed stack and report completion.
    ///
    /// The stack has already left the stacker, so completion is reported even
    /// when the flush is skipped because the session is paused.
    async fn run_flush(&self, flush: Flush) {
        let (paused, mode) = {
            let s = self.inner.session.lock();
            (s.paused, s.injection_mode)
        };
        if paused {
            debug!(gift = %flush.gift, count = flush.count, "stack_flush_ignored_paused");
        } else {
            info!(
                gift = %flush.gift,
                count = flush.count,
                mode = flush.mode.as_str(),
                "stack_execute"
            );
            if self
                .execute(&flush.gift, &flush.action, flush.count, Some(flush.mode), mode)
                .await
            {
                self.inner.cooldowns.record(&flush.gift);
            }
        }
        self.inner.broadcaster.emit(MsgToObserver::GiftStackComplete {
            gift_name: flush.gift,
            count: flush.count,
            mode: flush.mode,
        });
    }

    /// Hold a key on behalf of a like rule.
    async fn run_hold(&self, label: &str, key: &str, duration: Duration) {
        let (paused, mode, keyword) = {
            let s = self.inner.session.lock();
            (s.paused, s.injection_mode, s.target_window_keyword.clone())
        };
        if paused {
            debug!(label, "like_key_ignored_paused");
            return;
        }
        let Some(target) = Target::parse(key) else {
            debug!(label, "like_key_empty");
            return;
        };
        if !self.focus_ok(&keyword, false).await {
            info!(label, expected = %keyword, "like_key_skipped_focus_mismatch");
            return;
        }
        info!(label, key, duration_ms = duration.as_millis() as u64, "like_key_execute");
        let plan = Plan::Press(Press {
            target,
            duration,
            repeat: None,
        });
        if let Err(e) = self.run_plan(self.inner.backends.for_mode(mode), &plan).await {
            warn!(label, error = %e, "like_key_failed");
        }
    }

    /// Ask the focus checker; optionally broadcast a warning on mismatch.
    async fn focus_ok(&self, keyword: &str, warn_observers: bool) -> bool {
        if keyword.trim().is_empty() {
            return true;
        }
        let report = self.inner.focus.check(keyword).await;
        if !report.ok && warn_observers {
            self.inner.broadcaster.emit(MsgToObserver::FocusWarning {
                expected: keyword.to_string(),
                active_title: report.title.clone(),
                active_owner: report.owner.clone(),
            });
        }
        report.ok
    }

    /// Plan and run one execution. Returns whether it succeeded.
    async fn execute(
        &self,
        gift: &str,
        action: &GiftAction,
        count: u32,
        stacked: Option<StackingMode>,
        mode: InjectionMode,
    ) -> bool {
        let Some(plan) = plan(&action.action, count, stacked, mode, &self.inner.settings) else {
            debug!(gift, "gift_action_without_target");
            return false;
        };
        let backend = self.inner.backends.for_mode(mode);
        match self.run_plan(backend, &plan).await {
            Ok(()) => true,
            Err(e) => {
                warn!(gift, error = %e, "gift_execute_failed");
                false
            }
        }
    }

    /// Deliver a plan, bounding every backend call by its expected time plus grace.
    async fn run_plan(&self, backend: Arc<dyn InjectionBackend>, plan: &Plan) -> Result<()> {
        match plan {
            Plan::Press(press) => self.press(&*backend, press).await,
            Plan::Sequential { press, count, gap } => {
                for i in 0..*count {
                    if i > 0 {
                        time::sleep(*gap).await;
                    }
                    self.press(&*backend, press).await?;
                }
                Ok(())
            }
            Plan::Batch {
                target,
                count,
                spacing,
            } => {
                let expected = spacing.saturating_mul(count.saturating_sub(1));
                self.bounded(expected, backend.tap_batch(target, *count, *spacing))
                    .await
            }
            Plan::Sequence { steps, times, gap } => {
                for i in 0..*times {
                    if i > 0 {
                        time::sleep(*gap).await;
                    }
                    self.bounded(sequence_delay(steps), backend.run_sequence(steps))
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// One hold or tap-repeat.
    async fn press(&self, backend: &dyn InjectionBackend, press: &Press) -> Result<()> {
        match press.repeat {
            Some(interval) => {
                self.bounded(
                    press.duration,
                    backend.tap_repeat(&press.target, interval, press.duration),
                )
                .await
            }
            None => {
                self.bounded(press.duration, backend.hold(&press.target, press.duration))
                    .await
            }
        }
    }

    /// Run a backend call with a timeout of `expected` plus the grace period.
    async fn bounded<F>(&self, expected: Duration, call: F) -> Result<()>
    where
        F: Future<Output = inject::Result<()>>,
    {
        let limit = expected.saturating_add(self.inner.settings.inject_grace);
        match time::timeout(limit, call).await {
            Ok(r) => r.map_err(Error::from),
            Err(_) => Err(Error::InjectTimeout(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use inject::MouseButton;

    use super::*;

    fn key(k: &str, ms: u64, mode: PressMode) -> Action {
        Action::KeyPress {
            key: k.into(),
            duration: Duration::from_millis(ms),
            mode,
        }
    }

    fn mouse(ms: u64) -> Action {
        Action::MousePress {
            button: MouseButton::Right,
            duration: Duration::from_millis(ms),
            mode: PressMode::Hold,
        }
    }

    fn hold(target: Target, ms: u64) -> Press {
        Press {
            target,
            duration: Duration::from_millis(ms),
            repeat: None,
        }
    }

    #[test]
    fn single_press_holds_or_repeats() {
        let s = Settings::default();
        let a = key("a", 1000, PressMode::Hold);
        assert_eq!(
            plan(&a, 1, None, InjectionMode::KeySender, &s),
            Some(Plan::Press(hold(Target::Key("a".into()), 1000)))
        );
        let Some(Plan::Press(p)) = plan(&a, 1, None, InjectionMode::KeySenderRepeat, &s) else {
            panic!("expected press");
        };
        assert_eq!(p.repeat, Some(Duration::from_millis(20)));

        let r = key("a", 1000, PressMode::Repeat {
            interval: Some(Duration::from_millis(2)),
        });
        let Some(Plan::Press(p)) = plan(&r, 1, None, InjectionMode::KeySender, &s) else {
            panic!("expected press");
        };
        assert_eq!(p.repeat, Some(Duration::from_millis(5)));
    }

    #[test]
    fn multi_count_uses_batch_for_keys_and_sequential_for_mouse() {
        let s = Settings::default();
        let k = plan(&key("a", 300, PressMode::Hold), 4, None, InjectionMode::KeySender, &s);
        assert_eq!(
            k,
            Some(Plan::Batch {
                target: Target::Key("a".into()),
                count: 4,
                spacing: BATCH_SPACING
            })
        );
        let m = plan(&mouse(300), 3, None, InjectionMode::KeySender, &s);
        assert_eq!(
            m,
            Some(Plan::Sequential {
                press: hold(Target::Mouse(MouseButton::Right), 300),
                count: 3,
                gap: SEQUENTIAL_GAP
            })
        );
    }

    #[test]
    fn stacked_modes() {
        let s = Settings::default();
        let a = key("w", 250, PressMode::Hold);
        let m = InjectionMode::KeySender;
        assert_eq!(
            plan(&a, 4, Some(StackingMode::CumulativeHold), m, &s),
            Some(Plan::Press(hold(Target::Key("w".into()), 1000)))
        );
        assert!(matches!(
            plan(&a, 4, Some(StackingMode::Sequential), m, &s),
            Some(Plan::Sequential { count: 4, .. })
        ));
        assert!(matches!(
            plan(&mouse(100), 4, Some(StackingMode::Batch), m, &s),
            Some(Plan::Batch { count: 4, .. })
        ));
    }

    #[test]
    fn sequences_run_once_unless_stacked() {
        let s = Settings::default();
        let seq = Action::Sequence(vec![Step::Wait {
            delay: Duration::from_millis(5),
        }]);
        let m = InjectionMode::KeySender;
        assert!(matches!(
            plan(&seq, 3, None, m, &s),
            Some(Plan::Sequence { times: 1, .. })
        ));
        assert!(matches!(
            plan(&seq, 3, Some(StackingMode::Batch), m, &s),
            Some(Plan::Sequence { times: 3, .. })
        ));
    }
}

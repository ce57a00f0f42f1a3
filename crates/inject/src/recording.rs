//! Test backend that records calls instead of posting input.
//!
//! Calls sleep for their nominal duration on the tokio clock, so tests under
//! `start_paused` observe realistic serialization without real waiting. Like
//! the native backend, a call dropped mid-flight still records its release.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    Error, InjectionBackend, MouseButton, Result, Step, Target, guard::ReleaseGuard,
    sequence_delay,
};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `hold`, `hold_key` or `mouse_hold`.
    Hold {
        /// Pressed target.
        target: Target,
        /// Hold time.
        duration: Duration,
    },
    /// `tap_repeat`.
    TapRepeat {
        /// Tapped target.
        target: Target,
        /// Tap spacing.
        interval: Duration,
        /// Total repeat time.
        total: Duration,
    },
    /// `tap_batch`.
    Batch {
        /// Tapped target.
        target: Target,
        /// Press/release pairs.
        count: u32,
        /// Pair spacing.
        spacing: Duration,
    },
    /// `run_sequence`.
    Sequence(Vec<Step>),
}

/// A call plus when it started and finished.
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Start time on the tokio clock.
    pub started: Instant,
    /// End time, `None` while in flight or if the call failed.
    pub finished: Option<Instant>,
    /// When the input was let go, whether the call finished or was dropped.
    pub released: Option<Instant>,
    /// What was asked for.
    pub call: Call,
}

/// Records every call; optionally fails or stalls on demand.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    /// Calls in start order.
    calls: Mutex<Vec<Recorded>>,
    /// When set every call fails after recording.
    failing: AtomicBool,
    /// Extra time added to every call.
    stall: Mutex<Duration>,
    /// Last keyword passed to `set_window_keyword`.
    keyword: Mutex<String>,
}

impl RecordingBackend {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded calls.
    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    /// Just the calls, without timing.
    pub fn ops(&self) -> Vec<Call> {
        self.calls.lock().iter().map(|r| r.call.clone()).collect()
    }

    /// Make every subsequent call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Add `stall` to every subsequent call's duration.
    pub fn set_stall(&self, stall: Duration) {
        *self.stall.lock() = stall;
    }

    /// Keyword last pushed by the dispatcher.
    pub fn window_keyword(&self) -> String {
        self.keyword.lock().clone()
    }

    /// Record `call`, wait `busy`, then mark it finished.
    async fn record(&self, call: Call, busy: Duration) -> Result<()> {
        let idx = {
            let mut calls = self.calls.lock();
            calls.push(Recorded {
                started: Instant::now(),
                finished: None,
                released: None,
                call,
            });
            calls.len() - 1
        };
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Input("recording backend set to fail".into()));
        }
        let _held = ReleaseGuard::new(|| {
            if let Some(r) = self.calls.lock().get_mut(idx) {
                r.released = Some(Instant::now());
            }
        });
        let stall = *self.stall.lock();
        tokio::time::sleep(busy.saturating_add(stall)).await;
        if let Some(r) = self.calls.lock().get_mut(idx) {
            r.finished = Some(Instant::now());
        }
        Ok(())
    }
}

#[async_trait]
impl InjectionBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn hold_key(&self, key: &str, duration: Duration) -> Result<()> {
        let target = Target::Key(key.to_string());
        self.record(Call::Hold { target, duration }, duration).await
    }

    async fn mouse_hold(&self, button: MouseButton, duration: Duration) -> Result<()> {
        let target = Target::Mouse(button);
        self.record(Call::Hold { target, duration }, duration).await
    }

    async fn tap_repeat(
        &self,
        target: &Target,
        interval: Duration,
        total: Duration,
    ) -> Result<()> {
        let call = Call::TapRepeat {
            target: target.clone(),
            interval,
            total,
        };
        self.record(call, total).await
    }

    async fn tap_batch(&self, target: &Target, count: u32, spacing: Duration) -> Result<()> {
        let call = Call::Batch {
            target: target.clone(),
            count,
            spacing,
        };
        self.record(call, spacing.saturating_mul(count.saturating_sub(1)))
            .await
    }

    async fn run_sequence(&self, steps: &[Step]) -> Result<()> {
        self.record(Call::Sequence(steps.to_vec()), sequence_delay(steps))
            .await
    }

    fn set_window_keyword(&self, keyword: &str) {
        *self.keyword.lock() = keyword.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn holds_take_virtual_time() {
        let rec = RecordingBackend::new();
        let t0 = Instant::now();
        rec.hold(&Target::Mouse(MouseButton::Left), Duration::from_millis(250))
            .await
            .unwrap();
        let calls = rec.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].started, t0);
        assert_eq!(
            calls[0].finished,
            Some(t0 + Duration::from_millis(250))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failing_still_records() {
        let rec = RecordingBackend::new();
        rec.set_failing(true);
        assert!(rec.hold_key("a", Duration::from_secs(1)).await.is_err());
        assert_eq!(rec.calls().len(), 1);
        assert_eq!(rec.calls()[0].finished, None);
        assert_eq!(rec.calls()[0].released, None);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_still_releases() {
        let rec = RecordingBackend::new();
        rec.set_stall(Duration::from_secs(3600));
        let t0 = Instant::now();
        let hold = rec.hold_key("a", Duration::from_secs(1));
        assert!(
            tokio::time::timeout(Duration::from_secs(2), hold)
                .await
                .is_err()
        );
        let calls = rec.calls();
        assert_eq!(calls[0].finished, None);
        assert_eq!(calls[0].released, Some(t0 + Duration::from_secs(2)));
    }
}

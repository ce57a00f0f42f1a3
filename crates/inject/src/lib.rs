//! Posts synthetic key and mouse input to the focused application.
//!
//! Every backend implements [`InjectionBackend`], so the dispatcher can swap
//! between the OS key sender ([`NativeBackend`]) and generated AutoHotkey
//! scripts ([`ScriptBackend`]) at runtime. Tests use `RecordingBackend`
//! (feature `test-utils`), which records calls against the tokio clock.
#![warn(missing_docs)]
use std::time::Duration;

use async_trait::async_trait;

mod error;
mod guard;
mod native;
#[cfg(any(test, feature = "test-utils"))]
mod recording;
mod script;
mod target;

pub use error::{Error, Result};
pub use native::NativeBackend;
#[cfg(any(test, feature = "test-utils"))]
pub use recording::{Call, Recorded, RecordingBackend};
pub use script::{Dialect, ScriptBackend};
pub use target::{MouseButton, Step, Target, repeat_taps, sequence_delay};

/// A mechanism that performs simulated key and mouse input.
///
/// All calls return once the input has been fully delivered, including any
/// hold time, so callers can serialize executions by awaiting them.
#[async_trait]
pub trait InjectionBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Press `key`, hold for `duration`, release.
    async fn hold_key(&self, key: &str, duration: Duration) -> Result<()>;

    /// Press `button`, hold for `duration`, release.
    async fn mouse_hold(&self, button: MouseButton, duration: Duration) -> Result<()>;

    /// Tap `target` every `interval` for `total`, then send a safety release.
    async fn tap_repeat(&self, target: &Target, interval: Duration, total: Duration)
    -> Result<()>;

    /// Run sequence steps in order, honouring each step's delay.
    async fn run_sequence(&self, steps: &[Step]) -> Result<()>;

    /// Hold any target for `duration`.
    async fn hold(&self, target: &Target, duration: Duration) -> Result<()> {
        match target {
            Target::Key(k) => self.hold_key(k, duration).await,
            Target::Mouse(b) => self.mouse_hold(*b, duration).await,
        }
    }

    /// Fire `count` press/release pairs spaced by `spacing`.
    ///
    /// Backends that can submit the whole burst at once override this.
    async fn tap_batch(&self, target: &Target, count: u32, spacing: Duration) -> Result<()> {
        for i in 0..count {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            self.hold(target, Duration::ZERO).await?;
        }
        Ok(())
    }

    /// Update the window title keyword used for focus-targeted input.
    /// Backends without window targeting ignore it.
    fn set_window_keyword(&self, _keyword: &str) {}
}

//! OS-level key sender built on `enigo`.
//!
//! Enigo handles are created per call inside `spawn_blocking`; holds sleep on
//! the tokio clock between the press and release calls so no blocking thread
//! is parked for the duration. A hold whose future is dropped mid-way still
//! posts its release.
use std::time::Duration;

use async_trait::async_trait;
use enigo::{Button, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use tokio::runtime::Handle;
use tracing::{info, trace, warn};

use crate::{
    Error, InjectionBackend, MouseButton, Result, Step, Target, guard::ReleaseGuard, repeat_taps,
};

/// A resolved OS input.
#[derive(Debug, Clone, Copy)]
enum Press {
    /// Keyboard key.
    Key(Key),
    /// Mouse button.
    Button(Button),
}

impl Press {
    /// Resolve a target into an OS input.
    fn resolve(target: &Target) -> Result<Self> {
        match target {
            Target::Key(k) => os_key(k).map(Self::Key),
            Target::Mouse(b) => Ok(Self::Button(os_button(*b))),
        }
    }

    /// Post one direction of this input.
    fn post(self, enigo: &mut Enigo, dir: Direction) -> Result<()> {
        let res = match self {
            Self::Key(k) => enigo.key(k, dir),
            Self::Button(b) => enigo.button(b, dir),
        };
        res.map_err(|e| Error::Input(e.to_string()))
    }
}

/// Map a lowercase key name to an enigo key.
fn os_key(name: &str) -> Result<Key> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Ok(Key::Unicode(c));
    }
    let key = match name {
        "enter" | "return" => Key::Return,
        "space" => Key::Space,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "shift" => Key::Shift,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "meta" | "win" | "cmd" | "command" => Key::Meta,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        other => return Err(Error::UnknownKey(other.to_string())),
    };
    Ok(key)
}

/// Map a mouse button.
fn os_button(b: MouseButton) -> Button {
    match b {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
    }
}

/// Run `f` against a fresh enigo handle on the blocking pool.
async fn with_enigo<F>(f: F) -> Result<()>
where
    F: FnOnce(&mut Enigo) -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut enigo =
            Enigo::new(&Settings::default()).map_err(|e| Error::Input(e.to_string()))?;
        f(&mut enigo)
    })
    .await
    .map_err(|e| Error::Aborted(e.to_string()))?
}

/// Post a single direction.
async fn post(p: Press, dir: Direction) -> Result<()> {
    with_enigo(move |e| p.post(e, dir)).await
}

/// Post a release without awaiting it, for use from a drop.
fn release_detached(p: Press) {
    let Ok(handle) = Handle::try_current() else {
        return;
    };
    let _ignored = handle.spawn_blocking(move || {
        let released = Enigo::new(&Settings::default())
            .map_err(|e| Error::Input(e.to_string()))
            .and_then(|mut e| p.post(&mut e, Direction::Release));
        if let Err(e) = released {
            warn!(error = %e, "native_release_after_cancel_failed");
        }
    });
}

/// Post a press, returning a guard that releases it if the caller is dropped
/// before reaching [`release`].
async fn press(p: Press) -> Result<ReleaseGuard<impl FnOnce()>> {
    let guard = ReleaseGuard::new(move || release_detached(p));
    if let Err(e) = post(p, Direction::Press).await {
        guard.disarm();
        return Err(e);
    }
    Ok(guard)
}

/// Release a press taken with [`press`].
async fn release(p: Press, guard: ReleaseGuard<impl FnOnce()>) -> Result<()> {
    guard.disarm();
    post(p, Direction::Release).await
}

/// Injects input through the OS key sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    /// Create a native backend.
    pub fn new() -> Self {
        Self
    }

    /// Press, wait, release. The release is posted even if this future is
    /// dropped during the hold.
    async fn hold_press(&self, p: Press, duration: Duration) -> Result<()> {
        let held = press(p).await?;
        tokio::time::sleep(duration).await;
        release(p, held).await
    }

    /// Execute a single sequence step (after its delay).
    async fn step(&self, step: &Step) -> Result<()> {
        match step {
            Step::KeyTap { target, .. } => post(Press::resolve(target)?, Direction::Click).await,
            Step::KeyDown { target, .. } => post(Press::resolve(target)?, Direction::Press).await,
            Step::KeyUp { target, .. } => post(Press::resolve(target)?, Direction::Release).await,
            Step::Text { text, .. } => {
                let text = text.clone();
                with_enigo(move |e| e.text(&text).map_err(|e| Error::Input(e.to_string()))).await
            }
            Step::Wait { .. } => Ok(()),
            Step::Combo { targets, .. } => {
                let presses = targets
                    .iter()
                    .map(Press::resolve)
                    .collect::<Result<Vec<_>>>()?;
                with_enigo(move |e| {
                    for p in &presses {
                        p.post(e, Direction::Press)?;
                    }
                    for p in presses.iter().rev() {
                        p.post(e, Direction::Release)?;
                    }
                    Ok(())
                })
                .await
            }
        }
    }
}

#[async_trait]
impl InjectionBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn hold_key(&self, key: &str, duration: Duration) -> Result<()> {
        let p = Press::Key(os_key(key)?);
        trace!(key, ms = duration.as_millis() as u64, "native_hold_key");
        self.hold_press(p, duration).await?;
        info!(key, ms = duration.as_millis() as u64, "injected_key_hold");
        Ok(())
    }

    async fn mouse_hold(&self, button: MouseButton, duration: Duration) -> Result<()> {
        self.hold_press(Press::Button(os_button(button)), duration)
            .await?;
        info!(%button, ms = duration.as_millis() as u64, "injected_mouse_hold");
        Ok(())
    }

    async fn tap_repeat(
        &self,
        target: &Target,
        interval: Duration,
        total: Duration,
    ) -> Result<()> {
        let p = Press::resolve(target)?;
        let taps = repeat_taps(interval, total);
        let safety = ReleaseGuard::new(move || release_detached(p));
        for _ in 0..taps {
            post(p, Direction::Click).await?;
            tokio::time::sleep(interval).await;
        }
        release(p, safety).await?;
        info!(%target, taps, "injected_tap_repeat");
        Ok(())
    }

    async fn run_sequence(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            tokio::time::sleep(step.delay()).await;
            self.step(step).await?;
        }
        info!(steps = steps.len(), "injected_sequence");
        Ok(())
    }
}

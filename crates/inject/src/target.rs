//! What an action presses: a keyboard key or a mouse button, plus the typed
//! steps a sequence is made of.
use std::{fmt, time::Duration};

/// A mouse button reachable through a mapping alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Primary button.
    Left,
    /// Secondary button.
    Right,
}

impl MouseButton {
    /// Resolve a mouse alias (`right_click`, `mouse_right`, `rmouse`, ...).
    pub fn from_alias(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "left_click" | "mouse_left" | "lmouse" => Some(Self::Left),
            "right_click" | "mouse_right" | "rmouse" => Some(Self::Right),
            _ => None,
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Left => f.write_str("left_click"),
            Self::Right => f.write_str("right_click"),
        }
    }
}

/// The thing an action presses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A keyboard key, by lowercase name (`a`, `space`, `f5`).
    Key(String),
    /// A mouse button.
    Mouse(MouseButton),
}

impl Target {
    /// Parse a user-supplied key string. Returns `None` for an empty name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some(match MouseButton::from_alias(name) {
            Some(b) => Self::Mouse(b),
            None => Self::Key(name.to_ascii_lowercase()),
        })
    }

    /// True for keyboard targets.
    pub fn is_key(&self) -> bool {
        matches!(self, Self::Key(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Mouse(b) => b.fmt(f),
        }
    }
}

/// One resolved step of a macro sequence. Every step waits `delay` before
/// acting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Press and release.
    KeyTap {
        /// Key or mouse target.
        target: Target,
        /// Pause before the step.
        delay: Duration,
    },
    /// Press only.
    KeyDown {
        /// Key or mouse target.
        target: Target,
        /// Pause before the step.
        delay: Duration,
    },
    /// Release only.
    KeyUp {
        /// Key or mouse target.
        target: Target,
        /// Pause before the step.
        delay: Duration,
    },
    /// Type literal text.
    Text {
        /// Text to type.
        text: String,
        /// Pause before the step.
        delay: Duration,
    },
    /// Pause with no input.
    Wait {
        /// Pause length.
        delay: Duration,
    },
    /// Press all keys in order, then release them in reverse.
    Combo {
        /// Keys in press order.
        targets: Vec<Target>,
        /// Pause before the step.
        delay: Duration,
    },
}

impl Step {
    /// Pause that precedes this step.
    pub fn delay(&self) -> Duration {
        match self {
            Self::KeyTap { delay, .. }
            | Self::KeyDown { delay, .. }
            | Self::KeyUp { delay, .. }
            | Self::Text { delay, .. }
            | Self::Wait { delay }
            | Self::Combo { delay, .. } => *delay,
        }
    }
}

/// Total time a sequence spends in explicit delays.
pub fn sequence_delay(steps: &[Step]) -> Duration {
    steps.iter().map(Step::delay).sum()
}

/// Number of taps the repeat strategy sends for a hold of `total`.
pub fn repeat_taps(interval: Duration, total: Duration) -> u32 {
    let interval = interval.as_millis().max(1);
    let taps = total.as_millis() / interval;
    u32::try_from(taps).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mouse_aliases() {
        for alias in ["right_click", "mouse_right", "RMOUSE"] {
            assert_eq!(Target::parse(alias), Some(Target::Mouse(MouseButton::Right)));
        }
        for alias in ["left_click", "mouse_left", "lmouse"] {
            assert_eq!(Target::parse(alias), Some(Target::Mouse(MouseButton::Left)));
        }
        assert_eq!(Target::parse(" A "), Some(Target::Key("a".into())));
        assert_eq!(Target::parse("  "), None);
    }

    #[test]
    fn repeat_tap_count() {
        let ms = Duration::from_millis;
        assert_eq!(repeat_taps(ms(20), ms(300)), 15);
        assert_eq!(repeat_taps(ms(20), ms(5)), 1);
        assert_eq!(repeat_taps(ms(0), ms(3)), 3);
    }
}

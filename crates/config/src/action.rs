//! Typed gift actions, resolved once from the user-authored mapping.
use std::{collections::BTreeMap, time::Duration};

use giftkey_protocol::{GiftActionSpec, MappingSpec, SequenceStepSpec, StackingMode, StackingSpec};
use inject::{MouseButton, Step, Target};
use tracing::warn;

use crate::Error;

/// Hold time when a mapping gives none.
pub const DEFAULT_DURATION: Duration = Duration::from_millis(300);
/// Stack accumulation window when a mapping gives none.
pub const DEFAULT_STACK_WINDOW: Duration = Duration::from_millis(2000);

/// How a key or mouse press is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PressMode {
    /// Press, wait, release.
    #[default]
    Hold,
    /// Rapid taps for the duration. `interval` overrides the global default.
    Repeat {
        /// Per-action tap spacing.
        interval: Option<Duration>,
    },
}

/// The executable part of a gift action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A keyboard key press.
    KeyPress {
        /// Lowercase key name.
        key: String,
        /// Single-execution hold time.
        duration: Duration,
        /// Delivery strategy.
        mode: PressMode,
    },
    /// A mouse button press.
    MousePress {
        /// Button.
        button: MouseButton,
        /// Single-execution hold time.
        duration: Duration,
        /// Delivery strategy.
        mode: PressMode,
    },
    /// An ordered list of steps.
    Sequence(Vec<Step>),
}

impl Action {
    /// Press target for key and mouse actions.
    pub fn target(&self) -> Option<Target> {
        match self {
            Self::KeyPress { key, .. } => Some(Target::Key(key.clone())),
            Self::MousePress { button, .. } => Some(Target::Mouse(*button)),
            Self::Sequence(_) => None,
        }
    }

    /// Single-execution hold time for press actions.
    pub fn duration(&self) -> Duration {
        match self {
            Self::KeyPress { duration, .. } | Self::MousePress { duration, .. } => *duration,
            Self::Sequence(_) => Duration::ZERO,
        }
    }

    /// Press mode for press actions.
    pub fn press_mode(&self) -> PressMode {
        match self {
            Self::KeyPress { mode, .. } | Self::MousePress { mode, .. } => *mode,
            Self::Sequence(_) => PressMode::Hold,
        }
    }
}

/// Resolved stacking settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stacking {
    /// Sliding accumulation window.
    pub window: Duration,
    /// Flush immediately once the total exceeds this.
    pub max_stack: Option<u32>,
    /// Execution mode on flush.
    pub mode: StackingMode,
}

/// A fully resolved mapping entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftAction {
    /// What to execute.
    pub action: Action,
    /// Minimum spacing between executions.
    pub cooldown: Duration,
    /// Present only when stacking is enabled for this gift.
    pub stacking: Option<Stacking>,
}

/// Milliseconds to a duration. Negative and NaN values become zero; values
/// past `Duration::MAX` saturate.
fn millis(v: f64) -> Duration {
    if v > 0.0 {
        Duration::try_from_secs_f64(v / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Resolve a hold time, preferring `durationSec` over legacy `durationMs`.
pub fn resolve_duration(spec: &GiftActionSpec) -> Duration {
    match (spec.duration_sec, spec.duration_ms) {
        (Some(sec), _) if sec.is_finite() => millis(sec * 1000.0),
        (_, Some(ms)) if ms.is_finite() => millis(ms),
        _ => DEFAULT_DURATION,
    }
}

/// Resolve a stacking block; `None` unless enabled.
fn resolve_stacking(spec: Option<&StackingSpec>) -> Option<Stacking> {
    let spec = spec.filter(|s| s.enabled)?;
    Some(Stacking {
        window: spec
            .window_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STACK_WINDOW),
        max_stack: spec.max_stack.filter(|m| *m > 0),
        mode: spec.mode.unwrap_or_default(),
    })
}

/// Parse a step key, rejecting empty names.
fn step_target(key: &str) -> Result<Target, String> {
    Target::parse(key).ok_or_else(|| "sequence step has an empty key".to_string())
}

/// Resolve one sequence step.
pub fn resolve_step(spec: &SequenceStepSpec) -> Result<Step, String> {
    Ok(match spec {
        SequenceStepSpec::KeyTap { key, delay_ms } => Step::KeyTap {
            target: step_target(key)?,
            delay: millis(*delay_ms),
        },
        SequenceStepSpec::KeyDown { key, delay_ms } => Step::KeyDown {
            target: step_target(key)?,
            delay: millis(*delay_ms),
        },
        SequenceStepSpec::KeyUp { key, delay_ms } => Step::KeyUp {
            target: step_target(key)?,
            delay: millis(*delay_ms),
        },
        SequenceStepSpec::Text { text, delay_ms } => Step::Text {
            text: text.clone(),
            delay: millis(*delay_ms),
        },
        SequenceStepSpec::Wait { delay_ms } => Step::Wait {
            delay: millis(*delay_ms),
        },
        SequenceStepSpec::Combo { keys, delay_ms } => {
            if keys.is_empty() {
                return Err("combo step has no keys".into());
            }
            Step::Combo {
                targets: keys
                    .iter()
                    .map(|k| step_target(k))
                    .collect::<Result<_, _>>()?,
                delay: millis(*delay_ms),
            }
        }
    })
}

/// Resolve one user-authored action.
pub fn resolve_action(spec: &GiftActionSpec) -> Result<GiftAction, String> {
    let action = if spec.kind.as_deref() == Some("sequence") {
        let steps = spec
            .steps
            .as_deref()
            .ok_or_else(|| "sequence has no steps".to_string())?;
        Action::Sequence(steps.iter().map(resolve_step).collect::<Result<_, _>>()?)
    } else {
        let key = spec.key.as_deref().unwrap_or_default();
        let target = Target::parse(key).ok_or_else(|| "missing key".to_string())?;
        let mode = match spec.press_mode.as_deref() {
            None | Some("hold") => PressMode::Hold,
            Some("repeat") => PressMode::Repeat {
                interval: spec
                    .repeat_interval_ms
                    .map(millis)
                    .filter(|d| !d.is_zero()),
            },
            Some(other) => return Err(format!("unknown pressMode \"{other}\"")),
        };
        let duration = resolve_duration(spec);
        match target {
            Target::Key(key) => Action::KeyPress {
                key,
                duration,
                mode,
            },
            Target::Mouse(button) => Action::MousePress {
                button,
                duration,
                mode,
            },
        }
    };
    Ok(GiftAction {
        action,
        cooldown: spec.cooldown_ms.map(millis).unwrap_or_default(),
        stacking: resolve_stacking(spec.stacking.as_ref()),
    })
}

/// The active gift-name to action table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mapping {
    /// Entries by lowercased gift name.
    actions: BTreeMap<String, GiftAction>,
}

impl Mapping {
    /// Resolve every entry, skipping (and logging) entries that do not resolve.
    pub fn from_spec(spec: &MappingSpec) -> Self {
        let mut actions = BTreeMap::new();
        for (name, raw) in spec {
            match resolve_action(raw) {
                Ok(a) => {
                    actions.insert(name.trim().to_lowercase(), a);
                }
                Err(e) => warn!(gift = %name, error = %e, "mapping_entry_skipped"),
            }
        }
        Self { actions }
    }

    /// Resolve every entry, failing on the first entry that does not resolve.
    pub fn try_from_spec(spec: &MappingSpec) -> Result<Self, Error> {
        let mut actions = BTreeMap::new();
        for (name, raw) in spec {
            let a = resolve_action(raw).map_err(|e| Error::Validation {
                path: None,
                message: format!("gift \"{name}\": {e}"),
            })?;
            actions.insert(name.trim().to_lowercase(), a);
        }
        Ok(Self { actions })
    }

    /// Look up a gift by lowercased name.
    pub fn get(&self, gift: &str) -> Option<&GiftAction> {
        self.actions.get(gift)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

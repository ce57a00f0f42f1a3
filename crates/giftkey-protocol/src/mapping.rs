//! User-authored mapping shapes as they travel over the wire and on disk.
//!
//! These are deliberately loose: numbers may arrive as floats, optional fields
//! may be absent, and legacy fields (`durationMs`) coexist with newer ones
//! (`durationSec`). The `config` crate resolves them into typed actions once,
//! at mapping-update time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Gift name (lowercased) to action mapping, replaced wholesale on update.
pub type MappingSpec = BTreeMap<String, GiftActionSpec>;

/// How a flushed gift stack is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackingMode {
    /// One press-hold lasting `single duration * count`.
    #[default]
    CumulativeHold,
    /// The single action repeated `count` times with a short pause between.
    Sequential,
    /// `count` press/release pairs fired back-to-back.
    Batch,
}

impl StackingMode {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CumulativeHold => "cumulative_hold",
            Self::Sequential => "sequential",
            Self::Batch => "batch",
        }
    }
}

/// Per-gift stacking configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackingSpec {
    /// Stacking is opt-in per gift.
    #[serde(default)]
    pub enabled: bool,
    /// Accumulation window; defaults to 2000ms when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    /// Flush immediately once the total exceeds this; `0` or absent disables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stack: Option<u32>,
    /// Execution mode on flush.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<StackingMode>,
}

/// One step of a user-authored sequence, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SequenceStepSpec {
    /// Press and release a key.
    KeyTap {
        /// Key name.
        #[serde(default)]
        key: String,
        /// Delay before this step.
        #[serde(default)]
        delay_ms: f64,
    },
    /// Press a key without releasing it.
    KeyDown {
        /// Key name.
        #[serde(default)]
        key: String,
        /// Delay before this step.
        #[serde(default)]
        delay_ms: f64,
    },
    /// Release a previously pressed key.
    KeyUp {
        /// Key name.
        #[serde(default)]
        key: String,
        /// Delay before this step.
        #[serde(default)]
        delay_ms: f64,
    },
    /// Type literal text.
    Text {
        /// Text to type.
        #[serde(default)]
        text: String,
        /// Delay before this step.
        #[serde(default)]
        delay_ms: f64,
    },
    /// Pause only.
    Wait {
        /// Pause length.
        #[serde(default)]
        delay_ms: f64,
    },
    /// Press keys in order, release in reverse.
    Combo {
        /// Key names.
        #[serde(default)]
        keys: Vec<String>,
        /// Delay before this step.
        #[serde(default)]
        delay_ms: f64,
    },
}

/// A gift action as authored by the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftActionSpec {
    /// Key name or mouse alias (`right_click`, `lmouse`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Legacy hold duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    /// Hold duration in seconds; preferred over `durationMs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    /// Minimum spacing between executions of this gift.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ms: Option<f64>,
    /// Optional stacking behaviour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacking: Option<StackingSpec>,
    /// `"sequence"` marks a step sequence.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Sequence steps (only with `type: "sequence"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<SequenceStepSpec>>,
    /// `"repeat"` selects rapid taps instead of a hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub press_mode: Option<String>,
    /// Tap spacing for the repeat strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_ms: Option<f64>,
}

/// "Every `threshold` likes, hold `key`".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeTrigger {
    /// Optional client-side identifier, echoed back untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Like count step; zero disables the trigger.
    pub threshold: u64,
    /// Key to hold.
    pub key: String,
    /// Hold duration; defaults to 300ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_mapping() {
        let json = r#"{
            "rose": {"key": "a", "durationSec": 1, "cooldownMs": 0},
            "galaxy": {"type": "sequence", "steps": [
                {"kind": "keyTap", "key": "w", "delayMs": 10},
                {"kind": "wait", "delayMs": 200},
                {"kind": "combo", "keys": ["ctrl", "c"]}
            ]},
            "tiktok": {"key": "rmouse", "durationMs": 250,
                       "stacking": {"enabled": true, "windowMs": 1500,
                                    "maxStack": 5, "mode": "batch"}}
        }"#;
        let m: MappingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(m["rose"].duration_sec, Some(1.0));
        assert_eq!(m["galaxy"].kind.as_deref(), Some("sequence"));
        let steps = m["galaxy"].steps.as_ref().unwrap();
        assert_eq!(steps.len(), 3);
        assert!(matches!(&steps[1], SequenceStepSpec::Wait { delay_ms } if *delay_ms == 200.0));
        let stacking = m["tiktok"].stacking.as_ref().unwrap();
        assert_eq!(stacking.mode, Some(StackingMode::Batch));
        assert_eq!(stacking.max_stack, Some(5));
    }

    #[test]
    fn unknown_stacking_mode_is_rejected() {
        let json = r#"{"enabled": true, "mode": "sideways"}"#;
        assert!(serde_json::from_str::<StackingSpec>(json).is_err());
    }
}

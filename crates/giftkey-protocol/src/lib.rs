//! Observer protocol shared by the giftkey engine, server and UI clients.
//!
//! Every message is a JSON object tagged by `type` (kebab-case) with camelCase
//! fields, so a browser client can consume it without a schema.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

mod mapping;

pub use mapping::{
    GiftActionSpec, LikeTrigger, MappingSpec, SequenceStepSpec, StackingMode, StackingSpec,
};

/// Lifecycle of the live-event producer connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No producer, or the producer went away.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The producer is delivering events.
    Connected,
    /// The last connect attempt failed.
    Error,
}

/// Point-in-time view of the connection, as broadcast to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Lifecycle state.
    pub status: ConnectionStatus,
    /// Account being followed, if any.
    pub username: Option<String>,
    /// Why the last attempt failed, set only in `Error`.
    pub error: Option<String>,
    /// Whether the broadcast is currently live.
    pub is_live: bool,
}

/// Which injection backend and press strategy is active.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InjectionMode {
    /// OS key sender, press-hold-release.
    #[default]
    #[serde(rename = "nodesender", alias = "nutjs")]
    KeySender,
    /// OS key sender, rapid taps for the hold duration.
    #[serde(rename = "nodesender_repeat")]
    KeySenderRepeat,
    /// Generated AutoHotkey scripts.
    #[serde(rename = "autohotkey")]
    AutoHotkey,
}

impl InjectionMode {
    /// Stable wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeySender => "nodesender",
            Self::KeySenderRepeat => "nodesender_repeat",
            Self::AutoHotkey => "autohotkey",
        }
    }

    /// Parse a mode name, case-insensitively.
    pub fn try_from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nodesender" | "nutjs" => Some(Self::KeySender),
            "nodesender_repeat" => Some(Self::KeySenderRepeat),
            "autohotkey" => Some(Self::AutoHotkey),
            _ => None,
        }
    }
}

impl fmt::Display for InjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InjectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_str(s).ok_or_else(|| format!("unknown injection mode: {s}"))
    }
}

/// A gift seen live, recorded the first time its name appears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogGift {
    /// Vendor gift id, or the lowercased name when the feed has none.
    pub id: String,
    /// Display name as first seen.
    pub name: String,
    /// Gift artwork.
    pub image_url: Option<String>,
    /// Coin value of one gift.
    pub diamond_count: u64,
    /// Milliseconds since the Unix epoch.
    pub last_seen: u64,
}

/// IPC-related helpers: channel aliases and message codec.
pub mod ipc {
    use super::MsgToObserver;

    /// Tokio unbounded sender for observer messages.
    pub type ObserverTx = tokio::sync::mpsc::UnboundedSender<MsgToObserver>;
    /// Tokio unbounded receiver for observer messages.
    pub type ObserverRx = tokio::sync::mpsc::UnboundedReceiver<MsgToObserver>;

    /// Create a standard unbounded observer channel (sender, receiver).
    pub fn observer_channel() -> (ObserverTx, ObserverRx) {
        tokio::sync::mpsc::unbounded_channel::<MsgToObserver>()
    }

    /// JSON text codec used on the WebSocket.
    pub mod codec;
}

/// Messages pushed from the engine to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum MsgToObserver {
    /// Full state snapshot sent to every newly joined observer.
    Init {
        /// Active mapping as last received.
        mapping: MappingSpec,
        /// Global pause flag.
        paused: bool,
        /// Active injection mode.
        injection_mode: InjectionMode,
        /// Likes counted this session.
        total_likes: u64,
        /// Producer connection state.
        connection_status: ConnectionStatus,
        /// Account being followed, if any.
        username: Option<String>,
        /// Last connection error, if any.
        connection_error: Option<String>,
        /// Whether the broadcast is live.
        is_live: bool,
        /// Global stacking switch.
        stacking_enabled: bool,
        /// Focus guard keyword; empty disables the guard.
        target_window_keyword: String,
        /// Server-side like triggers.
        like_triggers: Vec<LikeTrigger>,
    },
    /// A normalized gift event (after streak suppression).
    Gift {
        /// Gift display name.
        gift_name: String,
        /// Sender unique id or nickname, `Unknown` when neither is set.
        sender: String,
        /// Gift artwork.
        image_url: Option<String>,
        /// Milliseconds since the Unix epoch.
        ts: u64,
        /// New gifts since the previous tick of this streak.
        count_inc: u32,
        /// Coin value of one gift.
        diamond_count: u64,
    },
    /// Like tally update.
    Like {
        /// Likes in this event.
        like_count: u64,
        /// Likes counted this session.
        total_likes: u64,
    },
    /// Connection state changed.
    ConnectionStatus {
        /// Lifecycle state.
        status: ConnectionStatus,
        /// Account being followed, if any.
        username: Option<String>,
        /// Why the last attempt failed.
        error: Option<String>,
        /// Whether the broadcast is live.
        is_live: bool,
    },
    /// Reply to a successful `connect-tiktok`.
    ConnectionSuccess {
        /// Account now followed.
        username: String,
    },
    /// Reply to a rejected `connect-tiktok`.
    ConnectionError {
        /// Reason for the rejection.
        error: String,
    },
    /// The streamer ended the broadcast.
    StreamEnd {
        /// Connection state after the stream ended.
        connection_status: ConnectionStatus,
        /// Account that was followed.
        username: Option<String>,
        /// Always false once the stream has ended.
        is_live: bool,
    },
    /// The mapping was replaced.
    MappingUpdated {
        /// New mapping.
        mapping: MappingSpec,
    },
    /// The pause flag changed.
    PauseUpdated {
        /// New pause flag.
        paused: bool,
    },
    /// A stack grew; `count` is the running total.
    GiftStackUpdate {
        /// Stacked gift.
        gift_name: String,
        /// Gifts accumulated so far.
        count: u32,
        /// Quiet time before the stack flushes.
        window_ms: u64,
    },
    /// A stack flushed. Sent even when the flush was skipped while paused.
    GiftStackComplete {
        /// Stacked gift.
        gift_name: String,
        /// Gifts in the stack.
        count: u32,
        /// How the stack was executed.
        mode: StackingMode,
    },
    /// The focus guard blocked a macro.
    FocusWarning {
        /// Keyword the focused window should contain.
        expected: String,
        /// Title of the focused window, if known.
        active_title: Option<String>,
        /// Owning application of the focused window, if known.
        active_owner: Option<String>,
    },
    /// Global stacking was switched.
    StackingModeUpdated {
        /// New stacking switch.
        enabled: bool,
    },
    /// The injection mode changed.
    InjectionModeUpdated {
        /// New mode.
        mode: InjectionMode,
    },
    /// The focus guard keyword changed.
    TargetWindowUpdated {
        /// New keyword, lowercased; empty disables the guard.
        keyword: String,
    },
    /// The like triggers were replaced.
    LikeTriggersUpdated {
        /// New triggers.
        triggers: Vec<LikeTrigger>,
    },
    /// Reply to `reset-like-counts`.
    ResetSuccess {
        /// Human-readable confirmation.
        message: String,
    },
    /// Reply to `get-gift-catalog`.
    GiftCatalog {
        /// Every gift seen this session.
        gifts: Vec<CatalogGift>,
    },
}

impl MsgToObserver {
    /// Wire tag of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Gift { .. } => "gift",
            Self::Like { .. } => "like",
            Self::ConnectionStatus { .. } => "connection-status",
            Self::ConnectionSuccess { .. } => "connection-success",
            Self::ConnectionError { .. } => "connection-error",
            Self::StreamEnd { .. } => "stream-end",
            Self::MappingUpdated { .. } => "mapping-updated",
            Self::PauseUpdated { .. } => "pause-updated",
            Self::GiftStackUpdate { .. } => "gift-stack-update",
            Self::GiftStackComplete { .. } => "gift-stack-complete",
            Self::FocusWarning { .. } => "focus-warning",
            Self::StackingModeUpdated { .. } => "stacking-mode-updated",
            Self::InjectionModeUpdated { .. } => "injection-mode-updated",
            Self::TargetWindowUpdated { .. } => "target-window-updated",
            Self::LikeTriggersUpdated { .. } => "like-triggers-updated",
            Self::ResetSuccess { .. } => "reset-success",
            Self::GiftCatalog { .. } => "gift-catalog",
        }
    }

    /// Build a `connection-status` message from a snapshot.
    pub fn connection_status(snap: &ConnectionSnapshot) -> Self {
        Self::ConnectionStatus {
            status: snap.status,
            username: snap.username.clone(),
            error: snap.error.clone(),
            is_live: snap.is_live,
        }
    }
}

/// Messages received from observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum MsgFromObserver {
    /// Replace the whole gift mapping.
    UpdateMapping {
        /// New mapping.
        #[serde(default)]
        mapping: MappingSpec,
    },
    /// Set the global pause flag.
    TogglePause {
        /// New pause flag.
        #[serde(default)]
        paused: bool,
    },
    /// Simulate a gift from `TestUser`, optionally delayed.
    TestGift {
        /// Gift to simulate.
        #[serde(default)]
        gift_name: String,
        /// Delay before the gift arrives.
        #[serde(default)]
        delay_ms: u64,
    },
    /// Fire a like trigger's key as if its threshold was reached.
    TestLikeTrigger {
        /// Key to hold.
        #[serde(default)]
        trigger_key: Option<String>,
        /// Threshold being simulated; zero or absent ignores the request.
        #[serde(default)]
        target_likes: Option<u64>,
    },
    /// Follow a live account, replacing any current connection.
    ConnectTiktok {
        /// Account to follow.
        #[serde(default)]
        username: String,
    },
    /// Drop the live connection.
    DisconnectTiktok,
    /// Ask for a `connection-status` reply.
    GetConnectionStatus,
    /// Hold a key because a client-side like rule fired.
    LikeKey {
        /// Key to hold.
        #[serde(default)]
        key: String,
        /// Hold time; zero or absent uses the default.
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    /// Switch the injection mode; unknown names are ignored.
    SetInjectionMode {
        /// Mode wire name.
        #[serde(default)]
        mode: String,
    },
    /// Switch stacking globally; disabling flushes pending stacks.
    SetStackingMode {
        /// New stacking switch.
        #[serde(default)]
        enabled: bool,
    },
    /// Set the focus guard keyword.
    SetTargetWindow {
        /// Keyword; empty disables the guard.
        #[serde(default)]
        keyword: String,
    },
    /// Replace the server-side like triggers.
    UpdateLikeTriggers {
        /// New triggers.
        #[serde(default)]
        triggers: Vec<LikeTrigger>,
    },
    /// Zero the like tally and trigger progress.
    ResetLikeCounts,
    /// Ask for a `gift-catalog` reply.
    GetGiftCatalog,
}

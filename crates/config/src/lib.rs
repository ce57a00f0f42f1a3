//! Gift mapping resolution, mapping files and runtime settings used by giftkey.
#![warn(unsafe_op_in_unsafe_fn)]

use std::{
    env,
    path::{Path, PathBuf},
};

mod action;
mod error;
mod loader;
mod settings;

pub use action::{
    Action, DEFAULT_DURATION, DEFAULT_STACK_WINDOW, GiftAction, Mapping, PressMode, Stacking,
    resolve_action, resolve_duration, resolve_step,
};
pub use error::{Error, excerpt_at};
pub use loader::{LoadedMapping, load_mapping_from_path, load_mapping_from_str};
pub use settings::{
    DEFAULT_FEED_URL, DEFAULT_INJECT_GRACE, DEFAULT_REPEAT_INTERVAL, DEFAULT_WS_PORT,
    MIN_REPEAT_INTERVAL, Settings,
};

/// Determine the preferred mapping path (`~/.giftkey/mapping.json`).
pub fn default_mapping_path() -> PathBuf {
    let mut p = PathBuf::from(env::var_os("HOME").unwrap_or_default());
    p.push(".giftkey");
    p.push("mapping.json");
    p
}

/// Resolve the effective mapping path.
///
/// Policy:
/// 1) Use `explicit` when provided.
/// 2) Else use `~/.giftkey/mapping.json` when it exists.
/// 3) Else start with an empty mapping (`None`); observers supply one later.
pub fn resolve_mapping_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let preferred = default_mapping_path();
    preferred.exists().then_some(preferred)
}

//! Runtime settings resolved from the environment.
use std::{env, path::PathBuf, str::FromStr, time::Duration};

use giftkey_protocol::InjectionMode;

use crate::Error;

/// Default observer WebSocket port.
pub const DEFAULT_WS_PORT: u16 = 5178;
/// Default tap spacing for the repeat strategy.
pub const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_millis(20);
/// Floor applied to any repeat interval.
pub const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(5);
/// Default extra time allowed for an injection call beyond its nominal length.
pub const DEFAULT_INJECT_GRACE: Duration = Duration::from_millis(5000);
/// Default producer endpoint; `{username}` is substituted on connect.
pub const DEFAULT_FEED_URL: &str = "ws://127.0.0.1:5179/live/{username}";

/// Process-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Observer WebSocket port (`WS_PORT`).
    pub ws_port: u16,
    /// Initial injection mode (`INJECTION_MODE`).
    pub injection_mode: InjectionMode,
    /// Initial focus-guard keyword (`TARGET_WINDOW_KEYWORD`).
    pub target_window_keyword: String,
    /// Global repeat interval override (`REPEAT_INTERVAL_MS`).
    pub repeat_interval: Option<Duration>,
    /// AutoHotkey interpreter (`AHK_PATH`).
    pub ahk_path: PathBuf,
    /// Account to auto-connect to at start (`TIKTOK_USERNAME`).
    pub username: Option<String>,
    /// Producer endpoint template (`FEED_URL`).
    pub feed_url: String,
    /// Whether stacking starts enabled (`STACKING_ENABLED`).
    pub stacking_enabled: bool,
    /// Injection timeout grace (`INJECT_TIMEOUT_GRACE_MS`).
    pub inject_grace: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ws_port: DEFAULT_WS_PORT,
            injection_mode: InjectionMode::default(),
            target_window_keyword: String::new(),
            repeat_interval: None,
            ahk_path: PathBuf::from("AutoHotkey.exe"),
            username: None,
            feed_url: DEFAULT_FEED_URL.to_string(),
            stacking_enabled: true,
            inject_grace: DEFAULT_INJECT_GRACE,
        }
    }
}

/// Parse an optional variable, naming it in the error.
fn parse_var<T: FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, Error> {
    let Some(raw) = raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    raw.parse().map(Some).map_err(|_| Error::Validation {
        path: None,
        message: format!("{name}: invalid value \"{raw}\""),
    })
}

/// Parse a boolean flag in the usual spellings.
fn parse_bool(name: &str, raw: Option<String>) -> Result<Option<bool>, Error> {
    let Some(raw) = raw else { return Ok(None) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(Error::Validation {
            path: None,
            message: format!("{name}: invalid value \"{raw}\""),
        }),
    }
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Resolve settings using `lookup` for variable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut s = Self::default();
        if let Some(port) = parse_var("WS_PORT", lookup("WS_PORT"))? {
            s.ws_port = port;
        }
        if let Some(mode) = lookup("INJECTION_MODE").filter(|m| !m.trim().is_empty()) {
            s.injection_mode = InjectionMode::try_from_str(&mode).ok_or(Error::Validation {
                path: None,
                message: format!("INJECTION_MODE: unknown mode \"{mode}\""),
            })?;
        }
        if let Some(kw) = lookup("TARGET_WINDOW_KEYWORD") {
            s.target_window_keyword = kw.trim().to_string();
        }
        s.repeat_interval =
            parse_var::<u64>("REPEAT_INTERVAL_MS", lookup("REPEAT_INTERVAL_MS"))?
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis);
        if let Some(p) = lookup("AHK_PATH").filter(|p| !p.trim().is_empty()) {
            s.ahk_path = PathBuf::from(p.trim());
        }
        s.username = lookup("TIKTOK_USERNAME")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        if let Some(url) = lookup("FEED_URL").filter(|u| !u.trim().is_empty()) {
            s.feed_url = url.trim().to_string();
        }
        if let Some(on) = parse_bool("STACKING_ENABLED", lookup("STACKING_ENABLED"))? {
            s.stacking_enabled = on;
        }
        if let Some(ms) = parse_var("INJECT_TIMEOUT_GRACE_MS", lookup("INJECT_TIMEOUT_GRACE_MS"))? {
            s.inject_grace = Duration::from_millis(ms);
        }
        Ok(s)
    }

    /// Tap spacing for the repeat strategy: the global override, else the
    /// action's own interval, else the default, never below the floor.
    pub fn repeat_interval_for(&self, action: Option<Duration>) -> Duration {
        self.repeat_interval
            .or(action)
            .unwrap_or(DEFAULT_REPEAT_INTERVAL)
            .max(MIN_REPEAT_INTERVAL)
    }

    /// Producer endpoint for `username`.
    pub fn feed_url_for(&self, username: &str) -> String {
        self.feed_url.replace("{username}", username)
    }
}

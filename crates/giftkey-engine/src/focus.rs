//! Focus guard: is the intended target window in front?
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task;
use tracing::{debug, trace};

/// Result of a focus check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusReport {
    /// Whether input may be sent.
    pub ok: bool,
    /// Active window title, when known.
    pub title: Option<String>,
    /// Active window owner (application), when known.
    pub owner: Option<String>,
}

impl FocusReport {
    /// A passing report with no window details.
    pub fn pass() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }
}

/// Answers whether the active window matches a title keyword.
///
/// Implementations never fail: detection problems report `ok`.
#[async_trait]
pub trait FocusChecker: Send + Sync {
    /// Check the active window against `keyword`. An empty keyword always passes.
    async fn check(&self, keyword: &str) -> FocusReport;
}

/// Case-insensitive substring match over `"{title} {owner}"`.
pub fn window_matches(keyword: &str, title: &str, owner: &str) -> bool {
    let needle = keyword.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    format!("{title} {owner}").to_lowercase().contains(&needle)
}

/// Queries the OS for the foreground window.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActiveWindowChecker;

#[async_trait]
impl FocusChecker for ActiveWindowChecker {
    async fn check(&self, keyword: &str) -> FocusReport {
        if keyword.trim().is_empty() {
            return FocusReport::pass();
        }
        let active = task::spawn_blocking(active_win_pos_rs::get_active_window).await;
        match active {
            Ok(Ok(win)) => {
                let ok = window_matches(keyword, &win.title, &win.app_name);
                trace!(ok, title = %win.title, owner = %win.app_name, "focus_check");
                FocusReport {
                    ok,
                    title: Some(win.title),
                    owner: Some(win.app_name),
                }
            }
            Ok(Err(())) => {
                debug!("focus_check_unavailable_fail_open");
                FocusReport::pass()
            }
            Err(e) => {
                debug!(error = %e, "focus_check_join_failed_fail_open");
                FocusReport::pass()
            }
        }
    }
}

/// A checker that reports a fixed window; for tests and headless runs.
#[derive(Debug, Default)]
pub struct FixedFocus {
    /// `(title, owner)` of the pretend active window; `None` always passes.
    window: Mutex<Option<(String, String)>>,
}

impl FixedFocus {
    /// A checker that always passes.
    pub fn always_ok() -> Self {
        Self::default()
    }

    /// A checker whose active window is `title` owned by `owner`.
    pub fn window(title: &str, owner: &str) -> Self {
        let this = Self::default();
        this.set_window(title, owner);
        this
    }

    /// Change the pretend active window.
    pub fn set_window(&self, title: &str, owner: &str) {
        *self.window.lock() = Some((title.to_string(), owner.to_string()));
    }
}

#[async_trait]
impl FocusChecker for FixedFocus {
    async fn check(&self, keyword: &str) -> FocusReport {
        match self.window.lock().clone() {
            None => FocusReport::pass(),
            Some((title, owner)) => FocusReport {
                ok: window_matches(keyword, &title, &owner),
                title: Some(title),
                owner: Some(owner),
            },
        }
    }
}

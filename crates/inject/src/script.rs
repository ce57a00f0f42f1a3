//! AutoHotkey script backend.
//!
//! Each injection renders a small script, writes it to the temp directory and
//! runs it with the configured interpreter. Scripts are rendered for AHK v2
//! first; if that interpreter run fails, the same ops are re-rendered in v1
//! syntax and tried once more. When a window keyword is set, the script
//! activates the first window whose title contains it before sending input.
use std::{
    env, fs,
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use crate::{Error, InjectionBackend, MouseButton, Result, Step, Target, repeat_taps};

/// AutoHotkey syntax generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// AutoHotkey v2 expression syntax.
    V2,
    /// Legacy AutoHotkey v1 command syntax.
    V1,
}

/// A script operation, rendered per dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    /// `{K down}`
    Down(String),
    /// `{K up}`
    Up(String),
    /// `{K}`
    Tap(String),
    /// Pause in milliseconds.
    Sleep(u64),
    /// Literal text.
    Text(String),
    /// Repeat a body.
    Loop(u32, Vec<Self>),
}

/// AutoHotkey name for a target.
fn ahk_key(target: &Target) -> String {
    let name = match target {
        Target::Mouse(MouseButton::Left) => return "LButton".into(),
        Target::Mouse(MouseButton::Right) => return "RButton".into(),
        Target::Key(k) => k.as_str(),
    };
    let mapped = match name {
        "enter" | "return" => "Enter",
        "space" => "Space",
        "tab" => "Tab",
        "esc" | "escape" => "Esc",
        "backspace" => "Backspace",
        "delete" | "del" => "Delete",
        "up" => "Up",
        "down" => "Down",
        "left" => "Left",
        "right" => "Right",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PgUp",
        "pagedown" => "PgDn",
        "shift" => "Shift",
        "ctrl" | "control" => "Ctrl",
        "alt" => "Alt",
        "meta" | "win" | "cmd" | "command" => "LWin",
        f if f.len() > 1 && f.starts_with('f') && f[1..].parse::<u8>().is_ok() => {
            return f.to_ascii_uppercase();
        }
        other => other,
    };
    mapped.to_string()
}

/// Escape a v2 double-quoted string literal.
fn quote_v2(s: &str) -> String {
    let escaped = s.replace('`', "``").replace('"', "`\"");
    format!("\"{escaped}\"")
}

/// Escape a v1 command argument.
fn escape_v1(s: &str) -> String {
    s.replace('`', "``").replace(',', "`,").replace('%', "`%")
}

/// Append rendered ops at `indent`.
fn render_ops(lines: &mut Vec<String>, dialect: Dialect, ops: &[Op], indent: usize) {
    let pad = "    ".repeat(indent);
    for op in ops {
        let line = match (op, dialect) {
            (Op::Down(k), Dialect::V2) => format!("Send \"{{{k} down}}\""),
            (Op::Down(k), Dialect::V1) => format!("Send, {{{k} down}}"),
            (Op::Up(k), Dialect::V2) => format!("Send \"{{{k} up}}\""),
            (Op::Up(k), Dialect::V1) => format!("Send, {{{k} up}}"),
            (Op::Tap(k), Dialect::V2) => format!("Send \"{{{k}}}\""),
            (Op::Tap(k), Dialect::V1) => format!("Send, {{{k}}}"),
            (Op::Sleep(ms), Dialect::V2) => format!("Sleep {ms}"),
            (Op::Sleep(ms), Dialect::V1) => format!("Sleep, {ms}"),
            (Op::Text(t), Dialect::V2) => format!("SendText {}", quote_v2(t)),
            (Op::Text(t), Dialect::V1) => format!("SendRaw, {}", escape_v1(t)),
            (Op::Loop(n, body), Dialect::V2) => {
                lines.push(format!("{pad}Loop {n} {{"));
                render_ops(lines, dialect, body, indent + 1);
                "}".to_string()
            }
            (Op::Loop(n, body), Dialect::V1) => {
                lines.push(format!("{pad}Loop, {n}"));
                lines.push(format!("{pad}{{"));
                render_ops(lines, dialect, body, indent + 1);
                "}".to_string()
            }
        };
        lines.push(format!("{pad}{line}"));
    }
}

/// Render a complete script.
fn render(dialect: Dialect, window_keyword: &str, ops: &[Op]) -> String {
    let mut lines = vec!["#SingleInstance Force".to_string()];
    let kw = window_keyword.trim();
    match dialect {
        Dialect::V2 => {
            lines.push("SendMode \"Input\"".into());
            lines.push("SetKeyDelay -1, -1".into());
            if !kw.is_empty() {
                lines.push("SetTitleMatchMode 2".into());
                lines.push(format!("title := {}", quote_v2(kw)));
                lines.push("h := WinExist(title)".into());
                lines.push("if (h) {".into());
                lines.push("    WinActivate \"ahk_id \" h".into());
                lines.push("    WinWaitActive \"ahk_id \" h,, 1".into());
                lines.push("}".into());
            }
        }
        Dialect::V1 => {
            lines.push("SetTitleMatchMode, 2".into());
            lines.push("SendMode, Input".into());
            lines.push("SetKeyDelay, -1, -1".into());
            if !kw.is_empty() {
                let kw = escape_v1(kw);
                lines.push(format!("IfWinExist, {kw}"));
                lines.push("{".into());
                lines.push(format!("    WinActivate, {kw}"));
                lines.push(format!("    WinWaitActive, {kw},, 1"));
                lines.push("}".into());
            }
        }
    }
    render_ops(&mut lines, dialect, ops, 0);
    lines.push("ExitApp".into());
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Milliseconds, saturating.
fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Script ops for a sequence.
fn sequence_ops(steps: &[Step]) -> Vec<Op> {
    let mut ops = Vec::new();
    for step in steps {
        let delay = ms(step.delay());
        if delay > 0 {
            ops.push(Op::Sleep(delay));
        }
        match step {
            Step::KeyTap { target, .. } => ops.push(Op::Tap(ahk_key(target))),
            Step::KeyDown { target, .. } => ops.push(Op::Down(ahk_key(target))),
            Step::KeyUp { target, .. } => ops.push(Op::Up(ahk_key(target))),
            Step::Text { text, .. } => ops.push(Op::Text(text.clone())),
            Step::Wait { .. } => {}
            Step::Combo { targets, .. } => {
                let keys: Vec<String> = targets.iter().map(ahk_key).collect();
                ops.extend(keys.iter().cloned().map(Op::Down));
                ops.extend(keys.into_iter().rev().map(Op::Up));
            }
        }
    }
    ops
}

/// Injects input by generating and running AutoHotkey scripts.
#[derive(Debug)]
pub struct ScriptBackend {
    /// Interpreter executable.
    ahk_path: PathBuf,
    /// Window title keyword; empty means "whatever is focused".
    window_keyword: RwLock<String>,
}

/// Distinguishes temp files across every backend in the process.
static SCRIPT_SEQ: AtomicU64 = AtomicU64::new(0);

impl ScriptBackend {
    /// Create a backend running scripts with the interpreter at `ahk_path`.
    pub fn new(ahk_path: impl Into<PathBuf>) -> Self {
        Self {
            ahk_path: ahk_path.into(),
            window_keyword: RwLock::new(String::new()),
        }
    }

    /// Builder-style window keyword.
    pub fn with_window_keyword(self, keyword: &str) -> Self {
        *self.window_keyword.write() = keyword.to_string();
        self
    }

    /// Render `ops` in both dialects and run them, v2 first.
    async fn execute(&self, ops: &[Op]) -> Result<()> {
        let keyword = self.window_keyword.read().clone();
        let mut last_err = String::new();
        for dialect in [Dialect::V2, Dialect::V1] {
            let script = render(dialect, &keyword, ops);
            match self.run_file(&script).await {
                Ok(true) => {
                    trace!(?dialect, "ahk_script_ok");
                    return Ok(());
                }
                Ok(false) => {
                    debug!(?dialect, "ahk_script_nonzero_exit");
                    last_err = format!("{dialect:?} script exited with non-zero status");
                }
                Err(e) => {
                    warn!(?dialect, error = %e, "ahk_script_spawn_failed");
                    last_err = e.to_string();
                }
            }
        }
        Err(Error::Script(last_err))
    }

    /// Write a script to a temp file and run it. Returns whether it exited 0.
    ///
    /// Dropping the returned future kills the interpreter and removes the
    /// file, so a timed-out script stops sending input.
    async fn run_file(&self, script: &str) -> Result<bool> {
        let n = SCRIPT_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = env::temp_dir().join(format!("giftkey-{}-{n}.ahk", process::id()));
        let file = TempScript::write(path, script).await?;
        let status = Command::new(&self.ahk_path)
            .arg(file.path())
            .kill_on_drop(true)
            .status()
            .await?;
        Ok(status.success())
    }
}

/// A script file on disk, removed when dropped.
#[derive(Debug)]
struct TempScript {
    /// Location of the file.
    path: PathBuf,
}

impl TempScript {
    /// Write `script` to `path`. A partial write is cleaned up too.
    async fn write(path: PathBuf, script: &str) -> Result<Self> {
        let file = Self { path };
        tokio::fs::write(&file.path, script).await?;
        Ok(file)
    }

    /// Location of the file.
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            trace!(path = %self.path.display(), error = %e, "ahk_tempfile_cleanup_failed");
        }
    }
}

#[async_trait]
impl InjectionBackend for ScriptBackend {
    fn name(&self) -> &'static str {
        "autohotkey"
    }

    async fn hold_key(&self, key: &str, duration: Duration) -> Result<()> {
        self.hold(&Target::Key(key.to_string()), duration).await
    }

    async fn mouse_hold(&self, button: MouseButton, duration: Duration) -> Result<()> {
        self.hold(&Target::Mouse(button), duration).await
    }

    async fn hold(&self, target: &Target, duration: Duration) -> Result<()> {
        let k = ahk_key(target);
        self.execute(&[Op::Down(k.clone()), Op::Sleep(ms(duration)), Op::Up(k)])
            .await?;
        info!(%target, ms = ms(duration), "injected_ahk_hold");
        Ok(())
    }

    async fn tap_repeat(
        &self,
        target: &Target,
        interval: Duration,
        total: Duration,
    ) -> Result<()> {
        let k = ahk_key(target);
        let taps = repeat_taps(interval, total);
        let body = vec![Op::Tap(k.clone()), Op::Sleep(ms(interval))];
        self.execute(&[Op::Loop(taps, body), Op::Up(k)]).await?;
        info!(%target, taps, "injected_ahk_tap_repeat");
        Ok(())
    }

    async fn tap_batch(&self, target: &Target, count: u32, spacing: Duration) -> Result<()> {
        let body = vec![Op::Tap(ahk_key(target)), Op::Sleep(ms(spacing))];
        self.execute(&[Op::Loop(count, body)]).await?;
        info!(%target, count, "injected_ahk_batch");
        Ok(())
    }

    async fn run_sequence(&self, steps: &[Step]) -> Result<()> {
        self.execute(&sequence_ops(steps)).await?;
        info!(steps = steps.len(), "injected_ahk_sequence");
        Ok(())
    }

    fn set_window_keyword(&self, keyword: &str) {
        *self.window_keyword.write() = keyword.to_string();
    }
}

//! Command-line interface definitions for giftkey.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

use clap::{Args, Parser, Subcommand};
use config::Settings;
use giftkey_protocol::InjectionMode;
use logging::LogArgs;

/// Command-line interface for the `giftkey` binary.
#[derive(Parser, Debug)]
#[command(
    name = "giftkey",
    about = "Turn live-stream gifts and likes into keyboard and mouse macros",
    version
)]
pub struct Cli {
    /// Logging controls
    #[command(flatten)]
    pub log: LogArgs,

    /// What to do; defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve observers and drive macros from the live feed.
    Run(RunArgs),
    /// Load and validate a mapping file then exit.
    Check {
        /// Mapping file to check (defaults to ~/.giftkey/mapping.json)
        path: Option<PathBuf>,

        /// Dump the parsed mapping as JSON to stdout
        #[arg(long)]
        dump: bool,
    },
}

/// Arguments for `run`. Each flag overrides its environment variable.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Observer WebSocket port (WS_PORT)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Interface the observer socket binds to
    #[arg(long, value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Mapping file loaded at start (defaults to ~/.giftkey/mapping.json if present)
    #[arg(long, value_name = "PATH")]
    pub mapping: Option<PathBuf>,

    /// Injection mode: nodesender, nodesender_repeat or autohotkey (INJECTION_MODE)
    #[arg(long, value_name = "MODE", value_parser = parse_mode)]
    pub mode: Option<InjectionMode>,

    /// Only inject while a window whose title or app contains this is focused
    /// (TARGET_WINDOW_KEYWORD)
    #[arg(long, value_name = "KEYWORD")]
    pub target_window: Option<String>,

    /// AutoHotkey interpreter (AHK_PATH)
    #[arg(long, value_name = "PATH")]
    pub ahk_path: Option<PathBuf>,

    /// Account to connect to at start (TIKTOK_USERNAME)
    #[arg(long, value_name = "NAME")]
    pub username: Option<String>,

    /// Live feed endpoint; `{username}` is substituted (FEED_URL)
    #[arg(long, value_name = "URL")]
    pub feed_url: Option<String>,

    /// Start with gift stacking disabled
    #[arg(long)]
    pub no_stacking: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            port: None,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            mapping: None,
            mode: None,
            target_window: None,
            ahk_path: None,
            username: None,
            feed_url: None,
            no_stacking: false,
        }
    }
}

/// Parse an injection mode name.
fn parse_mode(s: &str) -> Result<InjectionMode, String> {
    InjectionMode::try_from_str(s).ok_or_else(|| format!("unknown injection mode \"{s}\""))
}

impl RunArgs {
    /// Layer the flags over `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.ws_port = port;
        }
        if let Some(mode) = self.mode {
            settings.injection_mode = mode;
        }
        if let Some(kw) = &self.target_window {
            settings.target_window_keyword = kw.trim().to_string();
        }
        if let Some(p) = &self.ahk_path {
            settings.ahk_path = p.clone();
        }
        if let Some(u) = self.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            settings.username = Some(u.to_string());
        }
        if let Some(url) = &self.feed_url {
            settings.feed_url = url.clone();
        }
        if self.no_stacking {
            settings.stacking_enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_override_settings() {
        let cli = Cli::parse_from([
            "giftkey",
            "--debug",
            "run",
            "--port",
            "6001",
            "--mode",
            "AutoHotkey",
            "--target-window",
            " Game ",
            "--no-stacking",
        ]);
        let Some(Command::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let mut s = Settings::default();
        args.apply(&mut s);
        assert_eq!(s.ws_port, 6001);
        assert_eq!(s.injection_mode, InjectionMode::AutoHotkey);
        assert_eq!(s.target_window_keyword, "Game");
        assert!(!s.stacking_enabled);
        assert!(cli.log.debug);
    }

    #[test]
    fn bare_invocation_runs_with_env_settings() {
        let cli = Cli::parse_from(["giftkey"]);
        assert!(cli.command.is_none());
        let mut s = Settings::default();
        RunArgs::default().apply(&mut s);
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["giftkey", "run", "--mode", "robot"]).is_err());
    }
}

//! Binary entrypoint for giftkey.
use std::{net::SocketAddr, path::Path, process, sync::Arc};

use clap::Parser;
use config::{Settings, load_mapping_from_path, resolve_mapping_path};
use giftkey_engine::{ActiveWindowChecker, Backends, Engine, EngineDeps};
use giftkey_protocol::ipc::observer_channel;
use giftkey_server::{FeedProducers, Server};
use inject::{NativeBackend, ScriptBackend};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod cli;

use crate::cli::{Cli, Command, RunArgs};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(&cli.log);

    match cli.command {
        Some(Command::Check { path, dump }) => check(path.as_deref(), dump),
        Some(Command::Run(args)) => run(&args).await,
        None => run(&RunArgs::default()).await,
    }
}

/// Validate a mapping file and exit.
fn check(path: Option<&Path>, dump: bool) {
    let Some(resolved) = resolve_mapping_path(path) else {
        eprintln!("No mapping file given and ~/.giftkey/mapping.json does not exist");
        process::exit(1);
    };
    match load_mapping_from_path(&resolved) {
        Ok(loaded) => {
            if dump {
                match serde_json::to_string_pretty(&loaded.spec) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("Failed to serialize mapping: {e}");
                        process::exit(1);
                    }
                }
            } else {
                println!("OK ({} gifts)", loaded.mapping.len());
            }
        }
        Err(e) => {
            eprintln!("{}", e.pretty());
            process::exit(1);
        }
    }
}

/// Wire the engine to the observer server and live feed, then serve until
/// interrupted.
async fn run(args: &RunArgs) {
    let mut settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e.pretty());
            process::exit(1);
        }
    };
    args.apply(&mut settings);
    debug!(?settings, "settings_resolved");

    let initial = match resolve_mapping_path(args.mapping.as_deref()) {
        Some(path) => match load_mapping_from_path(&path) {
            Ok(loaded) => {
                info!(path = %path.display(), gifts = loaded.mapping.len(), "mapping_loaded");
                Some(loaded.spec)
            }
            Err(e) => {
                eprintln!("{}", e.pretty());
                process::exit(1);
            }
        },
        None => None,
    };

    let addr = SocketAddr::new(args.host, settings.ws_port);
    let server = match Server::bind(addr).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let backends = Backends {
        native: Arc::new(NativeBackend::new()),
        script: Arc::new(ScriptBackend::new(settings.ahk_path.clone())),
    };
    let (tx, rx) = observer_channel();
    let username = settings.username.clone();
    let engine = Engine::new(
        EngineDeps {
            producers: FeedProducers::new(settings.clone()),
            settings,
            backends,
            focus: Arc::new(ActiveWindowChecker),
        },
        tx,
    );
    if let Some(spec) = initial {
        engine.set_mapping(spec);
    }

    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server.run(engine.clone(), rx, shutdown.clone()));

    if let Some(name) = username {
        info!(username = %name, "auto_connect");
        let eng = engine.clone();
        tokio::spawn(async move {
            if !eng.connect(&name).await {
                error!(username = %name, "auto_connect_failed");
            }
        });
    }

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "signal_handler_failed");
    }
    info!("shutting_down");
    shutdown.cancel();
    engine.disconnect().await;
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Server exited with error: {}", e),
        Err(e) => error!("Server task failed: {}", e),
    }
}

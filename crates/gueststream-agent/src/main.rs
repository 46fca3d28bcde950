//! GuestStream agent.
//!
//! Runs inside the guest and streams its display to the host over the
//! stream port.
//!
//! ```text
//! X11 root window ─► GStreamer (appsrc → videoconvert → encoder → appsink) ─┐
//!                                                                            ├─► StreamPort ─► host
//! XFixes cursor notifications ─► CursorWatcher ──────────────────────────────┘
//!                                              host commands ─► command reader ─► Session
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches};
use gueststream_capture_x11::XFixesCursor;
use gueststream_core::{AgentConfig, AgentError, ConfigureOption};
use gueststream_transport::StreamPort;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gueststream_agent::cursor::CursorWatcher;
use gueststream_agent::frame_log::FrameLog;
use gueststream_agent::mjpeg::register_mjpeg_plugin;
use gueststream_agent::plugin::register_gst_plugins;
use gueststream_agent::registry::Registry;
use gueststream_agent::session::{self, Command, Session};

fn cli() -> clap::Command {
    clap::Command::new("gueststream-agent")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Streams the guest display and cursor to the host")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("JSON configuration file, overridden by the flags below"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(PathBuf))
                .help("virtio-serial port to use"),
        )
        .arg(
            Arg::new("configure")
                .short('c')
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .help("Change settings, e.g. framerate=30 or gst.h264=x264enc:speed-preset=ultrafast"),
        )
        .arg(
            Arg::new("log-file")
                .short('l')
                .long("log-file")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Log frames to file"),
        )
        .arg(
            Arg::new("log-binary")
                .long("log-binary")
                .action(ArgAction::SetTrue)
                .help("Log binary frames (following -l)"),
        )
        .arg(
            Arg::new("log-categories")
                .long("log-categories")
                .value_name("CATEGORIES")
                .help("Log categories, separated by ':' (currently: frames)"),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debug logs"),
        )
}

/// Defaults, then `--config`, then the remaining flags.
fn config_from_matches(matches: &ArgMatches) -> Result<AgentConfig, AgentError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => AgentConfig::from_json_file(path)?,
        None => AgentConfig::default(),
    };

    if let Some(port) = matches.get_one::<PathBuf>("port") {
        config.stream_port = port.clone();
    }
    if let Some(values) = matches.get_many::<String>("configure") {
        for value in values {
            config.options.push(ConfigureOption::parse(value)?);
        }
    }
    if let Some(path) = matches.get_one::<PathBuf>("log-file") {
        config.log_file = Some(path.clone());
    }
    if matches.get_flag("log-binary") {
        config.log_binary = true;
    }
    if let Some(categories) = matches.get_one::<String>("log-categories") {
        config.apply_log_categories(categories);
    }
    if matches.get_flag("debug") {
        config.debug = true;
    }
    Ok(config)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(true)
        .init();
}

/// Resolves on Ctrl-C or SIGTERM. A signal that cannot be watched is logged
/// and never fires.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = config_from_matches(&matches).context("Invalid arguments")?;
    init_tracing(config.debug);

    info!("GuestStream agent v{}", env!("CARGO_PKG_VERSION"));

    let mut frame_log = match &config.log_file {
        Some(path) => FrameLog::open(path, config.log_binary, config.log_frames)?,
        None => FrameLog::disabled(),
    };
    for arg in std::env::args() {
        frame_log.log_stat(format_args!("Args: {}", arg));
    }

    let mut registry = Registry::new(config.options.clone());
    register_mjpeg_plugin(&mut registry);
    register_gst_plugins(&mut registry);
    if registry.is_empty() {
        bail!("No capture plugin could be registered");
    }

    let (port, reader) = StreamPort::open(&config.stream_port)?;
    let port = Arc::new(port);

    let cursor = XFixesCursor::open().context("Starting cursor watcher")?;
    let watcher = CursorWatcher::spawn(cursor, Arc::clone(&port));

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    session::spawn_command_reader(reader, cmd_tx.clone()).context("Starting command reader")?;

    let session = Session::new(port, cmd_rx, registry, frame_log);
    let mut session_task = tokio::task::spawn_blocking(move || session.run());

    let joined = tokio::select! {
        joined = &mut session_task => joined,
        _ = shutdown_signal() => {
            info!("Got signal, exiting");
            let _ = cmd_tx.send(Command::Quit).await;
            session_task.await
        }
    };

    watcher.join().await;

    match joined {
        Ok(result) => result.context("Streaming session failed"),
        Err(e) => Err(anyhow!("session task panicked: {e}")),
    }
}

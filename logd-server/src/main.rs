//! Logd server binary.
//!
//! Signal handling lives here, not in the core: the listener exposes a
//! shutdown handle and the binary wires SIGINT/SIGTERM into it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use logd_core::Config;
use logd_events::Handlers;
use logd_server::Socket;

/// Append-only commit log server.
#[derive(Parser, Debug)]
#[command(name = "logd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a server.
    Serve {
        /// Listen address, overriding `LOGD_HOSTPORT`.
        #[arg(long)]
        host: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(true)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("logd: failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("logd: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Serve { host } => serve(host).await,
    }
}

async fn serve(host: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut conf = Config::from_env()?;
    if let Some(host) = host {
        conf.hostport = host;
    }

    info!(
        hostport = %conf.hostport,
        data_dir = %conf.log_file.display(),
        partition_size = conf.partition_size,
        max_partitions = conf.max_partitions,
        "starting logd"
    );

    let handlers = Arc::new(Handlers::new(conf.clone()));
    handlers.setup().await?;

    let socket = Socket::new(conf, Arc::clone(&handlers) as _, handlers.stats());
    let shutdown = socket.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("caught signal, shutting down");
        shutdown.notify_waiters();
    });

    socket.listen_and_serve().await?;
    handlers.stop().await;
    info!("bye");
    Ok(())
}

/// Completes on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

//! splitstream server.
//!
//! ```text
//!  client ── POST /tunnel/{id}/{seq} ──▶ ┌───────────────┐
//!                                        │ session store │ ── TCP ──▶ destination
//!  client ◀── GET /tunnel/{id} ───────── └───────────────┘ ◀────────
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use splitstream::config::load_config;
use splitstream::observability::{logging, metrics};
use splitstream::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "splitstream")]
#[command(about = "HTTP-split TCP tunnel server", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "splitstream.toml")]
    config: PathBuf,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "splitstream starting");
    tracing::info!(
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        base_path = %config.tunnel.base_path,
        max_buffered_chunks = config.tunnel.max_buffered_chunks,
        idle_timeout_secs = config.tunnel.idle_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Ctrl+C received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

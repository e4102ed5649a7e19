//! Launcher for the inform agent.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

use informant::agent::Agent;
use informant::config::{self, Format, Store};
use informant::VERSION;

/// Gateway telemetry agent for managed-network controllers.
#[derive(Parser, Debug)]
#[command(
    name = "informant",
    version,
    about = "Reports host and interface telemetry to a network controller over the inform protocol"
)]
struct Cli {
    /// Agent state file
    #[arg(short, long, default_value = "/etc/informant/gateway.toml")]
    config: PathBuf,

    /// Read and write the state file as JSON instead of TOML
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> informant::Result<()> {
    let cli = Cli::parse();
    let format = if cli.json { Format::Json } else { Format::Toml };

    // A broken state file falls back to defaults; only flag parsing is fatal.
    let store = match Store::open(&cli.config, format) {
        Ok(store) => store,
        Err(e) => {
            eprintln!(
                "cannot load state file {}: {e}; starting with defaults",
                cli.config.display()
            );
            Store::with_defaults(&cli.config, format)
        }
    };

    config::init_logging(&store.snapshot().general)?;
    info!(version = VERSION, config = %cli.config.display(), "informant starting");

    let agent = Agent::new(Arc::clone(&store))?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    agent.run(shutdown_rx).await?;
    info!("informant stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = signal::ctrl_c().await;
}

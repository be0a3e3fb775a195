//! touchpad-hotkey-daemon: enable the touchpad only while a hotkey says so
//!
//! This daemon runs in the user session and provides:
//! - A global hotkey that tells short taps from long presses
//! - Hold and Toggle modes for switching the touchpad on
//! - Auxiliary keys that emulate mouse clicks while the touchpad is active
//! - IPC server for tray/settings frontends

mod backend;
mod config;
mod control;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod state;
#[cfg(test)]
mod testing;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigStore, Paths};
use crate::events::TouchpadEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::HotkeyMachine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "touchpad-hotkey-daemon starting"
    );

    let paths = Paths::load()?;
    paths.ensure_dirs()?;
    let store = ConfigStore::new(&paths.config_path);
    let config = store.load_or_default();
    info!(?paths.socket_path, ?paths.config_path, "paths resolved");

    let shutdown = ShutdownSignal::new();

    // Hotkey machine -> IPC subscribers and the log below
    let (event_tx, _) = broadcast::channel::<TouchpadEvent>(64);

    let machine = HotkeyMachine::new(
        config,
        backend::create_backends(),
        event_tx.clone(),
        tokio::runtime::Handle::current(),
    )?;

    match machine.start() {
        Ok(()) => info!("hotkey capture started"),
        Err(e) => {
            error!(%e, "failed to start hotkey capture");
            warn!("continuing without hotkey support - check input permissions");
        }
    }

    let (control, control_rx) = control::channel(32);
    let server = Server::bind(&paths.socket_path, control, event_tx.clone())?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = control::run(machine.clone(), store, control_rx) => {
            info!("control loop exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => match event.activation() {
                        Some(active) => info!(active, "touchpad activation changed"),
                        None => info!(%event, "touchpad event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log exited");
        }

        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(%e, "failed to register signal handlers"),
            }
        }
    }

    info!("shutting down...");

    machine.shutdown();
    server.shutdown().await;

    info!("touchpad-hotkey-daemon stopped");

    Ok(())
}

//! Command channel between the outer surfaces and the hotkey machine
//!
//! The IPC server (and anything else that stands in for a tray menu or a
//! settings window) never touches the machine directly. It sends a
//! `Command` and awaits the reply; `run` applies the command and persists
//! every accepted change through the `ConfigStore`.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError, ConfigStore, Mode};
use crate::state::{HotkeyMachine, MachineStatus};

/// Commands accepted by the control loop
#[derive(Debug)]
pub enum Command {
    Status(oneshot::Sender<MachineStatus>),
    ToggleMode(oneshot::Sender<Mode>),
    Reconfigure(Config, oneshot::Sender<Result<Arc<Config>, ConfigError>>),
    /// Re-read the configuration file and apply it
    ReloadConfig(oneshot::Sender<Result<Arc<Config>, ConfigError>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("control loop is not running")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Cloneable sender side of the control loop
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: mpsc::Sender<Command>,
}

impl ControlHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ControlError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ControlError::Closed)?;
        reply_rx.await.map_err(|_| ControlError::Closed)
    }

    pub async fn status(&self) -> Result<MachineStatus, ControlError> {
        self.request(Command::Status).await
    }

    pub async fn toggle_mode(&self) -> Result<Mode, ControlError> {
        self.request(Command::ToggleMode).await
    }

    pub async fn reconfigure(&self, config: Config) -> Result<Arc<Config>, ControlError> {
        Ok(self
            .request(|reply| Command::Reconfigure(config, reply))
            .await??)
    }

    pub async fn reload_config(&self) -> Result<Arc<Config>, ControlError> {
        Ok(self.request(Command::ReloadConfig).await??)
    }

    pub async fn shutdown(&self) -> Result<(), ControlError> {
        self.request(Command::Shutdown).await
    }
}

/// Create a control channel
pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<Command>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ControlHandle::new(tx), rx)
}

/// Process commands until `Shutdown` arrives or every handle is dropped
///
/// Does not shut the machine down; the caller owns that.
pub async fn run(machine: Arc<HotkeyMachine>, store: ConfigStore, mut rx: mpsc::Receiver<Command>) {
    info!("control loop started");

    while let Some(command) = rx.recv().await {
        debug!(?command, "control command");
        match command {
            Command::Status(reply) => {
                let _ = reply.send(machine.status());
            }
            Command::ToggleMode(reply) => {
                let mode = machine.request_mode_toggle();
                persist(&store, &machine.config());
                let _ = reply.send(mode);
            }
            Command::Reconfigure(config, reply) => {
                let result = apply(&machine, config);
                if let Ok(config) = &result {
                    persist(&store, config);
                }
                let _ = reply.send(result);
            }
            Command::ReloadConfig(reply) => {
                let result = store.read().and_then(|config| apply(&machine, config));
                if let Err(e) = &result {
                    warn!(%e, path = ?store.path(), "configuration reload rejected");
                }
                let _ = reply.send(result);
            }
            Command::Shutdown(reply) => {
                info!("shutdown requested");
                let _ = reply.send(());
                return;
            }
        }
    }

    info!("control loop exited");
}

fn apply(machine: &HotkeyMachine, config: Config) -> Result<Arc<Config>, ConfigError> {
    machine.reconfigure(config)?;
    Ok(machine.config())
}

fn persist(store: &ConfigStore, config: &Config) {
    if let Err(e) = store.save(config) {
        error!(%e, path = ?store.path(), "failed to save configuration");
    }
}

use std::process::Stdio;

use bufsync_core::config::EngineSettings;
use bufsync_core::{EngineEvent, RpcError};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::EngineClient;

/// Manages the external engine process lifecycle.
pub struct EngineProcess {
    command: String,
    args: Vec<String>,
    process: Option<Child>,
}

impl EngineProcess {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            process: None,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.command.clone(), settings.args.clone())
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    pub async fn start(&mut self) -> Result<(), RpcError> {
        if self.is_running() {
            return Ok(());
        }

        info!("Starting engine: {} {}", self.command, self.args.join(" "));

        let child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RpcError::Transport(format!("Failed to start engine '{}': {e}", self.command)))?;

        self.process = Some(child);
        info!("Engine started successfully");
        Ok(())
    }

    /// Start the engine if needed and attach a client to its stdio. The
    /// process stays owned by the manager.
    pub async fn connect(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<EngineClient, RpcError> {
        self.start().await?;
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| RpcError::Transport("Engine is not running".to_string()))?;
        EngineClient::from_process(process, events)
    }

    pub async fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            info!("Stopping engine");
            let _ = process.kill().await;
        }
    }

    pub fn take_process(&mut self) -> Option<Child> {
        self.process.take()
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            warn!("Engine process dropped without explicit stop");
            let _ = process.start_kill();
        }
    }
}

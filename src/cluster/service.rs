//! Node Service Control over SSH
//!
//! Stops and starts the orchestrator's scheduling service on a node by
//! running `systemctl` through the system `ssh` binary. `systemctl stop`
//! and `start` are idempotent, so repeating a call is harmless.

use crate::domain::ports::{Node, NodeServiceController};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

/// SSH service control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshServiceConfig {
    /// Remote login user
    pub user: String,
    /// systemd unit of the scheduling service
    pub service: String,
    /// Client binary
    pub ssh_binary: String,
    pub connect_timeout_secs: u64,
    /// Prefix the remote command with `sudo -n`
    pub use_sudo: bool,
}

impl Default for SshServiceConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            service: "kubelet".to_string(),
            ssh_binary: "ssh".to_string(),
            connect_timeout_secs: 10,
            use_sudo: false,
        }
    }
}

/// Controls the scheduling service through SSH
pub struct SshServiceController {
    config: SshServiceConfig,
}

impl SshServiceController {
    pub fn new(config: SshServiceConfig) -> Self {
        Self { config }
    }

    fn args(&self, node: &Node, action: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            format!("{}@{}", self.config.user, node.primary_address()),
        ];
        if self.config.use_sudo {
            args.push("sudo".to_string());
            args.push("-n".to_string());
        }
        args.push("systemctl".to_string());
        args.push(action.to_string());
        args.push(self.config.service.clone());
        args
    }

    async fn systemctl(&self, node: &Node, action: &str) -> Result<()> {
        let args = self.args(node, action);
        debug!("Running {} {}", self.config.ssh_binary, args.join(" "));

        let output = Command::new(&self.config.ssh_binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::NodeServiceControl {
                node: node.name.clone(),
                operation: action.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::NodeServiceControl {
                node: node.name.clone(),
                operation: action.to_string(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        info!("{} {} on node {}", action, self.config.service, node.name);
        Ok(())
    }
}

#[async_trait]
impl NodeServiceController for SshServiceController {
    async fn stop(&self, node: &Node) -> Result<()> {
        self.systemctl(node, "stop").await
    }

    async fn start(&self, node: &Node) -> Result<()> {
        self.systemctl(node, "start").await
    }
}

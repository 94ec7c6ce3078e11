//! Cluster description document

use super::cluster::{ControlPlaneConfig, RegistryConfig, RuntimeConfig};
use super::settings::Settings;
use crate::error::{KeelError, Result};
use crate::host::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Top-level cluster document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name
    pub name: String,
    /// Hosts
    pub hosts: Vec<HostSpec>,
    /// Control plane block
    pub control_plane: ControlPlaneConfig,
    /// Runtime block
    pub runtime: RuntimeConfig,
    /// Registry block
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    /// Engine settings
    #[serde(default)]
    pub settings: Option<Settings>,
}

impl ClusterSpec {
    /// Check the document for problems that would make any run fail
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KeelError::InvalidConfig("cluster name is empty".to_string()));
        }

        if self.hosts.is_empty() {
            return Err(KeelError::InvalidConfig("no hosts defined".to_string()));
        }

        let mut seen = HashSet::new();
        for (i, host) in self.hosts.iter().enumerate() {
            match (&host.ssh, &host.localhost) {
                (Some(_), Some(_)) => {
                    return Err(KeelError::InvalidConfig(format!(
                        "host {} has both ssh and localhost connections",
                        i
                    )))
                }
                (None, None) => {
                    return Err(KeelError::InvalidConfig(format!(
                        "host {} has no connection",
                        i
                    )))
                }
                _ => {}
            }

            if !seen.insert(host.address()) {
                return Err(KeelError::InvalidConfig(format!(
                    "duplicate host address: {}",
                    host.address()
                )));
            }
        }

        if !self.hosts.iter().any(|h| h.role == Role::ControlPlane) {
            return Err(KeelError::InvalidConfig(
                "at least one host must have the control-plane role".to_string(),
            ));
        }

        let has_registry_hosts = self.hosts.iter().any(|h| h.role == Role::Registry);
        if has_registry_hosts && self.registry.is_none() {
            return Err(KeelError::InvalidConfig(
                "registry hosts defined without a registry block".to_string(),
            ));
        }
        if self.registry.is_some() && !has_registry_hosts {
            tracing::warn!("registry block defined but no hosts have the registry role");
        }

        if let Some(ref settings) = self.settings {
            if !(settings.rolling.fraction > 0.0 && settings.rolling.fraction <= 1.0) {
                return Err(KeelError::InvalidConfig(format!(
                    "rolling fraction must be in (0, 1], got {}",
                    settings.rolling.fraction
                )));
            }
        }

        Ok(())
    }
}

/// A single host entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    /// Host role
    pub role: Role,
    /// SSH connection
    #[serde(default)]
    pub ssh: Option<SshSpec>,
    /// Local connection
    #[serde(default)]
    pub localhost: Option<LocalhostSpec>,
    /// Hook scripts
    #[serde(default)]
    pub hooks: Hooks,
    /// Environment variables to persist on the host
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl HostSpec {
    /// Address used to identify the host
    pub fn address(&self) -> String {
        match self.ssh {
            Some(ref ssh) if ssh.port != 22 => format!("{}:{}", ssh.address, ssh.port),
            Some(ref ssh) => ssh.address.clone(),
            None => "localhost".to_string(),
        }
    }
}

/// SSH connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSpec {
    pub address: String,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Local connection parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalhostSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

/// When a hook runs relative to its action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    Before,
    After,
}

/// Action a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Apply,
    Reset,
}

/// Hook commands grouped by action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(default)]
    pub apply: HookCommands,
    #[serde(default)]
    pub reset: HookCommands,
}

impl Hooks {
    pub fn commands(&self, action: HookAction, stage: HookStage) -> &[String] {
        let set = match action {
            HookAction::Apply => &self.apply,
            HookAction::Reset => &self.reset,
        };
        match stage {
            HookStage::Before => &set.before,
            HookStage::After => &set.after,
        }
    }
}

/// Commands run before and after an action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookCommands {
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

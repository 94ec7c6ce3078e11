//! Cluster configuration shared by every phase of a run

use super::document::ClusterSpec;
use super::flags::Flags;
use crate::error::{KeelError, Result};
use crate::host::{ConfigurerFactory, Host, HostSet, Role};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Platform component managed by Keel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// Container runtime, installed on every host
    Runtime,
    /// Cluster control plane
    ControlPlane,
    /// Image registry
    Registry,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Component::Runtime => "runtime",
            Component::ControlPlane => "control plane",
            Component::Registry => "registry",
        };
        write!(f, "{}", s)
    }
}

/// Control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    /// Target version
    pub version: Version,
    /// Repository the control plane images are pulled from
    #[serde(default = "default_image_repo")]
    pub image_repo: String,
    /// Extra flags for the bootstrap install
    #[serde(default)]
    pub install_flags: Flags,
    /// Extra flags for upgrades
    #[serde(default)]
    pub upgrade_flags: Flags,
    /// Runtime state
    #[serde(skip)]
    pub metadata: ControlPlaneMetadata,
}

impl ControlPlaneConfig {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            image_repo: default_image_repo(),
            install_flags: Flags::new(),
            upgrade_flags: Flags::new(),
            metadata: ControlPlaneMetadata::default(),
        }
    }

    /// Images every control plane host needs for the target version
    pub fn images(&self) -> Vec<String> {
        ["keel-bootstrap", "keel-controller", "keel-proxy", "keel-agent"]
            .iter()
            .map(|name| format!("{}/{}:{}", self.image_repo, name, self.version))
            .collect()
    }
}

/// Control plane facts discovered or produced during a run
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneMetadata {
    /// The control plane is up on at least one host
    pub installed: bool,
    /// Verified installed version
    pub installed_version: Option<Version>,
    /// Cluster ID issued by the control plane
    pub cluster_id: Option<String>,
    /// Address of the host the control plane was bootstrapped on
    pub leader: Option<String>,
    /// The bootstrap happened during this run
    pub bootstrapped: bool,
    /// Token for joining control plane hosts
    pub manager_join_token: Option<String>,
    /// Token for joining worker hosts
    pub worker_join_token: Option<String>,
}

/// Container runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Target version
    pub version: Version,
    /// Package repository
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    /// Release channel
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Extra installer flags
    #[serde(default)]
    pub install_flags: Flags,
    /// Runtime state
    #[serde(skip)]
    pub metadata: RuntimeMetadata,
}

impl RuntimeConfig {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            repo_url: default_repo_url(),
            channel: default_channel(),
            install_flags: Flags::new(),
            metadata: RuntimeMetadata::default(),
        }
    }
}

/// Runtime facts produced during a run
#[derive(Debug, Clone, Default)]
pub struct RuntimeMetadata {
    /// Hosts whose runtime was installed during this run
    pub installed_hosts: Vec<String>,
    /// Hosts whose runtime was upgraded during this run
    pub upgraded_hosts: Vec<String>,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Target version
    pub version: Version,
    /// Repository the registry images are pulled from
    #[serde(default = "default_image_repo")]
    pub image_repo: String,
    /// Extra flags for the install
    #[serde(default)]
    pub install_flags: Flags,
    /// Extra flags for upgrades
    #[serde(default)]
    pub upgrade_flags: Flags,
    /// Runtime state
    #[serde(skip)]
    pub metadata: RegistryMetadata,
}

impl RegistryConfig {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            image_repo: default_image_repo(),
            install_flags: Flags::new(),
            upgrade_flags: Flags::new(),
            metadata: RegistryMetadata::default(),
        }
    }

    pub fn images(&self) -> Vec<String> {
        ["keel-registry-bootstrap", "keel-registry"]
            .iter()
            .map(|name| format!("{}/{}:{}", self.image_repo, name, self.version))
            .collect()
    }
}

/// Registry facts discovered or produced during a run
#[derive(Debug, Clone, Default)]
pub struct RegistryMetadata {
    pub installed: bool,
    pub installed_version: Option<Version>,
}

fn default_image_repo() -> String {
    "registry.keel.sh/keel".to_string()
}

fn default_repo_url() -> String {
    "https://repos.keel.sh".to_string()
}

fn default_channel() -> String {
    "stable".to_string()
}

/// The cluster being operated on
///
/// Owned by the pipeline manager for the duration of a run. Phases mutate
/// component metadata in place; per-host state lives on each [`Host`].
#[derive(Debug)]
pub struct ClusterConfig {
    /// Cluster name
    pub name: String,
    /// Persisted cluster ID, loaded from local state
    pub id: Option<String>,
    /// Hosts in declaration order
    pub hosts: Vec<Arc<Host>>,
    /// Control plane block
    pub control_plane: ControlPlaneConfig,
    /// Runtime block
    pub runtime: RuntimeConfig,
    /// Optional registry block
    pub registry: Option<RegistryConfig>,
}

impl ClusterConfig {
    pub fn new(
        name: &str,
        hosts: Vec<Arc<Host>>,
        control_plane: ControlPlaneConfig,
        runtime: RuntimeConfig,
    ) -> Self {
        Self {
            name: name.to_string(),
            id: None,
            hosts,
            control_plane,
            runtime,
            registry: None,
        }
    }

    /// Builder-style registry block
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the runtime configuration from a parsed and validated document
    pub fn from_spec(spec: ClusterSpec, factory: &dyn ConfigurerFactory) -> Result<Self> {
        let mut hosts = Vec::with_capacity(spec.hosts.len());
        for host_spec in &spec.hosts {
            let configurer = factory.configurer(host_spec)?;
            hosts.push(Arc::new(Host::from_spec(host_spec, configurer)));
        }

        Ok(Self {
            name: spec.name,
            id: None,
            hosts,
            control_plane: spec.control_plane,
            runtime: spec.runtime,
            registry: spec.registry,
        })
    }

    /// View over every host
    pub fn host_set(&self) -> HostSet {
        HostSet::new(self.hosts.clone())
    }

    pub fn control_plane_hosts(&self) -> HostSet {
        self.host_set().with_role(Role::ControlPlane)
    }

    pub fn registry_hosts(&self) -> HostSet {
        self.host_set().with_role(Role::Registry)
    }

    /// Host the control plane is (or will be) bootstrapped on.
    ///
    /// Prefers the recorded leader, then a control plane host that already
    /// runs the control plane, then the first declared control plane host.
    pub fn leader(&self) -> Result<Arc<Host>> {
        let control_plane = self.control_plane_hosts();

        if let Some(ref addr) = self.control_plane.metadata.leader {
            if let Some(host) = control_plane.find(|h| h.address() == addr) {
                return Ok(host);
            }
        }

        control_plane
            .find(|h| h.installed_version(Component::ControlPlane).is_some())
            .or_else(|| control_plane.first())
            .ok_or_else(|| {
                KeelError::Precondition("no hosts with the control-plane role".to_string())
            })
    }

    /// Target version for a component, if that component is configured
    pub fn target_version(&self, component: Component) -> Option<&Version> {
        match component {
            Component::Runtime => Some(&self.runtime.version),
            Component::ControlPlane => Some(&self.control_plane.version),
            Component::Registry => self.registry.as_ref().map(|r| &r.version),
        }
    }
}

//! Remote hosts
//!
//! A [`Host`] is one machine in the fleet. Its identity (address, role,
//! connection) is fixed at construction; the facts gathered about it and the
//! errors recorded against it live behind the host's own lock, so concurrent
//! per-host tasks never share mutable state.

pub mod configurer;
pub mod set;

pub use configurer::{Configurer, ConfigurerFactory};
pub use set::HostSet;

use crate::config::{Component, HostSpec, Hooks};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Host role in the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Participates in control plane quorum
    ControlPlane,
    /// Worker host
    #[default]
    Worker,
    /// Runs the image registry
    Registry,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::ControlPlane => "control-plane",
            Role::Worker => "worker",
            Role::Registry => "registry",
        };
        write!(f, "{}", s)
    }
}

/// Facts gathered from a host
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    /// Resolved OS identifier
    pub os: Option<String>,
    /// Hostname reported by the host
    pub hostname: Option<String>,
    /// Address the host uses inside the cluster
    pub internal_address: Option<String>,
    /// Installed runtime version
    pub runtime_version: Option<Version>,
    /// Installed control plane agent version
    pub control_plane_version: Option<Version>,
    /// Installed registry version
    pub registry_version: Option<Version>,
    /// The runtime has a pending restart
    pub restart_required: bool,
    /// The host is itself a container
    pub containerized: bool,
    /// The host environment needs to be updated
    pub needs_env_fix: bool,
}

impl HostFacts {
    pub fn installed_version(&self, component: Component) -> Option<&Version> {
        match component {
            Component::Runtime => self.runtime_version.as_ref(),
            Component::ControlPlane => self.control_plane_version.as_ref(),
            Component::Registry => self.registry_version.as_ref(),
        }
    }

    fn set_installed_version(&mut self, component: Component, version: Option<Version>) {
        match component {
            Component::Runtime => self.runtime_version = version,
            Component::ControlPlane => self.control_plane_version = version,
            Component::Registry => self.registry_version = version,
        }
    }
}

#[derive(Debug, Default)]
struct HostState {
    facts: HostFacts,
    errors: Vec<String>,
}

/// A remote machine
pub struct Host {
    address: String,
    role: Role,
    hooks: Hooks,
    environment: BTreeMap<String, String>,
    configurer: Arc<dyn Configurer>,
    state: RwLock<HostState>,
}

impl Host {
    pub fn new(address: &str, role: Role, configurer: Arc<dyn Configurer>) -> Self {
        Self {
            address: address.to_string(),
            role,
            hooks: Hooks::default(),
            environment: BTreeMap::new(),
            configurer,
            state: RwLock::new(HostState::default()),
        }
    }

    pub fn from_spec(spec: &HostSpec, configurer: Arc<dyn Configurer>) -> Self {
        Self {
            address: spec.address(),
            role: spec.role,
            hooks: spec.hooks.clone(),
            environment: spec.environment.clone(),
            configurer,
            state: RwLock::new(HostState::default()),
        }
    }

    /// Builder-style hooks
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builder-style environment
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_control_plane(&self) -> bool {
        self.role == Role::ControlPlane
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Remote capability for this host
    pub fn configurer(&self) -> &dyn Configurer {
        self.configurer.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HostState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the gathered facts
    pub fn facts(&self) -> HostFacts {
        self.read().facts.clone()
    }

    /// Mutate the gathered facts
    pub fn update_facts<F: FnOnce(&mut HostFacts)>(&self, f: F) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state.facts);
    }

    pub fn installed_version(&self, component: Component) -> Option<Version> {
        self.read().facts.installed_version(component).cloned()
    }

    pub fn set_installed_version(&self, component: Component, version: Option<Version>) {
        self.update_facts(|f| f.set_installed_version(component, version));
    }

    /// Record an error against the host
    pub fn add_error(&self, message: impl Into<String>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.errors.push(message.into());
    }

    pub fn errors(&self) -> Vec<String> {
        self.read().errors.clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.read().errors.is_empty()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read().facts.hostname {
            Some(ref name) => write!(f, "{} ({})", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.address)
            .field("role", &self.role)
            .field("facts", &self.read().facts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_host, MockConfigurer};

    #[test]
    fn test_facts_and_errors() {
        let host = mock_host("10.0.0.1", Role::Worker, MockConfigurer::new());
        assert_eq!(host.to_string(), "10.0.0.1");

        host.update_facts(|f| f.hostname = Some("node-1".to_string()));
        host.set_installed_version(Component::Runtime, Some(Version::new(23, 0, 7)));

        assert_eq!(host.to_string(), "10.0.0.1 (node-1)");
        assert_eq!(host.installed_version(Component::Runtime), Some(Version::new(23, 0, 7)));
        assert!(host.installed_version(Component::ControlPlane).is_none());

        assert!(!host.has_errors());
        host.add_error("unsupported OS");
        assert_eq!(host.errors(), vec!["unsupported OS".to_string()]);
    }

    #[test]
    fn test_role_serde() {
        let role: Role = serde_yaml::from_str("control-plane").unwrap();
        assert_eq!(role, Role::ControlPlane);
        assert_eq!(Role::Registry.to_string(), "registry");
    }
}

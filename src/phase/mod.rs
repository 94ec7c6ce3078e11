//! Pipeline phases
//!
//! A phase is one named step of a pipeline. The [`Manager`] drives every
//! phase through `prepare`, `should_run`, `run` and, depending on the
//! outcome and the phase's [`CleanupPolicy`], `cleanup`.

pub mod connect;
pub mod control_plane;
pub mod facts;
pub mod hooks;
pub mod images;
pub mod manager;
pub mod prepare;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod uninstall;
pub mod validate;

pub use connect::Connect;
pub use control_plane::{InstallControlPlane, JoinControlPlane, JoinWorkers, UpgradeControlPlane};
pub use facts::GatherFacts;
pub use hooks::RunHooks;
pub use images::PullImages;
pub use manager::{Manager, PhaseOutcome, PhaseReport, RunReport};
pub use prepare::PrepareHosts;
pub use registry::{InstallRegistry, UpgradeRegistry};
pub use runtime::{InstallRuntime, RestartRuntime, UpgradeRuntime};
pub use state::{LoadState, RemoveState, SaveState};
pub use uninstall::Uninstall;
pub use validate::ValidateHosts;

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::host::HostSet;
use crate::telemetry::Properties;
use async_trait::async_trait;

/// When the manager runs a phase's cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupPolicy {
    /// Only when the phase itself failed
    #[default]
    OnFailure,
    /// When the phase failed, or at the end of the pipeline after success
    Always,
}

/// One step of a pipeline
#[async_trait]
pub trait Phase: Send {
    /// Human readable name, also used as the telemetry event name
    fn title(&self) -> String;

    fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy::OnFailure
    }

    /// Capture what the phase needs from the config.
    ///
    /// Called right before `should_run`, after every earlier phase has run.
    /// Must not touch any host.
    fn prepare(&mut self, _config: &ClusterConfig) -> Result<()> {
        Ok(())
    }

    /// Whether there is anything to do
    fn should_run(&self) -> bool {
        true
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()>;

    /// Best-effort undo; errors are logged by the manager and never escalated
    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Extra telemetry properties
    fn properties(&self) -> Properties {
        Properties::new()
    }
}

/// Telemetry properties for a phase working on `hosts`
pub(crate) fn host_properties(hosts: &HostSet) -> Properties {
    let mut props = Properties::new();
    props.insert("hosts".to_string(), hosts.len().into());
    props
}

/// Log which hosts a host-selecting phase is about to touch
pub(crate) fn log_selection(title: &str, hosts: &HostSet) {
    tracing::debug!("{}: {}", title, hosts.addresses().join(", "));
}

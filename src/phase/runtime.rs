//! Container runtime install, upgrade and restart

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, Component};
use crate::error::Result;
use crate::host::{Host, HostSet};
use crate::reconcile::Target;
use crate::rolling::{rolling_update, RollingPolicy};
use crate::telemetry::Properties;
use async_trait::async_trait;
use std::sync::Arc;

fn runtime_target(config: &ClusterConfig, force: bool) -> Arc<Target> {
    Arc::new(Target::new(
        Component::Runtime,
        config.runtime.version.clone(),
        config.runtime.install_flags.clone(),
        force,
    ))
}

/// Addresses of `hosts` that now run `target`
fn converged(hosts: &HostSet, target: &Target) -> Vec<String> {
    hosts
        .filter(|h| h.installed_version(target.component).as_ref() == Some(&target.version))
        .addresses()
}

/// Installs the runtime on every host that doesn't have one.
///
/// With `force`, hosts already at the target are installed again.
pub struct InstallRuntime {
    force: bool,
    hosts: HostSet,
}

impl InstallRuntime {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for InstallRuntime {
    fn title(&self) -> String {
        "Install container runtime".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let target = &config.runtime.version;
        let force = self.force;
        self.hosts = config.host_set().filter(|h| {
            match h.installed_version(Component::Runtime) {
                None => true,
                Some(ref v) => force && v == target,
            }
        });
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let target = runtime_target(config, self.force);

        let t = Arc::clone(&target);
        let result = self
            .hosts
            .parallel_each(move |host| {
                let t = Arc::clone(&t);
                async move {
                    t.reconcile(&host).await?;
                    Ok(())
                }
            })
            .await;

        config.runtime.metadata.installed_hosts = converged(&self.hosts, &target);
        result
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

/// Upgrades hosts running an older runtime, rolling through the fleet
pub struct UpgradeRuntime {
    policy: RollingPolicy,
    force: bool,
    gate: bool,
    hosts: HostSet,
}

impl UpgradeRuntime {
    pub fn new(policy: RollingPolicy, force: bool) -> Self {
        Self {
            policy,
            force,
            gate: false,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for UpgradeRuntime {
    fn title(&self) -> String {
        "Upgrade container runtime".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let target = &config.runtime.version;
        self.hosts = config.host_set().filter(|h| {
            h.installed_version(Component::Runtime)
                .is_some_and(|v| v < *target)
        });
        self.gate = config.control_plane.metadata.installed;
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let target = runtime_target(config, self.force);

        let t = Arc::clone(&target);
        let result = rolling_update(&self.hosts, &self.policy, self.gate, move |host| {
            let t = Arc::clone(&t);
            async move {
                t.reconcile(&host).await?;
                let pending = host.configurer().restart_required().await?;
                host.update_facts(|f| f.restart_required = pending);
                Ok(())
            }
        })
        .await;

        config.runtime.metadata.upgraded_hosts = converged(&self.hosts, &target);
        result
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

/// Restarts the runtime where a restart is pending, rolling through the fleet
pub struct RestartRuntime {
    policy: RollingPolicy,
    gate: bool,
    hosts: HostSet,
}

impl RestartRuntime {
    pub fn new(policy: RollingPolicy) -> Self {
        Self {
            policy,
            gate: false,
            hosts: HostSet::default(),
        }
    }
}

async fn restart(host: Arc<Host>) -> Result<()> {
    tracing::info!("{}: restarting runtime", host);
    host.configurer().restart(Component::Runtime).await?;
    host.update_facts(|f| f.restart_required = false);
    Ok(())
}

#[async_trait]
impl Phase for RestartRuntime {
    fn title(&self) -> String {
        "Restart container runtime".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config.host_set().filter(|h| h.facts().restart_required);
        self.gate = config.control_plane.metadata.installed;
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        rolling_update(&self.hosts, &self.policy, self.gate, restart).await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

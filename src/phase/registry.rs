//! Image registry install and upgrade

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, Component, RegistryConfig};
use crate::error::Result;
use crate::host::HostSet;
use crate::reconcile::Target;
use crate::rolling::{rolling_update, RollingPolicy};
use crate::telemetry::Properties;
use crate::version::Version;
use async_trait::async_trait;
use std::sync::Arc;

/// Record the registry as installed once every registry host runs `target`
fn update_metadata(config: &mut ClusterConfig, target: &Target) {
    let all_current = config
        .registry_hosts()
        .iter()
        .all(|h| h.installed_version(Component::Registry).as_ref() == Some(&target.version));
    if let Some(ref mut registry) = config.registry {
        if all_current {
            registry.metadata.installed = true;
            registry.metadata.installed_version = Some(target.version.clone());
        }
    }
}

/// Registry hosts whose registry version satisfies `pred`; empty without a
/// registry block
fn select<P>(config: &ClusterConfig, pred: P) -> HostSet
where
    P: Fn(Option<Version>, &RegistryConfig) -> bool,
{
    match config.registry {
        Some(ref registry) => config
            .registry_hosts()
            .filter(|h| pred(h.installed_version(Component::Registry), registry)),
        None => HostSet::default(),
    }
}

/// Installs the registry on registry hosts that don't run it yet, and with
/// `force` on those already at the target
pub struct InstallRegistry {
    force: bool,
    hosts: HostSet,
}

impl InstallRegistry {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for InstallRegistry {
    fn title(&self) -> String {
        "Install registry".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let force = self.force;
        self.hosts = select(config, |installed, registry| match installed {
            None => true,
            Some(v) => force && v == registry.version,
        });
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let Some(ref registry) = config.registry else {
            return Ok(());
        };
        log_selection(&self.title(), &self.hosts);
        let target = Arc::new(Target::new(
            Component::Registry,
            registry.version.clone(),
            registry.install_flags.clone(),
            self.force,
        ));

        let t = Arc::clone(&target);
        self.hosts
            .parallel_each(move |host| {
                let t = Arc::clone(&t);
                async move {
                    t.reconcile(&host).await?;
                    Ok(())
                }
            })
            .await?;

        update_metadata(config, &target);
        Ok(())
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

/// Upgrades registry hosts running an older registry in rolling batches
pub struct UpgradeRegistry {
    policy: RollingPolicy,
    force: bool,
    hosts: HostSet,
}

impl UpgradeRegistry {
    pub fn new(policy: RollingPolicy, force: bool) -> Self {
        Self {
            policy,
            force,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for UpgradeRegistry {
    fn title(&self) -> String {
        "Upgrade registry".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = select(config, |installed, registry| {
            installed.is_some_and(|v| v < registry.version)
        });
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let Some(ref registry) = config.registry else {
            return Ok(());
        };
        log_selection(&self.title(), &self.hosts);
        let target = Arc::new(Target::new(
            Component::Registry,
            registry.version.clone(),
            registry.upgrade_flags.clone(),
            self.force,
        ));

        let t = Arc::clone(&target);
        rolling_update(&self.hosts, &self.policy, false, move |host| {
            let t = Arc::clone(&t);
            async move {
                t.reconcile(&host).await?;
                Ok(())
            }
        })
        .await?;

        update_metadata(config, &target);
        Ok(())
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

//! Component removal

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, Component};
use crate::error::Result;
use crate::host::{Host, HostSet};
use crate::telemetry::Properties;
use async_trait::async_trait;
use std::sync::Arc;

/// Removes a component from every host that runs it.
///
/// For the control plane, the other hosts leave first, then control plane
/// hosts one at a time with the leader last.
pub struct Uninstall {
    component: Component,
    hosts: HostSet,
}

impl Uninstall {
    pub fn new(component: Component) -> Self {
        Self {
            component,
            hosts: HostSet::default(),
        }
    }
}

async fn remove(host: Arc<Host>, component: Component) -> Result<()> {
    tracing::info!("{}: uninstalling {}", host, component);
    host.configurer().uninstall(component).await?;
    host.set_installed_version(component, None);
    Ok(())
}

#[async_trait]
impl Phase for Uninstall {
    fn title(&self) -> String {
        format!("Uninstall {}", self.component)
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let component = self.component;
        self.hosts = config
            .host_set()
            .filter(|h| h.installed_version(component).is_some());
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let component = self.component;

        if component != Component::ControlPlane {
            self.hosts
                .parallel_each(move |host| remove(host, component))
                .await?;
            if let (Component::Registry, Some(registry)) = (component, config.registry.as_mut()) {
                registry.metadata = Default::default();
            }
            return Ok(());
        }

        let leader = config.leader().ok();
        let (control_plane, others) = self.hosts.partition(|h| h.is_control_plane());
        others
            .parallel_each(move |host| remove(host, component))
            .await?;

        let (last, first) =
            control_plane.partition(|h| leader.as_ref().is_some_and(|l| l.address() == h.address()));
        first.each(|host| remove(host, component)).await?;
        last.each(|host| remove(host, component)).await?;

        let meta = &mut config.control_plane.metadata;
        meta.installed = false;
        meta.installed_version = None;
        meta.manager_join_token = None;
        meta.worker_join_token = None;
        Ok(())
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

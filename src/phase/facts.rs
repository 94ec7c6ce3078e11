//! Fact gathering

use super::{host_properties, Phase};
use crate::config::{ClusterConfig, Component};
use crate::error::Result;
use crate::host::{Host, HostSet, Role};
use crate::telemetry::Properties;
use async_trait::async_trait;
use std::sync::Arc;

/// Reads OS, identity and installed versions from every host, then derives
/// the cluster-wide control plane and registry metadata.
///
/// A host whose OS can't be resolved gets an error recorded against it and
/// is otherwise left alone; the other hosts are unaffected.
#[derive(Default)]
pub struct GatherFacts {
    hosts: HostSet,
}

impl GatherFacts {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn gather(host: Arc<Host>) -> Result<()> {
    let c = host.configurer();

    let os = match c.resolve_os().await {
        Ok(os) => os,
        Err(e) => {
            tracing::warn!("{}: {}", host, e);
            host.add_error(e.to_string());
            return Ok(());
        }
    };

    let hostname = c.hostname().await?;
    let internal_address = c.internal_address().await?;
    let runtime_version = c.installed_version(Component::Runtime).await?;
    let restart_required = match runtime_version {
        Some(_) => c.restart_required().await?,
        None => false,
    };
    let control_plane_version = c.installed_version(Component::ControlPlane).await?;
    let registry_version = c.installed_version(Component::Registry).await?;
    let containerized = c.is_containerized().await?;
    let needs_env_fix = if host.environment().is_empty() {
        false
    } else {
        c.needs_environment_fix(host.environment()).await?
    };

    host.update_facts(|f| {
        f.os = Some(os);
        f.hostname = Some(hostname);
        f.internal_address = Some(internal_address);
        f.runtime_version = runtime_version;
        f.control_plane_version = control_plane_version;
        f.registry_version = registry_version;
        f.restart_required = restart_required;
        f.containerized = containerized;
        f.needs_env_fix = needs_env_fix;
    });

    let facts = host.facts();
    tracing::info!(
        "{}: {} runtime {}",
        host,
        facts.os.as_deref().unwrap_or("unknown"),
        facts
            .runtime_version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "not installed".to_string())
    );
    Ok(())
}

#[async_trait]
impl Phase for GatherFacts {
    fn title(&self) -> String {
        "Gather host facts".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config.host_set();
        Ok(())
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        self.hosts.parallel_each(gather).await?;

        // Cluster-wide metadata is only written after every host reported
        let control_plane = config.control_plane_hosts();
        let installed = control_plane
            .find(|h| h.installed_version(Component::ControlPlane).is_some());
        if let Some(leader) = installed {
            let id = leader.configurer().cluster_id().await?;
            let meta = &mut config.control_plane.metadata;
            meta.installed = true;
            meta.installed_version = leader.installed_version(Component::ControlPlane);
            meta.leader = Some(leader.address().to_string());
            meta.cluster_id = Some(id);
            tracing::info!(
                "{}: control plane {} is running",
                leader,
                meta.installed_version
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            );
        }

        if let Some(ref mut registry) = config.registry {
            let running = config
                .hosts
                .iter()
                .filter(|h| h.role() == Role::Registry)
                .filter_map(|h| h.installed_version(Component::Registry))
                .min();
            if let Some(version) = running {
                registry.metadata.installed = true;
                registry.metadata.installed_version = Some(version);
            }
        }

        Ok(())
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::phase::Manager;
    use crate::testing::{cluster, mock_host, MockConfigurer};
    use crate::version::Version;

    #[tokio::test]
    async fn test_gathers_facts_and_metadata() {
        let cp = MockConfigurer::new()
            .with_hostname("cp-0")
            .with_version(Component::Runtime, "23.0.7")
            .with_version(Component::ControlPlane, "3.7.0")
            .with_pending_restart();
        let worker = MockConfigurer::new().with_hostname("w-0");
        let reg = MockConfigurer::new().with_version(Component::Registry, "2.8.1");
        let config = cluster(vec![
            mock_host("10.0.0.1", Role::ControlPlane, cp),
            mock_host("10.0.0.2", Role::Worker, worker.clone()),
            mock_host("10.0.0.3", Role::Registry, reg),
        ])
        .with_registry(RegistryConfig::new(Version::new(2, 8, 1)));

        let mut m = Manager::new(config);
        m.add_phase(GatherFacts::new());
        m.run().await.unwrap();

        let config = m.config();
        let facts = config.hosts[0].facts();
        assert_eq!(facts.hostname.as_deref(), Some("cp-0"));
        assert!(facts.restart_required);
        assert_eq!(config.hosts[0].to_string(), "10.0.0.1 (cp-0)");

        assert!(config.hosts[1].facts().runtime_version.is_none());
        assert_eq!(worker.count("restart_required"), 0);

        let meta = &config.control_plane.metadata;
        assert!(meta.installed);
        assert_eq!(meta.leader.as_deref(), Some("10.0.0.1"));
        assert_eq!(meta.installed_version, Some(Version::new(3, 7, 0)));
        assert_eq!(meta.cluster_id.as_deref(), Some("cluster-1234"));

        let registry = config.registry.as_ref().unwrap();
        assert!(registry.metadata.installed);
    }

    #[tokio::test]
    async fn test_unsupported_os_is_recorded_on_the_host() {
        let broken = MockConfigurer::new().unsupported_os();
        let config = cluster(vec![
            mock_host("10.0.0.1", Role::ControlPlane, MockConfigurer::new()),
            mock_host("10.0.0.2", Role::Worker, broken.clone()),
        ]);

        let mut m = Manager::new(config);
        m.add_phase(GatherFacts::new());
        m.run().await.unwrap();

        let hosts = &m.config().hosts;
        assert!(!hosts[0].has_errors());
        assert!(hosts[0].facts().os.is_some());
        assert!(hosts[1].has_errors());
        assert_eq!(broken.calls(), vec!["resolve_os"]);
        assert!(!m.config().control_plane.metadata.installed);
    }
}

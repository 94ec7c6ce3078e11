//! Host environment preparation

use super::{host_properties, log_selection, Phase};
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::host::HostSet;
use crate::telemetry::Properties;
use async_trait::async_trait;

/// Persists the configured environment on hosts that are missing it
#[derive(Default)]
pub struct PrepareHosts {
    hosts: HostSet,
}

impl PrepareHosts {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Phase for PrepareHosts {
    fn title(&self) -> String {
        "Prepare hosts".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config.host_set().filter(|h| h.facts().needs_env_fix);
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        self.hosts
            .parallel_each(|host| async move {
                tracing::info!("{}: updating environment", host);
                host.configurer().fix_environment(host.environment()).await?;
                host.update_facts(|f| f.needs_env_fix = false);
                Ok(())
            })
            .await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

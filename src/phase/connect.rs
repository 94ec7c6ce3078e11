//! Opening and closing host sessions

use super::{host_properties, CleanupPolicy, Phase};
use crate::config::ClusterConfig;
use crate::error::Result;
use crate::host::HostSet;
use crate::retry::{retry, RetryPolicy};
use crate::telemetry::Properties;
use async_trait::async_trait;
use std::sync::Arc;

/// Connects to every host, retrying transient failures.
///
/// Sessions stay open for the rest of the pipeline and are closed when it
/// ends, successfully or not.
pub struct Connect {
    retry: Arc<RetryPolicy>,
    hosts: HostSet,
}

impl Connect {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry: Arc::new(retry),
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for Connect {
    fn title(&self) -> String {
        "Connect to hosts".to_string()
    }

    fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy::Always
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config.host_set();
        Ok(())
    }

    async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
        let policy = Arc::clone(&self.retry);
        self.hosts
            .parallel_each(move |host| {
                let policy = Arc::clone(&policy);
                async move {
                    let what = format!("{}: connect", host.address());
                    retry(&policy, &what, || host.configurer().connect()).await?;
                    tracing::info!("{}: connected", host);
                    Ok(())
                }
            })
            .await
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.hosts
            .parallel_each(|host| async move {
                if let Err(e) = host.configurer().disconnect().await {
                    tracing::debug!("{}: disconnect failed: {}", host, e);
                }
                Ok(())
            })
            .await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

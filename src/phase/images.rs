//! Image pre-pulling

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, Component};
use crate::error::Result;
use crate::host::{HostSet, Role};
use crate::telemetry::Properties;
use async_trait::async_trait;
use std::sync::Arc;

/// Pulls the images a control plane (or registry) change will need before
/// the change starts, with at most `concurrency` hosts pulling at once.
pub struct PullImages {
    concurrency: usize,
    hosts: HostSet,
    control_plane_images: Arc<Vec<String>>,
    registry_images: Arc<Vec<String>>,
}

impl PullImages {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            hosts: HostSet::default(),
            control_plane_images: Arc::default(),
            registry_images: Arc::default(),
        }
    }
}

#[async_trait]
impl Phase for PullImages {
    fn title(&self) -> String {
        "Pull images".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let cp_target = &config.control_plane.version;
        let cp_hosts = config.control_plane_hosts().filter(|h| {
            h.installed_version(Component::ControlPlane).as_ref() != Some(cp_target)
        });

        let registry_hosts = match config.registry {
            Some(ref registry) => config.registry_hosts().filter(|h| {
                h.installed_version(Component::Registry).as_ref() != Some(&registry.version)
            }),
            None => HostSet::default(),
        };

        self.control_plane_images = Arc::new(config.control_plane.images());
        self.registry_images = Arc::new(
            config
                .registry
                .as_ref()
                .map(|r| r.images())
                .unwrap_or_default(),
        );
        self.hosts = cp_hosts.iter().chain(registry_hosts.iter()).cloned().collect();
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let cp_images = Arc::clone(&self.control_plane_images);
        let registry_images = Arc::clone(&self.registry_images);

        self.hosts
            .parallel_each_bounded(self.concurrency, move |host| {
                let images = match host.role() {
                    Role::Registry => Arc::clone(&registry_images),
                    _ => Arc::clone(&cp_images),
                };
                async move {
                    for image in images.iter() {
                        tracing::debug!("{}: pulling {}", host, image);
                        host.configurer().pull_image(image).await?;
                    }
                    tracing::info!("{}: pulled {} image(s)", host, images.len());
                    Ok(())
                }
            })
            .await
    }

    fn properties(&self) -> Properties {
        let mut props = host_properties(&self.hosts);
        props.insert("concurrency".to_string(), self.concurrency.into());
        props
    }
}

//! Pre-flight checks

use super::Phase;
use crate::config::{ClusterConfig, Component};
use crate::error::{AggregateError, KeelError, Result};
use crate::host::Role;
use crate::reconcile::plan;
use async_trait::async_trait;
use std::collections::HashMap;

/// Rejects clusters that can't be converged before anything is changed:
/// hosts that failed fact gathering, duplicate hostnames, and version
/// changes the reconciliation policy would refuse on any host.
pub struct ValidateHosts {
    force: bool,
}

impl ValidateHosts {
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    fn components(role: Role, config: &ClusterConfig) -> Vec<Component> {
        let mut components = vec![Component::Runtime, Component::ControlPlane];
        if role == Role::Registry && config.registry.is_some() {
            components.push(Component::Registry);
        }
        components
    }
}

#[async_trait]
impl Phase for ValidateHosts {
    fn title(&self) -> String {
        "Validate hosts".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        config.leader().map(|_| ())
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let mut errors = AggregateError::new();

        for host in &config.hosts {
            for message in host.errors() {
                errors.push(KeelError::Precondition(message).on_host(host.address()));
            }
        }

        let mut hostnames: HashMap<String, &str> = HashMap::new();
        for host in &config.hosts {
            if let Some(name) = host.facts().hostname {
                if let Some(other) = hostnames.insert(name.clone(), host.address()) {
                    errors.push(KeelError::Precondition(format!(
                        "hostname '{}' is used by both {} and {}",
                        name,
                        other,
                        host.address()
                    )));
                }
            }
        }

        for host in &config.hosts {
            for component in Self::components(host.role(), config) {
                let Some(target) = config.target_version(component) else {
                    continue;
                };
                let installed = host.installed_version(component);
                if let Err(e) = plan(component, installed.as_ref(), target, self.force) {
                    errors.push(e.on_host(host.address()));
                }
            }
        }

        errors.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::phase::{GatherFacts, Manager};
    use crate::testing::{cluster, mock_host, MockConfigurer};
    use std::sync::Arc;

    async fn validate(hosts: Vec<Arc<Host>>, force: bool) -> Result<()> {
        let mut m = Manager::new(cluster(hosts));
        m.add_phase(GatherFacts::new());
        m.add_phase(ValidateHosts::new(force));
        m.run().await
    }

    #[tokio::test]
    async fn test_clean_cluster_passes() {
        let result = validate(
            vec![
                mock_host("cp0", Role::ControlPlane, MockConfigurer::new().with_hostname("a")),
                mock_host("w0", Role::Worker, MockConfigurer::new().with_hostname("b")),
            ],
            false,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_downgrade_is_caught_before_any_change() {
        let cp = MockConfigurer::new()
            .with_hostname("a")
            .with_version(Component::ControlPlane, "3.8.0");
        let err = validate(vec![mock_host("cp0", Role::ControlPlane, cp.clone())], true)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("downgrade from 3.8.0 to 3.7.0"));
        assert!(!cp.calls().iter().any(|c| c.starts_with("apply")));
    }

    #[tokio::test]
    async fn test_version_skip_needs_force() {
        let hosts = || {
            vec![mock_host(
                "cp0",
                Role::ControlPlane,
                MockConfigurer::new().with_version(Component::ControlPlane, "3.5.2"),
            )]
        };
        let err = validate(hosts(), false).await.unwrap_err();
        assert!(err.to_string().contains("install 3.6 first"));
        assert!(validate(hosts(), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_reports_every_problem() {
        let err = validate(
            vec![
                mock_host("cp0", Role::ControlPlane, MockConfigurer::new().with_hostname("dup")),
                mock_host("w0", Role::Worker, MockConfigurer::new().with_hostname("dup")),
                mock_host("w1", Role::Worker, MockConfigurer::new().unsupported_os()),
            ],
            false,
        )
        .await
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("hostname 'dup' is used by both cp0 and w0"));
        assert!(msg.contains("w1: Precondition failed: Unsupported host: unknown OS"));
    }

    #[tokio::test]
    async fn test_requires_control_plane_host() {
        let err = validate(vec![mock_host("w0", Role::Worker, MockConfigurer::new())], false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("control-plane role"));
    }
}

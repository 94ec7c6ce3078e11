//! Control plane bootstrap, upgrade and membership

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, Component};
use crate::error::{KeelError, Result};
use crate::executor::attribute;
use crate::host::{Host, HostSet, Role};
use crate::reconcile::Target;
use crate::retry::RetryPolicy;
use crate::rolling::{rolling_update, wait_healthy, RollingPolicy};
use crate::telemetry::Properties;
use crate::version::Version;
use async_trait::async_trait;
use std::sync::Arc;

/// Address other hosts use to reach `leader`
fn leader_address(leader: &Host) -> String {
    leader
        .facts()
        .internal_address
        .unwrap_or_else(|| leader.address().to_string())
}

/// Join `host` and check that the agent it now runs is `expected`
async fn join(host: &Host, role: Role, leader: &str, token: &str, expected: &Version) -> Result<()> {
    tracing::info!("{}: joining the cluster as {}", host, role);
    let c = host.configurer();
    c.join(role, leader, token).await?;

    let actual = c.installed_version(Component::ControlPlane).await?;
    host.set_installed_version(Component::ControlPlane, actual.clone());
    match actual {
        Some(ref v) if v == expected => Ok(()),
        other => Err(KeelError::VerificationFailed {
            component: Component::ControlPlane.to_string(),
            expected: expected.to_string(),
            actual: other
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
        }),
    }
}

/// Join token for `role`, issued by the leader on first use and then kept
/// in the control plane metadata
async fn join_token(config: &mut ClusterConfig, leader: &Host, role: Role) -> Result<String> {
    let meta = &mut config.control_plane.metadata;
    let slot = match role {
        Role::ControlPlane => &mut meta.manager_join_token,
        _ => &mut meta.worker_join_token,
    };
    if let Some(token) = slot.as_ref() {
        return Ok(token.clone());
    }
    let token = leader.configurer().issue_join_token(role).await?;
    *slot = Some(token.clone());
    Ok(token)
}

/// Bootstraps the control plane on the leader when no host runs it yet.
///
/// On failure the half-installed bootstrap is removed again.
pub struct InstallControlPlane {
    force: bool,
    leader: Option<Arc<Host>>,
    attempted: bool,
}

impl InstallControlPlane {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            leader: None,
            attempted: false,
        }
    }
}

#[async_trait]
impl Phase for InstallControlPlane {
    fn title(&self) -> String {
        "Install control plane".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.leader = if config.control_plane.metadata.installed {
            None
        } else {
            Some(config.leader()?)
        };
        Ok(())
    }

    fn should_run(&self) -> bool {
        self.leader.is_some()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let Some(leader) = self.leader.clone() else {
            return Ok(());
        };
        let target = Target::new(
            Component::ControlPlane,
            config.control_plane.version.clone(),
            config.control_plane.install_flags.clone(),
            self.force,
        );

        tracing::info!("{}: bootstrapping control plane {}", leader, target.version);
        self.attempted = true;
        target
            .reconcile(&leader)
            .await
            .map_err(|e| attribute(e, &leader))?;

        let c = leader.configurer();
        let cluster_id = c.cluster_id().await.map_err(|e| attribute(e, &leader))?;
        let manager_token = c
            .issue_join_token(Role::ControlPlane)
            .await
            .map_err(|e| attribute(e, &leader))?;
        let worker_token = c
            .issue_join_token(Role::Worker)
            .await
            .map_err(|e| attribute(e, &leader))?;

        let meta = &mut config.control_plane.metadata;
        meta.installed = true;
        meta.bootstrapped = true;
        meta.installed_version = Some(target.version.clone());
        meta.leader = Some(leader.address().to_string());
        meta.cluster_id = Some(cluster_id);
        meta.manager_join_token = Some(manager_token);
        meta.worker_join_token = Some(worker_token);

        tracing::info!("{}: control plane {} is up", leader, target.version);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<()> {
        let Some(ref leader) = self.leader else {
            return Ok(());
        };
        if !self.attempted {
            return Ok(());
        }
        tracing::warn!("{}: removing the failed control plane bootstrap", leader);
        leader
            .configurer()
            .uninstall(Component::ControlPlane)
            .await?;
        leader.set_installed_version(Component::ControlPlane, None);
        Ok(())
    }
}

/// Upgrades every host running an older control plane agent.
///
/// Control plane hosts go one at a time, each followed by a health check;
/// the remaining hosts follow in rolling batches. With `force`, hosts
/// already at the target are upgraded again unless the control plane was
/// bootstrapped in this run.
pub struct UpgradeControlPlane {
    policy: RollingPolicy,
    force: bool,
    hosts: HostSet,
}

impl UpgradeControlPlane {
    pub fn new(policy: RollingPolicy, force: bool) -> Self {
        Self {
            policy,
            force,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for UpgradeControlPlane {
    fn title(&self) -> String {
        "Upgrade control plane".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let target = &config.control_plane.version;
        let meta = &config.control_plane.metadata;
        let reapply = self.force && !meta.bootstrapped;
        self.hosts = if meta.installed {
            config.host_set().filter(|h| {
                h.installed_version(Component::ControlPlane)
                    .is_some_and(|v| v < *target || (reapply && v == *target))
            })
        } else {
            HostSet::default()
        };
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let target = Arc::new(Target::new(
            Component::ControlPlane,
            config.control_plane.version.clone(),
            config.control_plane.upgrade_flags.clone(),
            self.force,
        ));

        let t = Arc::clone(&target);
        rolling_update(&self.hosts, &self.policy, true, move |host| {
            let t = Arc::clone(&t);
            async move {
                t.reconcile(&host).await?;
                Ok(())
            }
        })
        .await?;

        let all_current = config.control_plane_hosts().iter().all(|h| {
            h.installed_version(Component::ControlPlane).as_ref() == Some(&target.version)
        });
        if all_current {
            config.control_plane.metadata.installed_version = Some(target.version.clone());
        }
        Ok(())
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

/// Joins the remaining control plane hosts, one at a time, waiting for the
/// control plane to report healthy on each before moving on
pub struct JoinControlPlane {
    health: RetryPolicy,
    hosts: HostSet,
}

impl JoinControlPlane {
    pub fn new(policy: &RollingPolicy) -> Self {
        Self {
            health: policy.health.clone(),
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for JoinControlPlane {
    fn title(&self) -> String {
        "Join control plane hosts".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config
            .control_plane_hosts()
            .filter(|h| h.installed_version(Component::ControlPlane).is_none());
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        let leader = config.leader()?;
        let expected = config
            .control_plane
            .metadata
            .installed_version
            .clone()
            .unwrap_or_else(|| config.control_plane.version.clone());
        let token = join_token(config, &leader, Role::ControlPlane).await?;
        let address = leader_address(&leader);

        let health = &self.health;
        self.hosts
            .each(|host| {
                let (token, address, expected) = (&token, &address, &expected);
                async move {
                    join(&host, Role::ControlPlane, address, token, expected).await?;
                    wait_healthy(&host, health).await
                }
            })
            .await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

/// Joins worker and registry hosts that aren't cluster members yet
#[derive(Default)]
pub struct JoinWorkers {
    hosts: HostSet,
}

impl JoinWorkers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Phase for JoinWorkers {
    fn title(&self) -> String {
        "Join workers".to_string()
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        self.hosts = config.host_set().filter(|h| {
            !h.is_control_plane() && h.installed_version(Component::ControlPlane).is_none()
        });
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let leader = config.leader()?;
        let expected = Arc::new(
            config
                .control_plane
                .metadata
                .installed_version
                .clone()
                .unwrap_or_else(|| config.control_plane.version.clone()),
        );
        let token = Arc::new(join_token(config, &leader, Role::Worker).await?);
        let address = Arc::new(leader_address(&leader));

        self.hosts
            .parallel_each(move |host| {
                let (token, address, expected) =
                    (Arc::clone(&token), Arc::clone(&address), Arc::clone(&expected));
                async move { join(&host, Role::Worker, &address, &token, &expected).await }
            })
            .await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

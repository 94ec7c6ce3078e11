//! User hook commands

use super::{host_properties, log_selection, Phase};
use crate::config::{ClusterConfig, HookAction, HookStage};
use crate::error::{KeelError, Result};
use crate::host::HostSet;
use crate::telemetry::Properties;
use async_trait::async_trait;

/// Runs each host's hook commands for one action and stage, in order.
///
/// The first failing command stops that host's hooks.
pub struct RunHooks {
    action: HookAction,
    stage: HookStage,
    hosts: HostSet,
}

impl RunHooks {
    pub fn new(action: HookAction, stage: HookStage) -> Self {
        Self {
            action,
            stage,
            hosts: HostSet::default(),
        }
    }
}

#[async_trait]
impl Phase for RunHooks {
    fn title(&self) -> String {
        let stage = match self.stage {
            HookStage::Before => "before",
            HookStage::After => "after",
        };
        let action = match self.action {
            HookAction::Apply => "apply",
            HookAction::Reset => "reset",
        };
        format!("Run {} {} hooks", stage, action)
    }

    fn prepare(&mut self, config: &ClusterConfig) -> Result<()> {
        let (action, stage) = (self.action, self.stage);
        self.hosts = config
            .host_set()
            .filter(|h| !h.hooks().commands(action, stage).is_empty());
        Ok(())
    }

    fn should_run(&self) -> bool {
        !self.hosts.is_empty()
    }

    async fn run(&mut self, _config: &mut ClusterConfig) -> Result<()> {
        log_selection(&self.title(), &self.hosts);
        let (action, stage) = (self.action, self.stage);
        self.hosts
            .parallel_each(move |host| async move {
                for cmd in host.hooks().commands(action, stage) {
                    tracing::info!("{}: running hook: {}", host, cmd);
                    host.configurer()
                        .exec(cmd)
                        .await
                        .map_err(|e| KeelError::Command(format!("hook '{}': {}", cmd, e)))?;
                }
                Ok(())
            })
            .await
    }

    fn properties(&self) -> Properties {
        host_properties(&self.hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HookCommands, Hooks};
    use crate::host::{Host, Role};
    use crate::phase::Manager;
    use crate::testing::{cluster, MockConfigurer};
    use std::sync::Arc;

    fn hooks(before: &[&str]) -> Hooks {
        Hooks {
            apply: HookCommands {
                before: before.iter().map(|s| s.to_string()).collect(),
                after: Vec::new(),
            },
            reset: HookCommands::default(),
        }
    }

    #[tokio::test]
    async fn test_runs_hooks_in_order_and_stops_on_failure() {
        let ok = MockConfigurer::new();
        let broken = MockConfigurer::new().failing("exec:false");
        let hosts = vec![
            Arc::new(
                Host::new("cp0", Role::ControlPlane, Arc::new(ok.clone()))
                    .with_hooks(hooks(&["echo one", "echo two"])),
            ),
            Arc::new(
                Host::new("w0", Role::Worker, Arc::new(broken.clone()))
                    .with_hooks(hooks(&["false", "echo never"])),
            ),
        ];

        let mut m = Manager::new(cluster(hosts));
        m.add_phase(RunHooks::new(HookAction::Apply, HookStage::Before));
        let err = m.run().await.unwrap_err();

        assert!(err.to_string().contains("w0: Command failed: hook 'false'"));
        assert_eq!(ok.calls(), vec!["exec:echo one", "exec:echo two"]);
        assert_eq!(broken.calls(), vec!["exec:false"]);
    }

    #[tokio::test]
    async fn test_no_hooks_skips() {
        let hosts = vec![Arc::new(
            Host::new("cp0", Role::ControlPlane, Arc::new(MockConfigurer::new()))
                .with_hooks(hooks(&["echo one"])),
        )];
        let mut m = Manager::new(cluster(hosts));
        m.add_phase(RunHooks::new(HookAction::Reset, HookStage::After));
        m.run().await.unwrap();
        assert_eq!(m.report().skipped(), 1);
        assert_eq!(m.titles(), vec!["Run after reset hooks"]);
    }
}

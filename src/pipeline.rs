//! Standard pipelines

use crate::config::{ClusterConfig, Component, HookAction, HookStage, Settings};
use crate::phase::{
    Connect, GatherFacts, InstallControlPlane, InstallRegistry, InstallRuntime, JoinControlPlane,
    JoinWorkers, LoadState, Manager, PrepareHosts, PullImages, RemoveState, RestartRuntime,
    RunHooks, SaveState, Uninstall, UpgradeControlPlane, UpgradeRegistry, UpgradeRuntime,
    ValidateHosts,
};
use crate::state::StateStore;

fn manager(config: ClusterConfig, settings: &Settings) -> Manager {
    Manager::new(config)
        .ignore_errors(settings.ignore_errors)
        .skip_cleanup(settings.skip_cleanup)
}

/// Install or upgrade everything to the configured versions
pub fn apply_pipeline(config: ClusterConfig, settings: &Settings) -> Manager {
    let store = StateStore::new(&settings.state_dir());
    let force = settings.force;
    let rolling = &settings.rolling;

    let mut m = manager(config, settings);
    m.add_phase(LoadState::new(store.clone()));
    m.add_phase(Connect::new(settings.connect_retry.clone()));
    m.add_phase(GatherFacts::new());
    m.add_phase(ValidateHosts::new(force));
    m.add_phase(PrepareHosts::new());
    m.add_phase(RunHooks::new(HookAction::Apply, HookStage::Before));
    m.add_phase(InstallRuntime::new(force));
    m.add_phase(UpgradeRuntime::new(rolling.clone(), force));
    m.add_phase(RestartRuntime::new(rolling.clone()));
    m.add_phase(PullImages::new(settings.image_concurrency));
    m.add_phase(InstallControlPlane::new(force));
    m.add_phase(UpgradeControlPlane::new(rolling.clone(), force));
    m.add_phase(JoinControlPlane::new(rolling));
    m.add_phase(JoinWorkers::new());
    m.add_phase(InstallRegistry::new(force));
    m.add_phase(UpgradeRegistry::new(rolling.clone(), force));
    m.add_phase(RunHooks::new(HookAction::Apply, HookStage::After));
    m.add_phase(SaveState::new(store));
    m
}

/// Remove everything Keel installed and forget the cluster
pub fn reset_pipeline(config: ClusterConfig, settings: &Settings) -> Manager {
    let store = StateStore::new(&settings.state_dir());

    let mut m = manager(config, settings);
    m.add_phase(LoadState::new(store.clone()));
    m.add_phase(Connect::new(settings.connect_retry.clone()));
    m.add_phase(GatherFacts::new());
    m.add_phase(RunHooks::new(HookAction::Reset, HookStage::Before));
    m.add_phase(Uninstall::new(Component::Registry));
    m.add_phase(Uninstall::new(Component::ControlPlane));
    m.add_phase(Uninstall::new(Component::Runtime));
    m.add_phase(RunHooks::new(HookAction::Reset, HookStage::After));
    m.add_phase(RemoveState::new(store));
    m
}
